use crate::error::ConfigError;
use core_types::{Indicator, IndicatorParams, Timeframe};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Upper bound on the portfolio size. Admission compares a candidate against
/// every active strategy, so this keeps that check small.
pub const MAX_PORTFOLIO_CAPACITY: usize = 50;

/// The root configuration structure for the entire application.
///
/// Every section has documented defaults, so an empty `config.toml` is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub system: SystemConfig,
    pub thresholds: PromotionThresholds,
    pub strategy: StrategyConfig,
    pub metrics: MetricsConfig,
    pub portfolio: PortfolioConfig,
    pub scheduler: SchedulerConfig,
    pub generator: GeneratorConfig,
    pub backtest: BacktestConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// System-wide limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Maximum number of strategies in state `ACTIVE` at once.
    pub max_concurrent_strategies: usize,
    /// Interval between evolution cycles.
    pub evolution_cycle_hours: u64,
    /// Minimum length of a backtest window.
    pub min_backtest_period_days: i64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            max_concurrent_strategies: 5,
            evolution_cycle_hours: 24,
            min_backtest_period_days: 30,
        }
    }
}

/// The promotion rule set. All must hold for a candidate to be promoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionThresholds {
    pub min_profit_factor: Decimal,
    /// Fraction of winning trades (0.45 = 45%).
    pub min_win_rate: Decimal,
    /// Maximum peak-to-trough drawdown as a fraction.
    pub max_drawdown_threshold: Decimal,
    pub min_sharpe_ratio: Decimal,
    pub min_trades_per_day: Decimal,
    /// Worst single-day loss as a fraction of equity.
    pub max_daily_loss: Decimal,
    /// Below this many trades the candidate is put on hold instead of judged.
    pub min_sample_trades: usize,
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        Self {
            min_profit_factor: dec!(1.5),
            min_win_rate: dec!(0.45),
            max_drawdown_threshold: dec!(0.20),
            min_sharpe_ratio: dec!(1.0),
            min_trades_per_day: dec!(3),
            max_daily_loss: dec!(0.05),
            min_sample_trades: 10,
        }
    }
}

/// The combinatorial search space and diversification band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub available_timeframes: Vec<Timeframe>,
    pub max_indicators_per_strategy: usize,
    pub available_indicators: Vec<Indicator>,
    /// Parameters applied to an indicator whenever a spec uses it.
    pub indicator_params: BTreeMap<Indicator, IndicatorParams>,
    /// Correlations below this mark a candidate as well diversified.
    pub min_correlation_threshold: Decimal,
    /// A candidate correlating above this with any active strategy is refused.
    pub max_correlation_threshold: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let period = |p: i64| IndicatorParams::new().with("period", Decimal::from(p));
        let indicator_params = BTreeMap::from([
            (Indicator::Sma, period(20)),
            (Indicator::Ema, period(21)),
            (Indicator::Rsi, period(14)),
            (
                Indicator::Macd,
                IndicatorParams::new()
                    .with("fast", dec!(12))
                    .with("slow", dec!(26))
                    .with("signal", dec!(9)),
            ),
            (
                Indicator::BollingerBands,
                period(20).with("std_dev", dec!(2)),
            ),
            (Indicator::Atr, period(14)),
            (Indicator::Stochastic, period(14)),
            (Indicator::Obv, period(20)),
            (Indicator::Vwap, period(24)),
        ]);

        Self {
            available_timeframes: Timeframe::ALL.to_vec(),
            max_indicators_per_strategy: 5,
            available_indicators: Indicator::ALL.to_vec(),
            indicator_params,
            min_correlation_threshold: dec!(0.3),
            max_correlation_threshold: dec!(0.8),
        }
    }
}

/// Parameters of the metric evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Trading days per year used to annualize the Sharpe ratio.
    pub annualization_days: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            annualization_days: 365,
        }
    }
}

/// Parameters of the portfolio manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    /// Trailing window of live/paper trades used to score active strategies.
    pub score_window_days: i64,
    /// Correlations over fewer overlapping days are not trusted.
    pub min_correlation_overlap_days: usize,
    /// Notional capital that live P&L is divided by to obtain daily returns.
    pub capital_base: Decimal,
    pub persistence_retry_attempts: u32,
    pub persistence_backoff_ms: u64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            score_window_days: 30,
            min_correlation_overlap_days: 10,
            capital_base: dec!(10000),
            persistence_retry_attempts: 5,
            persistence_backoff_ms: 200,
        }
    }
}

/// Parameters of the evolution scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How many new candidates to request per cycle.
    pub candidates_per_cycle: usize,
    /// Maximum number of concurrent backtests.
    pub worker_concurrency: usize,
    /// Wall-clock bound for one backtest.
    pub backtest_timeout_secs: u64,
    /// After this many holds a candidate is rejected.
    pub max_hold_retries: u32,
    /// Days added to the backtest window each time a candidate is held.
    pub hold_window_extension_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            candidates_per_cycle: 20,
            worker_concurrency: 4,
            backtest_timeout_secs: 300,
            max_hold_retries: 3,
            hold_window_extension_days: 30,
        }
    }
}

/// Parameters of the candidate generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Archived specs newer than this many days are not proposed again.
    pub dedup_recency_days: i64,
    /// Maximum Jaccard overlap of indicator sets with an active strategy on the
    /// same timeframe. `1.0` disables the filter.
    pub max_indicator_overlap: Decimal,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            dedup_recency_days: 30,
            max_indicator_overlap: dec!(0.8),
            seed: None,
        }
    }
}

/// Parameters of the reference backtest simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Instrument whose klines are replayed.
    pub symbol: String,
    /// Proportional cost charged on entry and on exit.
    pub fee_rate: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            fee_rate: dec!(0.001),
        }
    }
}

/// Connection settings of the PostgreSQL state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Environment variable holding the connection string.
    pub database_url_env: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url_env: "DATABASE_URL".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

/// Output format of the console log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
    /// When set, logs are also written to a daily-rolling file in this directory.
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directory: None,
        }
    }
}

impl Config {
    /// Checks that every limit and threshold is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationError(msg));
        let unit = |v: Decimal| v >= Decimal::ZERO && v <= Decimal::ONE;

        let cap = self.system.max_concurrent_strategies;
        if cap == 0 || cap > MAX_PORTFOLIO_CAPACITY {
            return fail(format!(
                "max_concurrent_strategies must be in 1..={}, got {}",
                MAX_PORTFOLIO_CAPACITY, cap
            ));
        }
        if self.system.evolution_cycle_hours == 0 {
            return fail("evolution_cycle_hours must be positive".to_string());
        }
        if self.system.min_backtest_period_days <= 0 {
            return fail("min_backtest_period_days must be positive".to_string());
        }

        let t = &self.thresholds;
        if !unit(t.min_win_rate) || !unit(t.max_drawdown_threshold) || !unit(t.max_daily_loss) {
            return fail("win rate, drawdown and daily loss thresholds are fractions in [0, 1]".to_string());
        }
        if t.min_profit_factor.is_sign_negative() || t.min_trades_per_day.is_sign_negative() {
            return fail("min_profit_factor and min_trades_per_day must not be negative".to_string());
        }

        let s = &self.strategy;
        if s.available_timeframes.is_empty() || s.available_indicators.is_empty() {
            return fail("at least one timeframe and one indicator must be available".to_string());
        }
        if s.max_indicators_per_strategy == 0 {
            return fail("max_indicators_per_strategy must be positive".to_string());
        }
        if !unit(s.min_correlation_threshold.abs()) || !unit(s.max_correlation_threshold.abs()) {
            return fail("correlation thresholds must lie in [-1, 1]".to_string());
        }
        if s.min_correlation_threshold > s.max_correlation_threshold {
            return fail(format!(
                "min_correlation_threshold ({}) exceeds max_correlation_threshold ({})",
                s.min_correlation_threshold, s.max_correlation_threshold
            ));
        }

        if self.metrics.annualization_days == 0 {
            return fail("annualization_days must be positive".to_string());
        }
        if self.portfolio.capital_base <= Decimal::ZERO {
            return fail("capital_base must be positive".to_string());
        }
        if self.portfolio.score_window_days <= 0 {
            return fail("score_window_days must be positive".to_string());
        }
        if self.scheduler.worker_concurrency == 0 {
            return fail("worker_concurrency must be positive".to_string());
        }
        if self.scheduler.backtest_timeout_secs == 0 {
            return fail("backtest_timeout_secs must be positive".to_string());
        }
        if self.scheduler.hold_window_extension_days < 0 {
            return fail("hold_window_extension_days must not be negative".to_string());
        }
        if !unit(self.generator.max_indicator_overlap) {
            return fail("max_indicator_overlap must lie in [0, 1]".to_string());
        }
        if self.backtest.symbol.is_empty() {
            return fail("backtest.symbol must not be empty".to_string());
        }
        if !unit(self.backtest.fee_rate) {
            return fail("fee_rate must lie in [0, 1]".to_string());
        }
        if self.generator.dedup_recency_days < 0 {
            return fail("dedup_recency_days must not be negative".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.system.max_concurrent_strategies, 5);
        assert_eq!(config.system.evolution_cycle_hours, 24);
        assert_eq!(config.system.min_backtest_period_days, 30);
        assert_eq!(config.thresholds.min_profit_factor, dec!(1.5));
        assert_eq!(config.thresholds.min_win_rate, dec!(0.45));
        assert_eq!(config.thresholds.max_drawdown_threshold, dec!(0.20));
        assert_eq!(config.thresholds.min_sharpe_ratio, dec!(1.0));
        assert_eq!(config.thresholds.min_trades_per_day, dec!(3));
        assert_eq!(config.thresholds.max_daily_loss, dec!(0.05));
        assert_eq!(config.strategy.available_timeframes.len(), 5);
        assert_eq!(config.strategy.available_indicators.len(), 9);
        assert_eq!(config.strategy.max_correlation_threshold, dec!(0.8));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_correlation_band() {
        let mut config = Config::default();
        config.strategy.min_correlation_threshold = dec!(0.9);
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_bounds_capacity() {
        let mut config = Config::default();
        config.system.max_concurrent_strategies = 0;
        assert!(config.validate().is_err());
        config.system.max_concurrent_strategies = MAX_PORTFOLIO_CAPACITY + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_fraction_out_of_range() {
        let mut config = Config::default();
        config.thresholds.max_daily_loss = dec!(5);
        assert!(config.validate().is_err());
    }
}
