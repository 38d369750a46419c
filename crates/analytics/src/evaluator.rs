use crate::error::AnalyticsError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use core_types::{
    BacktestResult, BacktestWindow, DailyLoss, MetricValue, PerformanceMetrics, TradeRecord,
};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// The largest gap tolerated between the requested window and the span the
/// equity curve actually covers. One bar of the coarsest timeframe.
const COVERAGE_TOLERANCE_DAYS: i64 = 1;

/// A stateless calculator for deriving performance metrics from backtest output.
///
/// Identical inputs always produce identical metrics.
#[derive(Debug, Clone)]
pub struct MetricEvaluator {
    annualization_days: u32,
    min_period_days: i64,
}

impl Default for MetricEvaluator {
    fn default() -> Self {
        Self::new(365, 30)
    }
}

impl MetricEvaluator {
    pub fn new(annualization_days: u32, min_period_days: i64) -> Self {
        Self {
            annualization_days,
            min_period_days,
        }
    }

    /// The main entry point for scoring a backtest.
    ///
    /// Results that do not cover the full requested window are refused before
    /// any metric is computed.
    pub fn evaluate(&self, result: &BacktestResult) -> Result<PerformanceMetrics, AnalyticsError> {
        self.check_coverage(result)?;
        self.compute(&result.trades, &result.equity_curve, result.window)
    }

    /// Scores realized trades inside `window`, starting from `capital_base`.
    ///
    /// Live histories have no equity curve of their own, so one is rebuilt from
    /// the cumulative P&L at each exit. No coverage check is applied.
    pub fn evaluate_trades(
        &self,
        trades: &[TradeRecord],
        capital_base: Decimal,
        window: BacktestWindow,
    ) -> Result<PerformanceMetrics, AnalyticsError> {
        let mut sorted: Vec<&TradeRecord> = trades
            .iter()
            .filter(|t| t.exit_time >= window.start && t.exit_time < window.end)
            .collect();
        sorted.sort_by_key(|t| t.exit_time);

        let mut equity = capital_base;
        let mut curve = Vec::with_capacity(sorted.len() + 1);
        curve.push((window.start, equity));
        for trade in &sorted {
            equity += trade.pnl;
            curve.push((trade.exit_time, equity));
        }
        let owned: Vec<TradeRecord> = sorted.into_iter().cloned().collect();
        self.compute(&owned, &curve, window)
    }

    fn check_coverage(&self, result: &BacktestResult) -> Result<(), AnalyticsError> {
        let window = result.window;
        if window.days() < self.min_period_days {
            return Err(AnalyticsError::WindowTooShort {
                got: window.days(),
                required: self.min_period_days,
            });
        }

        let tolerance = Duration::days(COVERAGE_TOLERANCE_DAYS);
        let partial = |covered: Option<BacktestWindow>| AnalyticsError::PartialWindow {
            start: window.start,
            end: window.end,
            covered_start: covered.map(|c| c.start),
            covered_end: covered.map(|c| c.end),
        };

        let covered = result.covered_window().ok_or_else(|| partial(None))?;
        if covered.start > window.start + tolerance || covered.end < window.end - tolerance {
            tracing::debug!(
                requested_start = %window.start,
                requested_end = %window.end,
                covered_start = %covered.start,
                covered_end = %covered.end,
                "backtest result does not cover its window"
            );
            return Err(partial(Some(covered)));
        }
        Ok(())
    }

    fn compute(
        &self,
        trades: &[TradeRecord],
        equity_curve: &[(DateTime<Utc>, Decimal)],
        window: BacktestWindow,
    ) -> Result<PerformanceMetrics, AnalyticsError> {
        let mut metrics = PerformanceMetrics {
            total_trades: trades.len(),
            winning_trades: 0,
            losing_trades: 0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            net_profit: Decimal::ZERO,
            profit_factor: MetricValue::InsufficientData,
            win_rate: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            sharpe_ratio: MetricValue::InsufficientData,
            daily_losses: Vec::new(),
            worst_daily_loss: Decimal::ZERO,
            trades_per_day: Decimal::ZERO,
            period_days: window.days(),
        };

        self.calculate_profitability(trades, &mut metrics);
        metrics.max_drawdown = max_drawdown(equity_curve);

        let returns = daily_returns(equity_curve);
        metrics.daily_losses = returns
            .iter()
            .map(|(date, r)| DailyLoss {
                date: *date,
                loss: (-*r).max(Decimal::ZERO),
            })
            .collect();
        metrics.worst_daily_loss = metrics
            .daily_losses
            .iter()
            .map(|d| d.loss)
            .max()
            .unwrap_or(Decimal::ZERO);

        if window.days() > 0 {
            metrics.trades_per_day = Decimal::from(trades.len()) / Decimal::from(window.days());
        }

        // With no trades there is nothing to judge; both ratios stay undefined.
        if !trades.is_empty() {
            let series: Vec<Decimal> = returns.values().copied().collect();
            metrics.sharpe_ratio = self.sharpe_ratio(&series)?;
        }

        Ok(metrics)
    }

    /// Calculates all profitability-related metrics.
    fn calculate_profitability(&self, trades: &[TradeRecord], metrics: &mut PerformanceMetrics) {
        for trade in trades {
            metrics.net_profit += trade.pnl;
            if trade.pnl > Decimal::ZERO {
                metrics.gross_profit += trade.pnl;
                metrics.winning_trades += 1;
            } else {
                metrics.gross_loss += trade.pnl.abs();
                metrics.losing_trades += 1;
            }
        }

        if metrics.total_trades == 0 {
            return;
        }

        metrics.win_rate =
            Decimal::from(metrics.winning_trades) / Decimal::from(metrics.total_trades);
        metrics.profit_factor = if metrics.gross_loss > Decimal::ZERO {
            MetricValue::Finite(metrics.gross_profit / metrics.gross_loss)
        } else if metrics.gross_profit > Decimal::ZERO {
            MetricValue::PositiveInfinity
        } else {
            MetricValue::Finite(Decimal::ZERO)
        };
    }

    /// Annualized Sharpe ratio of daily returns, risk-free rate zero.
    fn sharpe_ratio(&self, returns: &[Decimal]) -> Result<MetricValue, AnalyticsError> {
        if returns.len() < 2 {
            return Ok(MetricValue::InsufficientData);
        }

        let n = Decimal::from(returns.len());
        let mean = returns.iter().sum::<Decimal>() / n;
        let variance = returns
            .iter()
            .map(|r| (*r - mean) * (*r - mean))
            .sum::<Decimal>()
            / n;

        if variance <= Decimal::ZERO {
            return Ok(if mean > Decimal::ZERO {
                MetricValue::PositiveInfinity
            } else {
                MetricValue::Finite(Decimal::ZERO)
            });
        }

        let std_dev = variance
            .sqrt()
            .ok_or_else(|| AnalyticsError::Calculation("square root of variance".to_string()))?;
        let annualization = Decimal::from(self.annualization_days)
            .sqrt()
            .ok_or_else(|| AnalyticsError::Calculation("square root of annualization".to_string()))?;

        Ok(MetricValue::Finite(mean / std_dev * annualization))
    }
}

/// Largest peak-to-trough decline of the curve as a fraction of the peak.
pub fn max_drawdown(equity_curve: &[(DateTime<Utc>, Decimal)]) -> Decimal {
    let Some(&(_, first)) = equity_curve.first() else {
        return Decimal::ZERO;
    };

    let mut peak = first;
    let mut worst = Decimal::ZERO;
    for &(_timestamp, equity) in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - equity) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

/// Daily returns keyed by UTC date.
///
/// Each day closes at its last equity point. The first day is measured against
/// the first point of the curve, every later day against the previous close.
pub fn daily_returns(equity_curve: &[(DateTime<Utc>, Decimal)]) -> BTreeMap<NaiveDate, Decimal> {
    let mut closes: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for &(timestamp, equity) in equity_curve {
        closes.insert(timestamp.date_naive(), equity);
    }

    let mut returns = BTreeMap::new();
    let Some(&(_, mut previous)) = equity_curve.first() else {
        return returns;
    };
    for (date, close) in closes {
        if previous > Decimal::ZERO {
            returns.insert(date, (close - previous) / previous);
        }
        previous = close;
    }
    returns
}
