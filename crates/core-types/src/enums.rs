use crate::error::CoreError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The bar interval a strategy trades on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// The length of a single bar.
    pub fn bar_duration(&self) -> Duration {
        match self {
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInput("timeframe".to_string(), s.to_string()))
    }
}

/// The technical indicators a strategy can be composed from.
///
/// The declaration order is the canonical order used when a spec is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Sma,
    Ema,
    Rsi,
    Macd,
    BollingerBands,
    Atr,
    Stochastic,
    Obv,
    Vwap,
}

impl Indicator {
    pub const ALL: [Indicator; 9] = [
        Indicator::Sma,
        Indicator::Ema,
        Indicator::Rsi,
        Indicator::Macd,
        Indicator::BollingerBands,
        Indicator::Atr,
        Indicator::Stochastic,
        Indicator::Obv,
        Indicator::Vwap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::Sma => "sma",
            Indicator::Ema => "ema",
            Indicator::Rsi => "rsi",
            Indicator::Macd => "macd",
            Indicator::BollingerBands => "bollinger_bands",
            Indicator::Atr => "atr",
            Indicator::Stochastic => "stochastic",
            Indicator::Obv => "obv",
            Indicator::Vwap => "vwap",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Indicator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Indicator::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInput("indicator".to_string(), s.to_string()))
    }
}

/// Lifecycle state of a `StrategyRecord`.
///
/// ```text
/// GENERATED -> BACKTESTING -> EVALUATED -> PORTFOLIO_PENDING -> ACTIVE -> RETIRED
///                   |             |  \            |
///                   v             v   -> HOLD -> BACKTESTING (retry)
///                REJECTED <-------+--------+------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyState {
    Generated,
    Backtesting,
    Evaluated,
    Hold,
    PortfolioPending,
    Active,
    Rejected,
    Retired,
}

impl StrategyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyState::Generated => "GENERATED",
            StrategyState::Backtesting => "BACKTESTING",
            StrategyState::Evaluated => "EVALUATED",
            StrategyState::Hold => "HOLD",
            StrategyState::PortfolioPending => "PORTFOLIO_PENDING",
            StrategyState::Active => "ACTIVE",
            StrategyState::Rejected => "REJECTED",
            StrategyState::Retired => "RETIRED",
        }
    }

    /// `REJECTED` and `RETIRED` records are archived and never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StrategyState::Rejected | StrategyState::Retired)
    }

    /// Returns `true` if the state machine allows moving from `self` to `next`.
    ///
    /// `PORTFOLIO_PENDING -> EVALUATED` exists only for restart recovery.
    pub fn can_transition_to(&self, next: StrategyState) -> bool {
        use StrategyState::*;
        matches!(
            (self, next),
            (Generated, Backtesting)
                | (Generated, Rejected)
                | (Backtesting, Evaluated)
                | (Backtesting, Hold)
                | (Backtesting, Rejected)
                | (Evaluated, PortfolioPending)
                | (Evaluated, Hold)
                | (Evaluated, Rejected)
                | (Hold, Backtesting)
                | (Hold, Rejected)
                | (PortfolioPending, Active)
                | (PortfolioPending, Rejected)
                | (PortfolioPending, Evaluated)
                | (Active, Retired)
        )
    }
}

impl fmt::Display for StrategyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use StrategyState::*;
        [Generated, Backtesting, Evaluated, Hold, PortfolioPending, Active, Rejected, Retired]
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInput("strategy state".to_string(), s.to_string()))
    }
}

/// Machine-readable cause attached to every `REJECTED` or `RETIRED` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// The backtest simulator returned an error.
    BacktestFailed,
    /// The market data for the window had gaps.
    DataGap,
    /// The backtest exceeded its wall-clock bound.
    BacktestTimeout,
    /// A metric could not be computed (e.g. zero trades).
    InsufficientData,
    /// At least one promotion threshold was not met.
    ThresholdNotMet,
    /// The candidate stayed on hold for too many cycles.
    HoldRetriesExhausted,
    /// The candidate correlates too strongly with an active strategy.
    CorrelationViolation,
    /// The portfolio is full and no active strategy scores lower.
    CapacityNoWeaker,
    /// Retired to make room for a stronger candidate.
    Outperformed,
    /// A store write kept failing after all retries.
    PersistenceFailure,
    /// Retired by an operator.
    OperatorRetired,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::BacktestFailed => "backtest_failed",
            ReasonCode::DataGap => "data_gap",
            ReasonCode::BacktestTimeout => "backtest_timeout",
            ReasonCode::InsufficientData => "insufficient_data",
            ReasonCode::ThresholdNotMet => "threshold_not_met",
            ReasonCode::HoldRetriesExhausted => "hold_retries_exhausted",
            ReasonCode::CorrelationViolation => "correlation_violation",
            ReasonCode::CapacityNoWeaker => "capacity_no_weaker",
            ReasonCode::Outperformed => "outperformed",
            ReasonCode::PersistenceFailure => "persistence_failure",
            ReasonCode::OperatorRetired => "operator_retired",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
