use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A ratio metric that may be unbounded or undefined.
///
/// The derived ordering is `InsufficientData < Finite(_) < PositiveInfinity`,
/// which is the ordering used when strategies are ranked against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    /// Not computable from the available data (e.g. zero trades).
    InsufficientData,
    Finite(Decimal),
    /// The denominator was zero with a positive numerator.
    PositiveInfinity,
}

impl MetricValue {
    pub fn is_insufficient(&self) -> bool {
        matches!(self, MetricValue::InsufficientData)
    }

    /// `true` if the value is at least `threshold`. Undefined values never pass.
    pub fn at_least(&self, threshold: Decimal) -> bool {
        match self {
            MetricValue::InsufficientData => false,
            MetricValue::Finite(v) => *v >= threshold,
            MetricValue::PositiveInfinity => true,
        }
    }

    pub fn as_finite(&self) -> Option<Decimal> {
        match self {
            MetricValue::Finite(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::InsufficientData => f.write_str("n/a"),
            MetricValue::Finite(v) => write!(f, "{:.3}", v),
            MetricValue::PositiveInfinity => f.write_str("inf"),
        }
    }
}

/// The loss suffered on one calendar day, as a fraction of the prior day's equity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLoss {
    pub date: NaiveDate,
    pub loss: Decimal,
}

/// Performance statistics derived from one `BacktestResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    // I. Profitability
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub net_profit: Decimal,
    pub profit_factor: MetricValue,
    /// Fraction of trades with positive P&L, `0` when there are no trades.
    pub win_rate: Decimal,

    // II. Risk
    /// Largest peak-to-trough decline as a fraction of the peak.
    pub max_drawdown: Decimal,
    pub sharpe_ratio: MetricValue,
    pub daily_losses: Vec<DailyLoss>,
    pub worst_daily_loss: Decimal,

    // III. Activity
    pub trades_per_day: Decimal,
    pub period_days: i64,
}
