use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

/// A closed round-trip trade, simulated or realized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: Decimal,
}

/// A half-open `[start, end)` historical window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BacktestWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window of `days` whole days ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Length in whole days, rounded down.
    pub fn days(&self) -> i64 {
        self.duration().num_days()
    }
}

/// The output of simulating a `StrategySpec` over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// The window that was requested.
    pub window: BacktestWindow,
    pub trades: Vec<TradeRecord>,
    /// Ordered `(timestamp, equity)` pairs.
    pub equity_curve: Vec<(DateTime<Utc>, Decimal)>,
}

impl BacktestResult {
    /// The span actually observed by the equity curve, if it has at least one point.
    pub fn covered_window(&self) -> Option<BacktestWindow> {
        let first = self.equity_curve.first()?.0;
        let last = self.equity_curve.last()?.0;
        Some(BacktestWindow::new(first, last))
    }
}
