use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyticsError {
    #[error("Backtest window of {got} days is shorter than the required {required} days")]
    WindowTooShort { got: i64, required: i64 },

    #[error("Backtest covers only {covered_start:?}..{covered_end:?} of the requested {start}..{end}")]
    PartialWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        covered_start: Option<DateTime<Utc>>,
        covered_end: Option<DateTime<Utc>>,
    },

    #[error("Calculation error: {0}")]
    Calculation(String),
}
