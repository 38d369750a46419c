use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Database error occurred during backtest: {0}")]
    Database(#[from] database::DbError),

    #[error("Historical data for the requested range is missing.")]
    DataUnavailable,

    #[error("Historical data has {missing} missing bars, first gap after {after}")]
    DataGap { missing: usize, after: DateTime<Utc> },

    #[error("Invalid indicator parameters: {0}")]
    InvalidParameters(String),

    #[error("Numeric conversion failed: {0}")]
    Numeric(String),
}

impl From<ta::errors::TaError> for SimulationError {
    fn from(error: ta::errors::TaError) -> Self {
        SimulationError::InvalidParameters(format!("{:?}", error))
    }
}
