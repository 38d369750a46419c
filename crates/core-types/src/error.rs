use crate::enums::StrategyState;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Strategy must use between 1 and {max} indicators, got {got}")]
    IndicatorCount { got: usize, max: usize },

    #[error("Illegal state transition {from} -> {to}")]
    InvalidTransition { from: StrategyState, to: StrategyState },

    #[error("Failed to serialize strategy spec: {0}")]
    Serialization(#[from] serde_json::Error),
}
