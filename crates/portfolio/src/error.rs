use core_types::{SpecId, StrategyState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("State store error: {0}")]
    Store(#[from] database::DbError),

    #[error("Invalid lifecycle operation: {0}")]
    Lifecycle(#[from] core_types::CoreError),

    #[error("Strategy {0} is not active")]
    NotActive(SpecId),

    #[error("Strategy {id} must be PORTFOLIO_PENDING to be admitted, found {state}")]
    NotPending { id: SpecId, state: StrategyState },
}
