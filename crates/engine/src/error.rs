use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("State store error: {0}")]
    Store(#[from] database::DbError),

    #[error("Candidate generation failed: {0}")]
    Generator(#[from] generator::GeneratorError),

    #[error("Portfolio error: {0}")]
    Portfolio(#[from] portfolio::PortfolioError),

    #[error("Invalid lifecycle operation: {0}")]
    Lifecycle(#[from] core_types::CoreError),

    #[error("Admission worker stopped unexpectedly: {0}")]
    AdmissionWorker(#[from] tokio::task::JoinError),
}
