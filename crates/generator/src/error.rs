use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeneratorError {
    #[error("Search space is empty: {0}")]
    EmptySearchSpace(String),

    #[error("Invalid strategy spec: {0}")]
    Spec(#[from] core_types::CoreError),
}
