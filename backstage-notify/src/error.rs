use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),
    #[error("No active device tokens found for the given targets")]
    NoTargets,
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
