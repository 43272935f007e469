use queue_relay::RelayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error(transparent)]
    Dispatch(#[from] domain_accounts::AccountError),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Failures inside a handler surface to the relay as handler errors; the
/// message stays unacknowledged.
impl From<IngestError> for RelayError {
    fn from(err: IngestError) -> Self {
        RelayError::handler(err.to_string())
    }
}
