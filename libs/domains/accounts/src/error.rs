use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Notification '{event}' failed: {details}")]
    Dispatch { event: String, details: String },

    #[error("Invalid plan catalog: {0}")]
    PlanCatalog(String),

    #[error("Account document '{0}' has no _id")]
    MissingId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AccountError {
    pub fn dispatch(event: &str, details: impl ToString) -> Self {
        AccountError::Dispatch {
            event: event.to_string(),
            details: details.to_string(),
        }
    }
}

pub type AccountResult<T> = Result<T, AccountError>;
