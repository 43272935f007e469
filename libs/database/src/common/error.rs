/// Errors raised while talking to the document store
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// The handshake ping did not succeed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Configuration error: {0}")]
    Config(#[from] core_config::ConfigError),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
