use mongodb::{Client, Database, options::ClientOptions};
use std::time::Duration;
use tracing::{info, instrument};

use super::MongoConfig;
use crate::common::{DatabaseError, DatabaseResult, RetryConfig, retry_with_backoff};

/// Build a client from `config` and verify it with a ping.
#[instrument(skip(config), fields(database = %config.database))]
pub async fn connect(config: &MongoConfig) -> DatabaseResult<Client> {
    let mut options = ClientOptions::parse(&config.url).await?;
    options.max_pool_size = Some(config.max_pool_size);
    options.min_pool_size = Some(config.min_pool_size);
    options.connect_timeout = Some(Duration::from_secs(config.connect_timeout_secs));
    options.server_selection_timeout =
        Some(Duration::from_secs(config.server_selection_timeout_secs));
    options.app_name = config.app_name.clone();

    let client = Client::with_options(options)?;

    client
        .database(&config.database)
        .run_command(mongodb::bson::doc! { "ping": 1 })
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    info!("connected to MongoDB");
    Ok(client)
}

/// `connect` wrapped in the given retry policy.
pub async fn connect_with_retry(
    config: &MongoConfig,
    retry: RetryConfig,
) -> DatabaseResult<Client> {
    retry_with_backoff(|| connect(config), retry).await
}

/// Connect with retry and hand back the configured database.
pub async fn connect_database(
    config: &MongoConfig,
    retry: RetryConfig,
) -> DatabaseResult<Database> {
    let client = connect_with_retry(config, retry).await?;
    Ok(client.database(&config.database))
}
