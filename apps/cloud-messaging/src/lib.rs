//! Account lifecycle notifications and broker relay service.
//!
//! One process runs three things side by side:
//! - the account checker, on a cron schedule;
//! - the queue relay, consuming the ingest topics;
//! - the HTTP server with the live observer socket.

pub mod config;
pub mod scheduler;
pub mod server;
pub mod ws;

use core_config::tracing::{init_tracing, install_color_eyre};
use database::{mongodb::Database, retry_with_backoff, RetryConfig};
use domain_accounts::{
    AccountChecker, AccountStatusRepository, ConversionDispatcher, InMemoryAccountStatusRepository,
    MongoAccountStatusRepository, NotificationDispatcher, PlanCatalog,
};
use domain_ingest::{
    ConversationEngageHandler, ConversationIncrementHandler, EmailRequestHandler,
    InMemoryIngestRepository, IngestRepository, LogHandler, MongoIngestRepository, ReceiptHandler,
};
use eyre::WrapErr;
use queue_relay::{AmqpConnector, ObserverHub, QueueMetrics, QueueRelay, RelayResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use config::{Config, TopicConfig};
use server::AppState;

const STARTUP_RETRIES: u32 = 2;
const STARTUP_RETRY_DELAY: Duration = Duration::from_secs(20);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Document stores backing one process
struct Stores<A, I> {
    accounts: Arc<A>,
    ingest: Arc<I>,
    db: Option<Database>,
}

pub async fn run() -> eyre::Result<()> {
    // Report hooks go first so configuration errors are rendered too
    install_color_eyre();

    let config = Config::from_env()?;
    init_tracing(&config.environment);
    observability::init_metrics().wrap_err("failed to install metrics recorder")?;

    let plans = PlanCatalog::from_path(&config.checker.plans_path).wrap_err_with(|| {
        format!(
            "failed to load account plans from {}",
            config.checker.plans_path.display()
        )
    })?;
    info!(plans = plans.plans().len(), "Account plans loaded");

    let dispatcher = Arc::new(ConversionDispatcher::new(config.conversion.clone())?);

    let metrics = Arc::new(QueueMetrics::new());
    let observers = Arc::new(ObserverHub::new(config.relay.observer_buffer));
    let relay = if config.environment.is_test() {
        info!("Test mode, broker disabled");
        QueueRelay::detached(metrics, observers)
    } else {
        QueueRelay::new(
            Arc::new(AmqpConnector::new(&config.relay)),
            metrics,
            observers,
        )
        .with_reconnect(config.relay.reconnect_policy())
    };

    match config.mongo.clone() {
        Some(mongo) => {
            info!(database = %mongo.database, "Connecting to MongoDB");
            let db = database::mongodb::connect_database(
                &mongo,
                RetryConfig::fixed(STARTUP_RETRIES, STARTUP_RETRY_DELAY),
            )
            .await
            .wrap_err("MongoDB connection failed")?;

            let stores = Stores {
                accounts: Arc::new(MongoAccountStatusRepository::new(&db)),
                ingest: Arc::new(MongoIngestRepository::new(&db)),
                db: Some(db),
            };
            start(config, relay, stores, dispatcher, plans).await
        }
        None => {
            warn!("No MongoDB configured, running on in-memory stores");
            let stores = Stores {
                accounts: Arc::new(InMemoryAccountStatusRepository::new()),
                ingest: Arc::new(InMemoryIngestRepository::new()),
                db: None,
            };
            start(config, relay, stores, dispatcher, plans).await
        }
    }
}

async fn start<A, I, D>(
    config: Config,
    relay: QueueRelay,
    stores: Stores<A, I>,
    dispatcher: Arc<D>,
    plans: PlanCatalog,
) -> eyre::Result<()>
where
    A: AccountStatusRepository + 'static,
    I: IngestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    register_handlers(&relay, &config.topics, stores.ingest, dispatcher.clone()).await?;

    retry_with_backoff(
        || relay.connect(),
        RetryConfig::fixed(STARTUP_RETRIES, STARTUP_RETRY_DELAY),
    )
    .await
    .wrap_err("broker connection failed")?;

    let checker = Arc::new(AccountChecker::new(
        stores.accounts,
        dispatcher,
        Arc::new(plans),
    ));
    let mut sched = scheduler::start_account_checker(
        checker,
        &config.checker.cron,
        config.checker.timezone,
        config.checker.dump_path.clone(),
    )
    .await?;

    let state = AppState {
        environment: config.environment,
        relay: relay.clone(),
        db: stores.db,
        dump_path: Arc::new(config.checker.dump_path.clone()),
    };

    let cleanup = async move {
        if let Err(e) = sched.shutdown().await {
            error!(error = %e, "Failed to stop the account checker");
        }
        if let Err(e) = relay.disconnect().await {
            error!(error = %e, "Failed to disconnect the relay");
        }
    };

    server::serve(
        server::router(state),
        &config.server.address(),
        server::shutdown_signal(),
        cleanup,
        CLEANUP_TIMEOUT,
    )
    .await
}

/// Subscribe the ingest handlers to their topics. Before `connect` the
/// subscriptions are only queued.
pub async fn register_handlers<I, D>(
    relay: &QueueRelay,
    topics: &TopicConfig,
    ingest: Arc<I>,
    dispatcher: Arc<D>,
) -> RelayResult<()>
where
    I: IngestRepository + 'static,
    D: NotificationDispatcher + 'static,
{
    relay
        .listen_queue_topic(&topics.logs, Arc::new(LogHandler::new(ingest.clone())))
        .await?;
    relay
        .listen_queue_topic(&topics.receipts, Arc::new(ReceiptHandler::new(ingest.clone())))
        .await?;
    relay
        .listen_queue_topic(
            &topics.conversation_engage,
            Arc::new(ConversationEngageHandler::new(ingest.clone())),
        )
        .await?;
    relay
        .listen_queue_topic(
            &topics.conversation_increment,
            Arc::new(ConversationIncrementHandler::new(ingest)),
        )
        .await?;
    relay
        .listen_queue_topic(&topics.emails, Arc::new(EmailRequestHandler::new(dispatcher)))
        .await?;

    info!(
        logs = %topics.logs,
        receipts = %topics.receipts,
        engage = %topics.conversation_engage,
        increment = %topics.conversation_increment,
        emails = %topics.emails,
        "Ingest handlers registered"
    );
    Ok(())
}
