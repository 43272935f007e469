//! Prometheus metrics for the messaging service.
//!
//! ```rust,ignore
//! use observability::{init_metrics, metrics_handler, CheckMetrics};
//!
//! init_metrics()?;
//! CheckMetrics::record_run("trial_ended", 3, elapsed);
//!
//! let app = Router::new().route("/metrics", get(metrics_handler));
//! ```

pub mod checks;
pub mod middleware;
pub mod relay;

pub use checks::CheckMetrics;
pub use middleware::metrics_middleware;
pub use relay::RelayMetrics;

pub use metrics::{counter, gauge, histogram};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::info;

static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global Prometheus recorder. Later calls return the same handle.
pub fn init_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    METRICS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe_metrics();
        info!("Prometheus metrics recorder initialized");
        Ok(handle)
    })
}

pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

/// Axum handler for `/metrics`
pub async fn metrics_handler() -> String {
    match get_metrics_handle() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!("http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    describe_counter!(
        "account_check_runs_total",
        "Account lifecycle check runs by task and outcome"
    );
    describe_counter!(
        "account_check_occurrences_total",
        "Accounts notified by each lifecycle check"
    );
    describe_histogram!(
        "account_check_duration_seconds",
        "Duration of a single lifecycle check"
    );

    describe_counter!(
        "queue_relay_messages_acked_total",
        "Broker messages acknowledged, by reference type"
    );
    describe_counter!(
        "queue_relay_messages_rejected_total",
        "Broker messages left unacknowledged by their handler"
    );
    describe_gauge!("queue_relay_observers", "Connected live observers");
}
