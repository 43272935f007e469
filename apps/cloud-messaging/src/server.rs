//! HTTP surface: health, queue status, checker run dump, metrics and the
//! observer socket.

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use database::mongodb::{check_health, Database, HealthStatus};
use queue_relay::QueueRelay;
use serde::Serialize;
use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::Environment;
use crate::ws::ws_handler;

/// Shared handler state, cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub environment: Environment,
    pub relay: QueueRelay,
    /// Absent when running on in-memory stores
    pub db: Option<Database>,
    pub dump_path: Arc<PathBuf>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    relay_connected: bool,
    observers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<HealthStatus>,
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let database = match &state.db {
        Some(db) => Some(check_health(db).await),
        None => None,
    };
    let healthy = database.as_ref().is_none_or(|d| d.healthy);

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        environment: format!("{:?}", state.environment).to_lowercase(),
        relay_connected: state.relay.is_connected().await,
        observers: state.relay.observers().len(),
        database,
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response)).into_response()
}

async fn queue_status_handler(State(state): State<AppState>) -> Response {
    Json(state.relay.get_queue_status()).into_response()
}

/// Raw run dump, one JSON line per checker tick.
async fn logs_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read_to_string(state.dump_path.as_path()).await {
        Ok(dump) => (
            StatusCode::OK,
            [("content-type", "application/x-ndjson")],
            dump,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "no account checker runs recorded").into_response()
        }
        Err(e) => {
            error!(path = %state.dump_path.display(), error = %e, "failed to read run dump");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to read run dump").into_response()
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/queueStatus", get(queue_status_handler))
        .route("/logs", get(logs_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .route("/metrics", get(observability::metrics_handler))
        .layer(middleware::from_fn(observability::metrics_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Resolves on Ctrl+C or SIGTERM. A signal that cannot be installed is
/// logged and never fires.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully");
        },
    }
}

/// Serve `app` until `signal` resolves, then run `cleanup` with a deadline
/// while the server drains.
pub async fn serve<S, C>(
    app: Router,
    address: &str,
    signal: S,
    cleanup: C,
    cleanup_timeout: Duration,
) -> eyre::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
    C: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            if tokio::time::timeout(cleanup_timeout, cleanup).await.is_err() {
                warn!(timeout = ?cleanup_timeout, "cleanup timed out, shutting down anyway");
            } else {
                info!("Cleanup finished");
            }
        })
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use queue_relay::{ObserverHub, QueueMetrics, QueueMessage, ReferenceObject};
    use tower::ServiceExt;

    fn state(dump_path: PathBuf) -> AppState {
        AppState {
            environment: Environment::Test,
            relay: QueueRelay::detached(Arc::new(QueueMetrics::new()), Arc::new(ObserverHub::new(8))),
            db: None,
            dump_path: Arc::new(dump_path),
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_without_database() {
        let state = state(PathBuf::from("missing.log"));
        state.relay.connect().await.unwrap();

        let (status, body) = get(router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["environment"], "test");
        assert_eq!(body["relay_connected"], true);
        assert!(body.get("database").is_none());
    }

    #[tokio::test]
    async fn test_queue_status_reports_acks() {
        let state = state(PathBuf::from("missing.log"));
        let message = QueueMessage::new("receipts", 7, b"{}".to_vec());
        state
            .relay
            .ack_queue_message(&message, Some(&ReferenceObject::new("receipt", "abc")))
            .await
            .unwrap();

        let (status, body) = get(router(state), "/queueStatus").await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["messagesByTopic"]["receipt"], 1);
        assert_eq!(body["messagesByTopic"]["log"], 0);
    }

    #[tokio::test]
    async fn test_logs_serves_the_run_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.log");

        let (status, _) = get(router(state(path.clone())), "/logs").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        tokio::fs::write(&path, "{\"results\":[]}\n").await.unwrap();
        let (status, body) = get(router(state(path)), "/logs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{\"results\":[]}\n");
    }

    #[tokio::test]
    async fn test_metrics_route_is_mounted() {
        let (status, _) = get(router(state(PathBuf::from("missing.log"))), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }
}
