//! HTTP endpoint serving `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::cache::now_unix_seconds;
use crate::error::{ExportError, ServerError};
use crate::exporter::Exporter;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
struct AppState {
    exporter: Arc<Exporter>,
    /// Blocking scrapes keep running when their client disconnects.
    scrapes: TaskTracker,
}

pub fn router(exporter: Arc<Exporter>, scrapes: TaskTracker) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(AppState { exporter, scrapes })
}

/// Binds `addr` and serves until Ctrl-C or SIGTERM.
///
/// Returns only once every scrape started by the server has finished, so the
/// caller holds the last reference to `exporter` afterwards.
pub async fn serve(addr: SocketAddr, exporter: Arc<Exporter>) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::BindFailed(addr, e))?;

    info!("Serving metrics on http://{}/metrics", addr);

    let scrapes = TaskTracker::new();
    let result = axum::serve(listener, router(exporter, scrapes.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    drain(&scrapes).await;
    result?;

    info!("Metrics server stopped");
    Ok(())
}

async fn drain(scrapes: &TaskTracker) {
    scrapes.close();
    if !scrapes.is_empty() {
        info!("Waiting for {} in-flight scrapes", scrapes.len());
    }
    scrapes.wait().await;
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    debug!("Processing /metrics request");
    let now = now_unix_seconds();
    let exporter = state.exporter;

    // Device queries block, keep them off the async workers.
    let result = state
        .scrapes
        .spawn_blocking(move || exporter.scrape(now))
        .await
        .unwrap_or_else(|e| Err(ExportError::Task(e.to_string())));

    match result {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e @ ExportError::Scrape(_)) => {
            warn!("Scrape failed with no snapshot to serve: {}", e);
            e.into_response()
        }
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            e.into_response()
        }
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
