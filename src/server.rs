//! # HTTP Server
//!
//! Serves `/metrics` on the metrics address and `/healthz` plus `/readyz` on the
//! health address. When both addresses are equal a single listener serves all three.

use crate::config::ServerConfig;
use crate::observability::metrics;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared flags read by the health handlers
#[derive(Debug, Default)]
pub struct ServerState {
    /// Set once every listener is bound
    pub is_listening: AtomicBool,
    /// Set once both controllers are running
    pub is_ready: AtomicBool,
}

impl ServerState {
    pub fn mark_ready(&self) {
        self.is_ready.store(true, Ordering::Relaxed);
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match metrics::gather_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

fn health_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Bind the listeners and serve until the process exits
#[allow(
    clippy::missing_errors_doc,
    reason = "Fails when an address cannot be bound or a listener dies"
)]
pub async fn start_server(config: ServerConfig, state: Arc<ServerState>) -> Result<()> {
    if config.is_shared() {
        let app = metrics_router()
            .merge(health_router(Arc::clone(&state)))
            .layer(TraceLayer::new_for_http());
        let listener = TcpListener::bind(config.metrics_addr)
            .await
            .with_context(|| format!("failed to bind {}", config.metrics_addr))?;
        state.is_listening.store(true, Ordering::Relaxed);
        info!(addr = %config.metrics_addr, "📊 serving metrics and health checks");
        axum::serve(listener, app).await?;
        return Ok(());
    }

    let metrics_listener = TcpListener::bind(config.metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics address {}", config.metrics_addr))?;
    let health_listener = TcpListener::bind(config.health_addr)
        .await
        .with_context(|| format!("failed to bind health address {}", config.health_addr))?;
    state.is_listening.store(true, Ordering::Relaxed);
    info!(
        metrics = %config.metrics_addr,
        health = %config.health_addr,
        "📊 serving metrics and health checks"
    );

    let metrics_app = metrics_router().layer(TraceLayer::new_for_http());
    let health_app = health_router(state);
    tokio::try_join!(
        axum::serve(metrics_listener, metrics_app),
        axum::serve(health_listener, health_app),
    )?;
    Ok(())
}
