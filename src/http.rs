// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! HTTP Status Server
//!
//! Liveness, a status snapshot and Prometheus metrics, on their own port.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::metrics::ChatMetrics;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: ChatMetrics,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub status: &'static str,
    pub users_count: usize,
    pub messages_count: usize,
}

/// Creates the HTTP router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Binds the status port. A failure here is fatal like any other bind.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Serves the router on an already bound listener.
pub async fn serve(listener: TcpListener, state: HttpState) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP status server listening on {}", addr);
    }
    axum::serve(listener, create_router(state))
        .await
        .map_err(ServerError::Http)
}

async fn root_handler() -> &'static str {
    "Chat relay is running. Connect over WebSocket to chat."
}

async fn status_handler(State(state): State<HttpState>) -> Json<StatusReport> {
    Json(StatusReport {
        status: "online",
        users_count: state.dispatcher.registry().len(),
        messages_count: state.dispatcher.history_len(),
    })
}

async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    // Refresh gauges before encoding
    state
        .metrics
        .users_online
        .set(state.dispatcher.registry().len() as i64);

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}
