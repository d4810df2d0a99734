// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Relay Server
//!
//! A real-time group chat broadcaster. Provides:
//! - WebSocket endpoint where every chat is fanned out to all connected users
//! - Join/leave announcements and a live roster
//! - HTTP endpoints for status and Prometheus metrics

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::connection_registry::ConnectionRegistry;
use chat_relay::http::{self, HttpState};
use chat_relay::metrics::ChatMetrics;
use chat_relay::{ChatConfig, ChatServer, Dispatcher, ServerError};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let config = ChatConfig::from_env();

    if let Err(e) = run(config).await {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: ChatConfig) -> Result<(), ServerError> {
    info!("Starting chat relay");
    info!("Chat: {}", config.listen_addr());
    info!("Status: {}", config.status_addr());
    info!("Max connections: {}", config.max_connections);
    info!("Outbound buffer: {} frames", config.outbound_buffer);

    let metrics = ChatMetrics::new()?;
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, metrics.clone()));

    let server = ChatServer::bind(&config, Arc::clone(&dispatcher), metrics.clone()).await?;
    let status_listener = http::bind(config.status_addr()).await?;

    let http_state = HttpState {
        dispatcher,
        metrics,
    };
    tokio::spawn(async move {
        if let Err(e) = http::serve(status_listener, http_state).await {
            error!("HTTP status server stopped: {}", e);
        }
    });

    info!("Chat server listening on {}", server.local_addr()?);
    server.run().await;
    Ok(())
}
