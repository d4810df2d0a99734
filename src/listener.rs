// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Listener
//!
//! Accepts TCP connections forever and runs each one as its own task. The
//! upgrade request path picks the dialect: [`EVENTS_PATH`] for named events,
//! anything else for the raw identity-then-JSON protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::connection_limit::{SessionLimiter, SessionSlot};
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::events::{handle_event_connection, EVENTS_PATH};
use crate::metrics::ChatMetrics;
use crate::session::{handle_connection, SessionDeps};

/// Pause after a failed accept so a persistent OS error cannot spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Bound chat listener.
pub struct ChatServer {
    listener: TcpListener,
    deps: SessionDeps,
    limiter: SessionLimiter,
    handshake_timeout: Duration,
}

impl ChatServer {
    /// Binds the chat port on all interfaces.
    pub async fn bind(
        config: &ChatConfig,
        dispatcher: Arc<Dispatcher>,
        metrics: ChatMetrics,
    ) -> Result<Self, ServerError> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(ChatServer {
            listener,
            deps: SessionDeps {
                dispatcher,
                metrics,
                outbound_buffer: config.outbound_buffer,
                write_timeout: config.write_timeout(),
            },
            limiter: SessionLimiter::new(config.max_connections),
            handshake_timeout: config.handshake_timeout(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Accepts connections until the process exits.
    pub async fn run(self) {
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let Some(slot) = self.limiter.try_acquire() else {
                warn!(
                    "Connection from {} rejected: at max capacity ({}/{})",
                    peer_addr,
                    self.limiter.active_count(),
                    self.limiter.max_sessions()
                );
                self.deps.metrics.connection_errors.inc();
                drop(stream);
                continue;
            };

            tokio::spawn(serve_connection(
                stream,
                peer_addr,
                slot,
                self.deps.clone(),
                self.handshake_timeout,
            ));
        }
    }
}

/// Upgrades one connection and runs its session.
async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    _slot: SessionSlot,
    deps: SessionDeps,
    handshake_timeout: Duration,
) {
    let mut path = String::from("/");
    let upgrade = accept_hdr_async(
        stream,
        |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            Ok(response)
        },
    );
    let upgraded = timeout(handshake_timeout, upgrade).await;

    let ws_stream = match upgraded {
        Ok(Ok(ws_stream)) => ws_stream,
        Ok(Err(e)) => {
            warn!("WebSocket handshake with {} failed: {}", peer_addr, e);
            deps.metrics.connection_errors.inc();
            return;
        }
        Err(_) => {
            warn!("WebSocket handshake with {} timed out", peer_addr);
            deps.metrics.connection_errors.inc();
            return;
        }
    };

    let metrics = deps.metrics.clone();
    metrics.connections_total.inc();
    metrics.connections_active.inc();

    if path == EVENTS_PATH {
        debug!("New event connection from {}", peer_addr);
        handle_event_connection(ws_stream, peer_addr, deps).await;
    } else {
        debug!("New chat connection from {}", peer_addr);
        handle_connection(ws_stream, peer_addr, deps).await;
    }

    metrics.connections_active.dec();
    info!("Connection from {} closed", peer_addr);
}
