// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Raw Chat Session
//!
//! One client connection speaking the raw dialect:
//!
//! 1. The first text frame is the client's identity. Anything else closes the
//!    connection without registering or announcing.
//! 2. Each following text frame is a JSON chat object, broadcast with the
//!    identity as sender. Frames that do not decode are dropped.
//! 3. On disconnect, read error, or removal from the registry, the identity
//!    is deregistered and its departure announced.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::connection_registry::ConnectionHandle;
use crate::dispatcher::Dispatcher;
use crate::envelope::{ChatPayload, Dialect};
use crate::metrics::ChatMetrics;

/// Dependencies shared by every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: ChatMetrics,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
    /// Longest a single frame write or close may take.
    pub write_timeout: Duration,
}

/// Random label for log lines. Identities are logged only on join/leave.
pub(crate) fn session_label() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Outcome of waiting on the socket and the outbound queue at once.
pub(crate) enum Step {
    /// A frame arrived from the client.
    Inbound(Message),
    /// The client went away or the socket failed.
    Disconnected,
    /// The registry dropped this connection's queue.
    Evicted,
    /// A queued frame was written; keep going.
    Flushed,
}

/// Waits for the next client frame while forwarding queued frames.
///
/// A write that does not finish within `write_timeout` counts as a
/// disconnect, so a peer that stops reading still reaches teardown.
pub(crate) async fn next_step<S>(
    session: &str,
    read: &mut SplitStream<WebSocketStream<S>>,
    write: &mut SplitSink<WebSocketStream<S>, Message>,
    outbound: &mut mpsc::Receiver<Arc<str>>,
    write_timeout: Duration,
) -> Step
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tokio::select! {
        frame = read.next() => match frame {
            Some(Ok(Message::Close(_))) | None => {
                debug!("[{}] Disconnected", session);
                Step::Disconnected
            }
            Some(Ok(msg)) => Step::Inbound(msg),
            Some(Err(e)) => {
                debug!("[{}] Read error: {}", session, e);
                Step::Disconnected
            }
        },
        queued = outbound.recv() => match queued {
            Some(frame) => {
                match timeout(write_timeout, write.send(Message::Text(frame.to_string()))).await {
                    Ok(Ok(())) => Step::Flushed,
                    Ok(Err(e)) => {
                        debug!("[{}] Write error: {}", session, e);
                        Step::Disconnected
                    }
                    Err(_) => {
                        warn!("[{}] Write timed out", session);
                        Step::Disconnected
                    }
                }
            }
            None => {
                warn!("[{}] Removed from registry", session);
                Step::Evicted
            }
        },
    }
}

/// Closes the transport, giving up after `write_timeout`.
pub(crate) async fn close_transport<S>(
    write: &mut SplitSink<WebSocketStream<S>, Message>,
    write_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = timeout(write_timeout, write.close()).await;
}

/// Reads the identity from the first frame.
async fn read_identity<S>(read: &mut SplitStream<WebSocketStream<S>>) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match read.next().await {
        Some(Ok(Message::Text(text))) => {
            let identity = text.trim();
            (!identity.is_empty()).then(|| identity.to_string())
        }
        _ => None,
    }
}

/// Runs one raw-dialect session to completion.
pub async fn handle_connection<S>(
    ws_stream: WebSocketStream<S>,
    peer_addr: SocketAddr,
    deps: SessionDeps,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let SessionDeps {
        dispatcher,
        metrics,
        outbound_buffer,
        write_timeout,
    } = deps;
    let session = session_label();
    let (mut write, mut read) = ws_stream.split();

    let Some(identity) = read_identity(&mut read).await else {
        debug!("[{}] Empty or unreadable identity from {}", session, peer_addr);
        close_transport(&mut write, write_timeout).await;
        return;
    };

    let (handle, mut outbound) = ConnectionHandle::channel(Dialect::Raw, outbound_buffer);
    let registration = dispatcher.join(&identity, handle, peer_addr, false);
    info!(
        "[{}] '{}' joined from {} as {}",
        session,
        identity,
        peer_addr,
        registration.connection()
    );
    dispatcher.announce_join(&identity);

    loop {
        match next_step(&session, &mut read, &mut write, &mut outbound, write_timeout).await {
            Step::Inbound(Message::Text(text)) => match ChatPayload::decode(&text) {
                Some(payload) => {
                    dispatcher.broadcast_chat(registration.identity(), payload);
                }
                None => {
                    debug!("[{}] Dropped malformed frame ({} bytes)", session, text.len());
                    metrics.frames_malformed.inc();
                }
            },
            Step::Inbound(_) | Step::Flushed => continue,
            Step::Disconnected | Step::Evicted => break,
        }
    }

    drop(registration);
    close_transport(&mut write, write_timeout).await;
}
