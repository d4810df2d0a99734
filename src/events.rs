// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Event Dialect Session
//!
//! Clients on `/events` exchange named JSON events instead of a bare identity
//! handshake. A session stays unregistered until a `join` with a non-empty
//! username; on join it receives the full chat history before anyone else
//! hears about it.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use crate::connection_registry::ConnectionHandle;
use crate::dispatcher::Registration;
use crate::envelope::{connected_frame, ChatPayload, ClientEvent, Dialect};
use crate::session::{close_transport, next_step, session_label, SessionDeps, Step};

/// Upgrade path that selects the event dialect.
pub const EVENTS_PATH: &str = "/events";

/// Runs one event-dialect session to completion.
pub async fn handle_event_connection<S>(
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

    let greeting = timeout(write_timeout, write.send(Message::Text(connected_frame()))).await;
    if !matches!(greeting, Ok(Ok(()))) {
        debug!("[{}] Failed to greet {}", session, peer_addr);
        return;
    }

    // The handle moves into the registry on join; until then the queue stays
    // open and silent.
    let (handle, mut outbound) = ConnectionHandle::channel(Dialect::Events, outbound_buffer);
    let mut pending = Some(handle);
    let mut registration: Option<Registration> = None;

    loop {
        let step = next_step(&session, &mut read, &mut write, &mut outbound, write_timeout).await;
        let text = match step {
            Step::Inbound(Message::Text(text)) => text,
            Step::Inbound(_) | Step::Flushed => continue,
            Step::Disconnected | Step::Evicted => break,
        };

        let Some(event) = ClientEvent::decode(&text) else {
            debug!("[{}] Dropped malformed event ({} bytes)", session, text.len());
            metrics.frames_malformed.inc();
            continue;
        };

        match event {
            ClientEvent::Join { username } => {
                if username.is_empty() {
                    debug!("[{}] Ignored join without username", session);
                    continue;
                }
                let Some(handle) = pending.take() else {
                    debug!("[{}] Ignored repeated join", session);
                    continue;
                };
                let joined = dispatcher.join(&username, handle, peer_addr, true);
                info!(
                    "[{}] '{}' joined from {} as {}",
                    session,
                    username,
                    peer_addr,
                    joined.connection()
                );
                dispatcher.announce_join(&username);
                registration = Some(joined);
            }
            ClientEvent::SendMessage { message } => {
                let Some(joined) = registration.as_ref() else {
                    debug!("[{}] Ignored message before join", session);
                    continue;
                };
                if message.is_empty() {
                    continue;
                }
                dispatcher.broadcast_chat(joined.identity(), ChatPayload::from_text(message));
            }
            ClientEvent::Disconnect => break,
            ClientEvent::Unknown(name) => {
                debug!("[{}] Ignored unknown event '{}'", session, name);
            }
        }
    }

    drop(registration);
    close_transport(&mut write, write_timeout).await;
}
