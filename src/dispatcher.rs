// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Broadcast Dispatcher
//!
//! Builds envelopes and fans them out to every registered connection.
//!
//! Delivery is best-effort and at most once per recipient. A recipient whose
//! queue is full or closed is pruned from the registry by the broadcast that
//! found it, and a roster update follows so the rest of the room sees the
//! change. Nothing is retried and nothing is reported back to the sender.
//!
//! Lock order is chat log first, then registry. Chat broadcasts hold the log
//! while they assign an id and fan out, so ids arrive in increasing order and
//! a joining client's history replay cannot miss or repeat a message.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::connection_registry::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryError,
};
use crate::envelope::{
    history_frame, server_timestamp, ChatPayload, Dialect, Envelope, HistoryEntry, PresenceChange,
};
use crate::metrics::ChatMetrics;

/// In-process chat history with its message counter.
#[derive(Debug)]
struct ChatLog {
    entries: Vec<HistoryEntry>,
    next_id: u64,
}

impl ChatLog {
    fn new() -> Self {
        ChatLog {
            entries: Vec::new(),
            next_id: 1,
        }
    }

    fn record(&mut self, username: &str, message: &str, timestamp: &str) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(HistoryEntry {
            id,
            username: username.to_string(),
            message: message.to_string(),
            timestamp: timestamp.to_string(),
        });
        id
    }
}

/// Fans envelopes out through the connection registry.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    log: Mutex<ChatLog>,
    metrics: ChatMetrics,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, metrics: ChatMetrics) -> Self {
        Dispatcher {
            registry,
            log: Mutex::new(ChatLog::new()),
            metrics,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    fn chat_log(&self) -> MutexGuard<'_, ChatLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of recorded chat messages.
    pub fn history_len(&self) -> usize {
        self.chat_log().entries.len()
    }

    /// Copy of the recorded chat messages, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.chat_log().entries.clone()
    }

    /// Broadcasts a chat message from `sender` with a server timestamp.
    ///
    /// A payload with `message` text is recorded and gets the next message
    /// id, which is returned.
    pub fn broadcast_chat(&self, sender: &str, payload: ChatPayload) -> Option<u64> {
        let timestamp = server_timestamp();
        let (id, pruned) = {
            let mut log = self.chat_log();
            let id = payload
                .text()
                .map(|text| log.record(sender, text, &timestamp));
            let envelope = Envelope::Chat {
                id,
                sender: sender.to_string(),
                payload,
                timestamp,
            };
            (id, self.fan_out(&envelope))
        };

        self.metrics.chats_broadcast.inc();
        self.refresh_roster_after(pruned);
        id
    }

    /// Broadcasts a system notice.
    pub fn broadcast_system(&self, text: &str) {
        let envelope = Envelope::System {
            text: text.to_string(),
            timestamp: server_timestamp(),
        };
        let pruned = self.fan_out(&envelope);
        self.refresh_roster_after(pruned);
    }

    /// Broadcasts the current roster.
    pub fn broadcast_roster(&self) {
        let pruned = self.fan_out_roster();
        self.refresh_roster_after(pruned);
    }

    /// Broadcasts a join or leave to event-dialect clients.
    pub fn broadcast_presence(&self, identity: &str, change: PresenceChange) {
        let timestamp = server_timestamp();
        let pruned = self.fan_out_with_roster(|roster| Envelope::Presence {
            identity: identity.to_string(),
            change,
            timestamp,
            users_online: roster.to_vec(),
        });
        self.refresh_roster_after(pruned);
    }

    /// Sends the chat log to one connection only.
    pub fn send_history(
        &self,
        to: &ConnectionHandle,
        history: &[HistoryEntry],
    ) -> Result<(), DeliveryError> {
        match history_frame(history) {
            Some(frame) => to.try_deliver(frame.into()),
            None => Ok(()),
        }
    }

    /// Registers a connection and returns the guard that tears it down.
    ///
    /// With `replay_history`, the chat log is queued to the new connection
    /// first, atomically with the registration.
    pub fn join(
        self: &Arc<Self>,
        identity: &str,
        handle: ConnectionHandle,
        peer_addr: SocketAddr,
        replay_history: bool,
    ) -> Registration {
        let connection = handle.id();
        let displaced = {
            let log = self.chat_log();
            if replay_history {
                if let Err(e) = self.send_history(&handle, &log.entries) {
                    debug!("[{}] History not queued: {}", connection, e);
                }
            }
            self.registry.register(identity, handle, peer_addr)
        };

        if let Some(old) = displaced {
            info!(
                "[{}] Identity '{}' taken over from connection {} ({})",
                connection,
                identity,
                old.handle.id(),
                old.peer_addr
            );
        }
        self.metrics.users_online.set(self.registry.len() as i64);

        Registration {
            dispatcher: Arc::clone(self),
            identity: identity.to_string(),
            connection,
        }
    }

    /// Announces a newly registered identity to everyone.
    pub fn announce_join(&self, identity: &str) {
        self.broadcast_system(&format!("{} joined", identity));
        self.broadcast_roster();
        self.broadcast_presence(identity, PresenceChange::Joined);
    }

    /// Announces a departed identity to everyone.
    pub fn announce_leave(&self, identity: &str) {
        self.broadcast_system(&format!("{} left", identity));
        self.broadcast_roster();
        self.broadcast_presence(identity, PresenceChange::Left);
    }

    /// Session teardown.
    ///
    /// Removes the entry if it still belongs to `connection`, then announces
    /// the departure unless the identity is online through another
    /// connection. Returns whether a departure was announced.
    pub fn depart(&self, identity: &str, connection: ConnectionId) -> bool {
        self.registry.deregister_connection(identity, connection);
        self.metrics.users_online.set(self.registry.len() as i64);

        if self.registry.contains(identity) {
            debug!(
                "[{}] '{}' is still online through another connection",
                connection, identity
            );
            return false;
        }

        info!("[{}] '{}' left", connection, identity);
        self.announce_leave(identity);
        true
    }

    fn fan_out_roster(&self) -> usize {
        self.fan_out_with_roster(|roster| Envelope::RosterUpdate {
            identities: roster.to_vec(),
        })
    }

    /// Rosters stay stale while a broadcast keeps pruning; each round removes
    /// at least one entry, so this terminates.
    fn refresh_roster_after(&self, mut pruned: usize) {
        while pruned > 0 {
            pruned = self.fan_out_roster();
        }
    }

    /// Delivers `envelope` to every registered connection and prunes the
    /// ones that fail. Returns the number pruned.
    fn fan_out(&self, envelope: &Envelope) -> usize {
        let frames = Frames::encode(envelope);
        self.deliver(move |_| frames)
    }

    /// Fan-out for envelopes that carry the roster. `build` runs under the
    /// registry lock, so the roster it sees is exactly the recipient set.
    fn fan_out_with_roster<B>(&self, build: B) -> usize
    where
        B: FnOnce(&[String]) -> Envelope,
    {
        self.deliver(|roster| Frames::encode(&build(roster)))
    }

    fn deliver<P>(&self, prepare: P) -> usize
    where
        P: FnOnce(&[String]) -> Frames,
    {
        let mut delivered = 0u64;

        let pruned = self.registry.for_each_entry_with_roster(
            prepare,
            |frames, entry| {
                let Some(frame) = frames.for_dialect(entry.handle.dialect()) else {
                    return true;
                };

                match entry.handle.try_deliver(Arc::clone(frame)) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(e) => {
                        debug!(
                            "[{}] Delivery to '{}' failed: {}",
                            entry.handle.id(),
                            entry.identity,
                            e
                        );
                        false
                    }
                }
            },
        );

        self.metrics.frames_delivered.inc_by(delivered);
        if pruned.is_empty() {
            return 0;
        }

        for entry in &pruned {
            warn!(
                "[{}] Pruned '{}' ({}) after failed delivery",
                entry.handle.id(),
                entry.identity,
                entry.peer_addr
            );
        }
        self.metrics.delivery_failures.inc_by(pruned.len() as u64);
        self.metrics.peers_pruned.inc_by(pruned.len() as u64);
        self.metrics.users_online.set(self.registry.len() as i64);
        pruned.len()
    }
}

/// One envelope encoded for each dialect.
struct Frames {
    raw: Option<Arc<str>>,
    events: Option<Arc<str>>,
}

impl Frames {
    fn encode(envelope: &Envelope) -> Self {
        Frames {
            raw: envelope.encode(Dialect::Raw).map(Into::into),
            events: envelope.encode(Dialect::Events).map(Into::into),
        }
    }

    fn for_dialect(&self, dialect: Dialect) -> Option<&Arc<str>> {
        match dialect {
            Dialect::Raw => self.raw.as_ref(),
            Dialect::Events => self.events.as_ref(),
        }
    }
}

/// Registration of one session.
///
/// Dropping it runs the session's teardown exactly once, whatever ended the
/// session.
pub struct Registration {
    dispatcher: Arc<Dispatcher>,
    identity: String,
    connection: ConnectionId,
}

impl Registration {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.dispatcher.depart(&self.identity, self.connection);
    }
}
