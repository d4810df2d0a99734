// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Registry
//!
//! The single source of truth for who is online. Maps each identity to the
//! outbound queue of the session that registered it.
//!
//! Every operation, including fan-out iteration, runs under one mutex. Frames
//! are handed to sessions through bounded queues with a non-blocking
//! `try_send`, so holding the lock for a whole fan-out never waits on a
//! socket, and no two broadcasts can interleave for any recipient.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::envelope::Dialect;

/// Identifies one accepted connection, independent of the name it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0.simple().to_string();
        f.write_str(&id[..8])
    }
}

/// Why a frame could not be handed to a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The recipient is not draining its socket.
    #[error("outbound queue full")]
    Full,
    /// The recipient's session has ended.
    #[error("outbound queue closed")]
    Closed,
}

/// Write side of one client connection.
///
/// The session keeps the matching receiver and forwards queued frames to
/// its socket. Dropping the handle closes the queue, which ends the session.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    dialect: Dialect,
    tx: mpsc::Sender<Arc<str>>,
}

impl ConnectionHandle {
    /// Creates a handle with a queue of `capacity` frames.
    pub fn channel(dialect: Dialect, capacity: usize) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = ConnectionHandle {
            id: ConnectionId::new(),
            dialect,
            tx,
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Queues a frame without waiting.
    pub fn try_deliver(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// One online client.
#[derive(Debug)]
pub struct RegistryEntry {
    pub identity: String,
    pub handle: ConnectionHandle,
    pub peer_addr: SocketAddr,
    joined: u64,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<String, RegistryEntry>,
    next_join: u64,
}

/// Thread-safe registry of online clients, keyed by identity.
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        ConnectionRegistry {
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a client under `identity`.
    ///
    /// An earlier entry with the same identity is replaced and returned;
    /// dropping it closes that connection's queue.
    pub fn register(
        &self,
        identity: &str,
        handle: ConnectionHandle,
        peer_addr: SocketAddr,
    ) -> Option<RegistryEntry> {
        let mut state = self.lock();
        let joined = state.next_join;
        state.next_join += 1;
        state.entries.insert(
            identity.to_string(),
            RegistryEntry {
                identity: identity.to_string(),
                handle,
                peer_addr,
                joined,
            },
        )
    }

    /// Removes and returns the entry for `identity`, if present.
    pub fn deregister(&self, identity: &str) -> Option<RegistryEntry> {
        self.lock().entries.remove(identity)
    }

    /// Removes the entry for `identity` only if it belongs to `connection`.
    pub fn deregister_connection(
        &self,
        identity: &str,
        connection: ConnectionId,
    ) -> Option<RegistryEntry> {
        let mut state = self.lock();
        match state.entries.get(identity) {
            Some(entry) if entry.handle.id() == connection => state.entries.remove(identity),
            _ => None,
        }
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lock().entries.contains_key(identity)
    }

    /// Currently registered identities, in registration order.
    pub fn snapshot(&self) -> Vec<String> {
        let state = self.lock();
        let mut entries: Vec<&RegistryEntry> = state.entries.values().collect();
        entries.sort_by_key(|entry| entry.joined);
        let identities = entries.into_iter().map(|e| e.identity.clone()).collect();
        identities
    }

    /// Number of online clients.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `visit` once per entry while holding the lock.
    ///
    /// Entries for which `visit` returns `false` are pruned before the lock
    /// is released, and returned to the caller.
    pub fn for_each_entry<F>(&self, mut visit: F) -> Vec<RegistryEntry>
    where
        F: FnMut(&RegistryEntry) -> bool,
    {
        self.for_each_entry_with_roster(|_| (), |_, entry| visit(entry))
    }

    /// Like [`for_each_entry`](Self::for_each_entry), but first hands the
    /// ordered roster to `prepare` under the same lock. Whatever `prepare`
    /// builds is passed to every `visit`, so a frame carrying the roster
    /// matches the recipients it is delivered to.
    pub fn for_each_entry_with_roster<P, T, F>(
        &self,
        prepare: P,
        mut visit: F,
    ) -> Vec<RegistryEntry>
    where
        P: FnOnce(&[String]) -> T,
        F: FnMut(&T, &RegistryEntry) -> bool,
    {
        let mut state = self.lock();
        let mut ordered: Vec<&RegistryEntry> = state.entries.values().collect();
        ordered.sort_by_key(|entry| entry.joined);

        let roster: Vec<String> = ordered.iter().map(|entry| entry.identity.clone()).collect();
        let prepared = prepare(&roster);

        let failed: Vec<String> = ordered
            .into_iter()
            .filter(|entry| !visit(&prepared, *entry))
            .map(|entry| entry.identity.clone())
            .collect();

        let pruned = failed
            .iter()
            .filter_map(|identity| state.entries.remove(identity))
            .collect();
        pruned
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
