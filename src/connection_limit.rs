// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Session Limiting
//!
//! Caps the number of concurrently running sessions. The listener asks for a
//! slot before spawning a session; the session task holds the slot until it
//! finishes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out a bounded number of session slots.
#[derive(Clone)]
pub struct SessionLimiter {
    active: Arc<AtomicUsize>,
    max_sessions: usize,
}

impl SessionLimiter {
    pub fn new(max_sessions: usize) -> Self {
        SessionLimiter {
            active: Arc::new(AtomicUsize::new(0)),
            max_sessions,
        }
    }

    /// Takes a slot, or returns `None` at capacity.
    pub fn try_acquire(&self) -> Option<SessionSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_sessions).then_some(current + 1)
            })
            .ok()
            .map(|_| SessionSlot {
                active: Arc::clone(&self.active),
            })
    }

    /// Slots currently held.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}

/// A held slot; released on drop.
pub struct SessionSlot {
    active: Arc<AtomicUsize>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
