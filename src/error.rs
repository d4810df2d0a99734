// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Server Errors
//!
//! Only process-level failures are errors here. Everything that can go wrong
//! inside one client session is handled and logged inside that session.

use std::net::SocketAddr;

use thiserror::Error;

/// Fatal server error.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not acquire its address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The bound socket could not report its local address.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),

    /// The HTTP status server stopped with an error.
    #[error("status server failed: {0}")]
    Http(#[source] std::io::Error),

    /// Metric registration failed.
    #[error("metrics setup failed: {0}")]
    Metrics(#[from] prometheus::Error),
}
