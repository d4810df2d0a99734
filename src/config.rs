// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat Server Configuration
//!
//! Configuration loaded from environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Chat server configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Port for WebSocket chat connections.
    pub port: u16,
    /// Port for the HTTP status endpoints.
    pub status_port: u16,
    /// Maximum concurrent sessions.
    pub max_connections: usize,
    /// Frames queued per client before it counts as a failed recipient.
    pub outbound_buffer: usize,
    /// Upper bound on the WebSocket upgrade, in seconds.
    pub handshake_timeout_secs: u64,
    /// Upper bound on writing one frame to a client, in seconds.
    pub write_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        ChatConfig {
            port: 5555,
            status_port: 10000,
            max_connections: 1000,
            outbound_buffer: 64,
            handshake_timeout_secs: 10,
            write_timeout_secs: 10,
        }
    }
}

impl ChatConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// Values that fail to parse keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(parsed) = lookup("PORT").and_then(|v| v.trim().parse().ok()) {
            config.port = parsed;
        }

        if let Some(parsed) = lookup("STATUS_PORT").and_then(|v| v.trim().parse().ok()) {
            config.status_port = parsed;
        }

        if let Some(parsed) = lookup("CHAT_MAX_CONNECTIONS").and_then(|v| v.trim().parse().ok()) {
            config.max_connections = parsed;
        }

        if let Some(parsed) = lookup("CHAT_OUTBOUND_BUFFER")
            .and_then(|v| v.trim().parse().ok())
            .filter(|&n: &usize| n > 0)
        {
            config.outbound_buffer = parsed;
        }

        if let Some(parsed) = lookup("CHAT_HANDSHAKE_TIMEOUT").and_then(|v| v.trim().parse().ok())
        {
            config.handshake_timeout_secs = parsed;
        }

        if let Some(parsed) = lookup("CHAT_WRITE_TIMEOUT")
            .and_then(|v| v.trim().parse().ok())
            .filter(|&secs: &u64| secs > 0)
        {
            config.write_timeout_secs = parsed;
        }

        config
    }

    /// Chat listener address. Always all interfaces.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.port)
    }

    /// Status listener address. Always all interfaces.
    pub fn status_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), self.status_port)
    }

    /// Returns the upgrade timeout as a Duration.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Returns the per-frame write timeout as a Duration.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}
