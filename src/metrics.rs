// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prometheus Metrics for the Chat Relay

use prometheus::{IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Chat server metrics.
#[derive(Clone)]
pub struct ChatMetrics {
    /// Registry for all metrics.
    pub registry: Arc<Registry>,

    // Connection metrics
    /// Total WebSocket sessions accepted.
    pub connections_total: IntCounter,
    /// Sessions currently open.
    pub connections_active: IntGauge,
    /// Upgrade failures, upgrade timeouts and capacity rejections.
    pub connection_errors: IntCounter,
    /// Clients currently registered.
    pub users_online: IntGauge,

    // Fan-out metrics
    /// Chat messages broadcast.
    pub chats_broadcast: IntCounter,
    /// Frames handed to recipients.
    pub frames_delivered: IntCounter,
    /// Frames a recipient could not accept.
    pub delivery_failures: IntCounter,
    /// Registry entries removed after a failed delivery.
    pub peers_pruned: IntCounter,
    /// Inbound frames dropped because they did not decode.
    pub frames_malformed: IntCounter,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    IntCounter::with_opts(Opts::new(name, help))
}

fn gauge(name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    IntGauge::with_opts(Opts::new(name, help))
}

impl ChatMetrics {
    /// Creates a new metrics instance with everything registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let metrics = ChatMetrics {
            connections_total: counter(
                "chat_connections_total",
                "Total WebSocket sessions accepted",
            )?,
            connections_active: gauge("chat_connections_active", "Current open sessions")?,
            connection_errors: counter(
                "chat_connection_errors_total",
                "Upgrade failures, timeouts and capacity rejections",
            )?,
            users_online: gauge("chat_users_online", "Currently registered clients")?,
            chats_broadcast: counter("chat_messages_broadcast_total", "Chat messages broadcast")?,
            frames_delivered: counter(
                "chat_frames_delivered_total",
                "Frames handed to recipient queues",
            )?,
            delivery_failures: counter(
                "chat_delivery_failures_total",
                "Frames a recipient could not accept",
            )?,
            peers_pruned: counter(
                "chat_peers_pruned_total",
                "Registry entries removed after a failed delivery",
            )?,
            frames_malformed: counter(
                "chat_frames_malformed_total",
                "Inbound frames dropped as malformed",
            )?,
            registry: Arc::new(registry),
        };

        metrics.registry.register(Box::new(metrics.connections_total.clone()))?;
        metrics.registry.register(Box::new(metrics.connections_active.clone()))?;
        metrics.registry.register(Box::new(metrics.connection_errors.clone()))?;
        metrics.registry.register(Box::new(metrics.users_online.clone()))?;
        metrics.registry.register(Box::new(metrics.chats_broadcast.clone()))?;
        metrics.registry.register(Box::new(metrics.frames_delivered.clone()))?;
        metrics.registry.register(Box::new(metrics.delivery_failures.clone()))?;
        metrics.registry.register(Box::new(metrics.peers_pruned.clone()))?;
        metrics.registry.register(Box::new(metrics.frames_malformed.clone()))?;

        Ok(metrics)
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
