// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod config;
pub mod connection_limit;
pub mod connection_registry;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod events;
pub mod http;
pub mod listener;
pub mod metrics;
pub mod session;

pub use config::ChatConfig;
pub use dispatcher::Dispatcher;
pub use error::ServerError;
pub use listener::ChatServer;
