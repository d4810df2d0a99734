// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Common test utilities for chat integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use chat_relay::connection_registry::ConnectionRegistry;
use chat_relay::metrics::ChatMetrics;
use chat_relay::{ChatConfig, ChatServer, Dispatcher};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running server on an ephemeral port.
#[allow(dead_code)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: ChatMetrics,
}

/// Starts a chat server with default settings on an ephemeral port.
#[allow(dead_code)]
pub async fn start_server() -> TestServer {
    start_server_with(ChatConfig::default()).await
}

/// Starts a chat server with `config`; its port is replaced by an ephemeral one.
#[allow(dead_code)]
pub async fn start_server_with(mut config: ChatConfig) -> TestServer {
    config.port = 0;
    config.handshake_timeout_secs = 2;

    let metrics = ChatMetrics::new().unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(registry, metrics.clone()));
    let server = ChatServer::bind(&config, Arc::clone(&dispatcher), metrics.clone())
        .await
        .unwrap();
    let port = server.local_addr().unwrap().port();
    tokio::spawn(server.run());

    TestServer {
        addr: SocketAddr::from(([127, 0, 0, 1], port)),
        dispatcher,
        metrics,
    }
}

/// Opens a WebSocket connection on `path`.
#[allow(dead_code)]
pub async fn connect(addr: SocketAddr, path: &str) -> Client {
    let url = format!("ws://{}{}", addr, path);
    let (ws, _) = connect_async(url).await.expect("Failed to connect");
    ws
}

/// Connects on the raw dialect and sends `identity` as the handshake.
#[allow(dead_code)]
pub async fn join(addr: SocketAddr, identity: &str) -> Client {
    let mut ws = connect(addr, "/").await;
    ws.send(Message::Text(identity.to_string())).await.unwrap();
    ws
}

/// Sends a JSON value as a text frame.
#[allow(dead_code)]
pub async fn send_json(ws: &mut Client, value: &Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Receives the next text frame as JSON, skipping control frames.
#[allow(dead_code)]
pub async fn recv_json(ws: &mut Client) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(_) => panic!("Connection closed while waiting for message"),
            _ => continue,
        }
    }
}

/// Receives a text frame if one arrives shortly. Returns None otherwise.
#[allow(dead_code)]
pub async fn try_recv_json(ws: &mut Client) -> Option<Value> {
    loop {
        match timeout(Duration::from_millis(200), ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return serde_json::from_str(&text).ok(),
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => {
                return None
            }
            Ok(Some(Ok(_))) => continue,
        }
    }
}

/// Reads until the server closes the connection. Returns the text frames seen
/// on the way.
#[allow(dead_code)]
pub async fn drain_until_closed(ws: &mut Client) -> Vec<Value> {
    let mut seen = Vec::new();
    loop {
        let next = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("Timeout waiting for close");
        match next {
            Some(Ok(Message::Text(text))) => {
                if let Ok(value) = serde_json::from_str(&text) {
                    seen.push(value);
                }
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return seen,
            Some(Ok(_)) => continue,
        }
    }
}

/// Waits until `check` holds, polling briefly.
#[allow(dead_code)]
pub async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Condition not reached in time");
}
