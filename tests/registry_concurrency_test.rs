// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Concurrency tests for the registry and dispatcher.
//!
//! Many threads join, chat and leave at once; the shared state must end up
//! consistent with what each thread did.

use std::net::SocketAddr;
use std::sync::{Arc, Barrier};
use std::thread;

use chat_relay::connection_registry::{ConnectionHandle, ConnectionRegistry};
use chat_relay::envelope::{ChatPayload, Dialect, PresenceChange};
use chat_relay::metrics::ChatMetrics;
use chat_relay::Dispatcher;

const THREADS: usize = 16;
const ROUNDS: usize = 50;

fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

#[test]
fn test_concurrent_register_and_deregister() {
    let registry = Arc::new(ConnectionRegistry::new());

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let mut receivers = Vec::new();
                for round in 0..ROUNDS {
                    let (handle, rx) = ConnectionHandle::channel(Dialect::Raw, 4);
                    receivers.push(rx);
                    registry.register(&format!("user-{}-{}", t, round), handle, peer());
                }
                // Odd threads leave again.
                if t % 2 == 1 {
                    for round in 0..ROUNDS {
                        assert!(registry
                            .deregister(&format!("user-{}-{}", t, round))
                            .is_some());
                    }
                }
                receivers
            })
        })
        .collect();

    let receivers: Vec<_> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.len(), (THREADS / 2) * ROUNDS);
    assert!(snapshot.iter().all(|identity| {
        let thread: usize = identity.split('-').nth(1).unwrap().parse().unwrap();
        thread % 2 == 0
    }));
    drop(receivers);
}

#[test]
fn test_concurrent_chats_get_unique_ids() {
    let metrics = ChatMetrics::new().unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), metrics));

    let (handle, mut rx) = ConnectionHandle::channel(Dialect::Events, THREADS * ROUNDS + 8);
    registry.register("listener", handle, peer());

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                (0..ROUNDS)
                    .filter_map(|round| {
                        dispatcher.broadcast_chat(
                            &format!("user-{}", t),
                            ChatPayload::from_text(format!("message {}", round)),
                        )
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut ids: Vec<u64> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();
    ids.sort_unstable();
    let expected: Vec<u64> = (1..=(THREADS * ROUNDS) as u64).collect();
    assert_eq!(ids, expected);

    // Frames reach the listener in id order.
    let mut last = 0;
    while let Ok(frame) = rx.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        let id = value["data"]["id"].as_u64().unwrap();
        assert!(id > last);
        last = id;
    }
    assert_eq!(last, (THREADS * ROUNDS) as u64);
    assert_eq!(dispatcher.history_len(), THREADS * ROUNDS);
}

#[test]
fn test_wedged_recipient_is_pruned_under_load() {
    let metrics = ChatMetrics::new().unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), metrics.clone()));

    let (healthy, _healthy_rx) = ConnectionHandle::channel(Dialect::Raw, THREADS * ROUNDS * 4);
    let (wedged, _wedged_rx) = ConnectionHandle::channel(Dialect::Raw, 1);
    registry.register("healthy", healthy, peer());
    registry.register("wedged", wedged, peer());

    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    dispatcher.broadcast_chat(&format!("user-{}", t), ChatPayload::from_text("x"));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(registry.snapshot(), vec!["healthy"]);
    assert_eq!(metrics.peers_pruned.get(), 1);
}

/// Races a leave (deregister, then announce) against an unrelated broadcast
/// and returns the last frame `watcher` received.
fn race_leave_against(
    dialect: Dialect,
    announce: impl Fn(&Dispatcher) + Send + Sync + 'static,
) -> serde_json::Value {
    let metrics = ChatMetrics::new().unwrap();
    let registry = Arc::new(ConnectionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), metrics));
    let announce = Arc::new(announce);

    let (watcher, mut rx) = ConnectionHandle::channel(dialect, 16);
    let (leaver, _leaver_rx) = ConnectionHandle::channel(dialect, 16);
    registry.register("watcher", watcher, peer());
    registry.register("x", leaver, peer());

    let barrier = Arc::new(Barrier::new(2));
    let leave = {
        let (dispatcher, barrier, announce) =
            (Arc::clone(&dispatcher), Arc::clone(&barrier), Arc::clone(&announce));
        thread::spawn(move || {
            barrier.wait();
            registry.deregister("x");
            (*announce)(dispatcher.as_ref());
        })
    };
    let other = {
        let (dispatcher, barrier) = (Arc::clone(&dispatcher), Arc::clone(&barrier));
        thread::spawn(move || {
            barrier.wait();
            (*announce)(dispatcher.as_ref());
        })
    };
    leave.join().unwrap();
    other.join().unwrap();

    let mut last = None;
    while let Ok(frame) = rx.try_recv() {
        last = Some(frame);
    }
    serde_json::from_str(&last.expect("watcher got no frame")).unwrap()
}

#[test]
fn test_final_roster_never_lists_departed_identity() {
    for _ in 0..2000 {
        let last = race_leave_against(Dialect::Raw, |d| d.broadcast_roster());
        assert_eq!(last["users"], serde_json::json!(["watcher"]));
    }
}

#[test]
fn test_final_presence_never_lists_departed_identity() {
    for _ in 0..2000 {
        let last = race_leave_against(Dialect::Events, |d| {
            d.broadcast_presence("x", PresenceChange::Left)
        });
        assert_eq!(last["data"]["users_online"], serde_json::json!(["watcher"]));
    }
}
