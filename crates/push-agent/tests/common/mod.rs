//! Scripted-server harness for agent integration tests.

#![allow(dead_code)]

use serde_json::Value;
use simplepush_agent::{ClientSettings, ConnectOptions, PushEvent, SimplePush};
use simplepush_core::{MemoryPersistence, Persistence, STORE_KEY};
use simplepush_protocol::{ClientMessage, ServerMessage};
use simplepush_transport::{MemoryListener, MemoryPeer, MemoryTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const URL: &str = "memory://push";
pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub push: SimplePush,
    pub listener: MemoryListener,
    pub persistence: Arc<dyn Persistence>,
    pub events: broadcast::Receiver<PushEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_persistence(Arc::new(MemoryPersistence::new()))
    }

    /// Start from a persisted store document.
    pub fn with_document(document: Value) -> Self {
        Self::with_persistence(Arc::new(MemoryPersistence::with_document(
            STORE_KEY,
            document.to_string(),
        )))
    }

    pub fn with_persistence(persistence: Arc<dyn Persistence>) -> Self {
        let (transport, listener) = MemoryTransport::pair();
        let push = SimplePush::new(
            ClientSettings::new("test", URL),
            Arc::clone(&persistence),
            Arc::new(transport),
        )
        .unwrap();
        let events = push.events();
        Self {
            push,
            listener,
            persistence,
            events,
        }
    }

    /// Connect with default options and return the server side.
    pub async fn connect(&mut self) -> MemoryPeer {
        self.push.connect(ConnectOptions::new()).await.unwrap();
        self.accept().await
    }

    pub async fn accept(&mut self) -> MemoryPeer {
        timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for connection")
            .expect("listener closed")
    }

    /// Connect, answer the hello with `uaid`, and wait for the handshake.
    ///
    /// Returns the peer and the client's hello.
    pub async fn handshake(&mut self, uaid: &str) -> (MemoryPeer, ClientMessage) {
        let mut peer = self.connect().await;
        let hello = recv(&mut peer).await;
        peer.send_message(&ServerMessage::hello(uaid)).unwrap();
        self.wait_for(|e| matches!(e, PushEvent::Connected { .. }))
            .await;
        (peer, hello)
    }

    /// Wait for the next event matching `predicate`, skipping others.
    pub async fn wait_for(&mut self, predicate: impl Fn(&PushEvent) -> bool) -> PushEvent {
        let events = &mut self.events;
        timeout(WAIT, async move {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Reply 200 to a register for `channel_id` and wait until it is stored.
    pub async fn register(&mut self, peer: &MemoryPeer, channel_id: &str, version: i64) {
        peer.send_message(&ServerMessage::register(200, channel_id, version))
            .unwrap();
        self.wait_for(|e| matches!(e, PushEvent::Registered(r) if r.channel_id == channel_id))
            .await;
    }

    /// The persisted store document.
    pub fn persisted(&self) -> Value {
        serde_json::from_slice(&self.persistence.read(STORE_KEY).unwrap().unwrap()).unwrap()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.push
            .channels()
            .into_iter()
            .map(|r| r.channel_id)
            .collect()
    }
}

/// Receive the next client message.
pub async fn recv(peer: &mut MemoryPeer) -> ClientMessage {
    timeout(WAIT, peer.recv_message())
        .await
        .expect("timed out waiting for client message")
        .unwrap()
        .expect("client closed the connection")
}
