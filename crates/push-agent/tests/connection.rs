mod common;

use common::{recv, Harness, WAIT};
use parking_lot::Mutex;
use serde_json::{json, Value};
use simplepush_agent::{
    ClientSettings, ConnectOptions, ConnectionState, PushError, PushEvent, SimplePush,
    SubscribeRequest,
};
use simplepush_core::{ChannelRecord, ChannelState, MemoryPersistence};
use simplepush_protocol::{ClientMessage, ProtocolError, ServerMessage};
use simplepush_transport::MemoryTransport;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
async fn test_first_connect_sends_anonymous_hello_and_adopts_uaid() {
    let mut h = Harness::new();
    let raw_hello = Arc::new(Mutex::new(None::<Value>));

    let seen = Arc::clone(&raw_hello);
    h.push
        .connect(ConnectOptions::new().on_connect(move |raw| *seen.lock() = Some(raw.clone())))
        .await
        .unwrap();
    assert_eq!(h.push.state(), ConnectionState::Connected);

    let mut peer = h.accept().await;
    let frame = timeout(WAIT, peer.recv()).await.unwrap().unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&frame).unwrap(),
        json!({"messageType": "hello", "uaid": ""})
    );

    peer.send(r#"{"messageType":"hello","uaid":"U1"}"#);
    let event = h
        .wait_for(|e| matches!(e, PushEvent::Connected { .. }))
        .await;
    assert_eq!(
        event,
        PushEvent::Connected {
            uaid: "U1".into()
        }
    );

    assert_eq!(h.push.uaid().as_deref(), Some("U1"));
    assert_eq!(h.persisted(), json!({"uaid": "U1", "channels": []}));
    assert_eq!(
        *raw_hello.lock(),
        Some(json!({"messageType": "hello", "uaid": "U1"}))
    );
}

#[tokio::test]
async fn test_hello_lists_non_available_channels_in_reverse() {
    let mut h = Harness::with_document(json!({
        "uaid": "U1",
        "channels": [
            {"channelID": "A", "version": 1, "state": "used", "registered": true},
            {"channelID": "B", "version": 1, "state": "used", "registered": true},
            {"channelID": "C", "version": 1, "state": "used", "registered": true}
        ]
    }));

    // Everything comes back available after a reload
    let (peer, hello) = h.handshake("U1").await;
    assert_eq!(hello, ClientMessage::hello("U1", Some(vec![])));

    h.register(&peer, "A", 2).await;
    h.register(&peer, "C", 2).await;
    h.push.disconnect().await.unwrap();

    let mut peer = h.connect().await;
    assert_eq!(
        recv(&mut peer).await,
        ClientMessage::hello("U1", Some(vec!["C".into(), "A".into()]))
    );
}

#[tokio::test]
async fn test_known_uaid_resolves_channels_without_register() {
    let mut h = Harness::with_document(json!({
        "uaid": "U1",
        "channels": [{"channelID": "a", "version": 4, "state": "available", "registered": false}]
    }));

    let resolved = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&resolved);
    let bindings = h
        .push
        .subscribe(
            [SubscribeRequest::new()
                .on_success(move |record| *sink.lock() = Some(record.clone()))],
            false,
        )
        .unwrap();
    assert_eq!(bindings, ["a"]);

    let mut peer = h.connect().await;
    assert_eq!(
        recv(&mut peer).await,
        ClientMessage::hello("U1", Some(vec!["a".into()]))
    );
    peer.send_message(&ServerMessage::hello("U1")).unwrap();

    let expected = ChannelRecord {
        channel_id: "a".into(),
        version: 4,
        state: ChannelState::Used,
        registered: true,
    };
    // Published like a register reply, ahead of the handshake event
    assert_eq!(
        h.wait_for(|e| matches!(e, PushEvent::Registered(_) | PushEvent::Connected { .. }))
            .await,
        PushEvent::Registered(expected.clone())
    );
    h.wait_for(|e| matches!(e, PushEvent::Connected { .. }))
        .await;

    assert_eq!(*resolved.lock(), Some(expected.clone()));
    assert_eq!(h.push.channel("a"), Some(expected));
    assert!(peer.try_recv().is_none());
}

#[tokio::test]
async fn test_new_uaid_is_adopted_and_persisted() {
    let mut h = Harness::with_document(json!({
        "uaid": "U1",
        "channels": [{"channelID": "a", "version": 1}]
    }));

    let resolved = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&resolved);
    h.push
        .subscribe(
            [SubscribeRequest::new()
                .on_success(move |_| flag.store(true, Ordering::SeqCst))],
            false,
        )
        .unwrap();

    h.handshake("U2").await;
    assert_eq!(h.push.uaid().as_deref(), Some("U2"));
    assert_eq!(h.persisted()["uaid"], "U2");
    assert!(!resolved.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_connect_error_is_reported_and_retryable() {
    let (transport, listener) = MemoryTransport::pair();
    drop(listener);
    let push = SimplePush::new(
        ClientSettings::new("test", "memory://down"),
        Arc::new(MemoryPersistence::new()),
        Arc::new(transport),
    )
    .unwrap();
    let mut events = push.events();

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    let options = ConnectOptions::new().on_connect_error(move |e| {
        assert!(matches!(e, PushError::Connection { .. }));
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let result = push.connect(options.clone()).await;
    assert!(matches!(
        result,
        Err(PushError::Connection { ref url, .. }) if url == "memory://down"
    ));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(push.state(), ConnectionState::Disconnected);
    assert!(matches!(
        events.recv().await.unwrap(),
        PushEvent::ConnectError { .. }
    ));

    // Non-fatal: the caller may try again
    assert!(matches!(
        push.connect(options).await,
        Err(PushError::Connection { .. })
    ));
    assert_eq!(errors.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_connect_url_override_is_remembered() {
    let mut h = Harness::new();
    h.push
        .connect(ConnectOptions::new().with_url("memory://other"))
        .await
        .unwrap();
    let peer = h.accept().await;
    assert_eq!(peer.url(), "memory://other");
    assert_eq!(h.push.connect_url(), "memory://other");

    h.push.disconnect().await.unwrap();
    drop(peer);
    let peer = h.connect().await;
    assert_eq!(peer.url(), "memory://other");
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let mut h = Harness::new();
    let _peer = h.connect().await;
    assert!(matches!(
        h.push.connect(ConnectOptions::new()).await,
        Err(PushError::AlreadyConnected)
    ));
}

#[tokio::test]
async fn test_disconnect_closes_transport_and_runs_callback() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;

    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);
    h.push
        .disconnect_with(move || flag.store(true, Ordering::SeqCst))
        .await
        .unwrap();

    assert!(called.load(Ordering::SeqCst));
    assert_eq!(h.push.state(), ConnectionState::Disconnected);
    assert!(timeout(WAIT, peer.recv()).await.unwrap().is_none());
    h.wait_for(|e| *e == PushEvent::Disconnected).await;

    assert!(matches!(
        h.push.disconnect().await,
        Err(PushError::NotConnected)
    ));
}

#[tokio::test]
async fn test_queued_messages_flush_before_close() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;

    h.push.unsubscribe(["a", "b"]).unwrap();
    h.push.disconnect().await.unwrap();

    assert_eq!(recv(&mut peer).await, ClientMessage::unregister("a"));
    assert_eq!(recv(&mut peer).await, ClientMessage::unregister("b"));
    assert!(timeout(WAIT, peer.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_transport_error_disconnects() {
    let mut h = Harness::new();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    h.push
        .connect(ConnectOptions::new().on_connect_error(move |e| sink.lock().push(e.to_string())))
        .await
        .unwrap();
    let mut peer = h.accept().await;
    recv(&mut peer).await;

    peer.fail("connection reset");
    h.wait_for(|e| matches!(e, PushEvent::ConnectError { .. }))
        .await;
    h.wait_for(|e| *e == PushEvent::Disconnected).await;

    assert_eq!(h.push.state(), ConnectionState::Disconnected);
    assert_eq!(errors.lock().len(), 1);
    assert!(errors.lock()[0].contains("connection reset"));

    // No automatic reconnect, but the caller can reconnect
    let mut peer = h.connect().await;
    assert_eq!(recv(&mut peer).await, ClientMessage::hello("", None));
}

#[tokio::test]
async fn test_server_close_disconnects_without_error() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;

    peer.close();
    let event = h
        .wait_for(|e| matches!(e, PushEvent::ConnectError { .. } | PushEvent::Disconnected))
        .await;
    assert_eq!(event, PushEvent::Disconnected);
    assert_eq!(h.push.state(), ConnectionState::Disconnected);
    assert!(matches!(
        h.push.unsubscribe(["a"]),
        Err(PushError::NotConnected)
    ));
}

#[tokio::test]
async fn test_undecodable_frames_are_dropped() {
    let mut h = Harness::new();
    let (peer, _) = h.handshake("U1").await;

    peer.send("not json");
    peer.send(r#"{"messageType":"bogus","channelID":"x"}"#);
    peer.send(r#"{"status":200}"#);
    peer.send_message(&ServerMessage::register(200, "x", 1))
        .unwrap();

    h.wait_for(|e| matches!(e, PushEvent::Registered(_)))
        .await;
    assert_eq!(h.push.state(), ConnectionState::Connected);
    assert_eq!(h.channel_ids(), ["x"]);
}

#[tokio::test]
async fn test_oversized_hello_reports_connect_error() {
    let channel_id = |i: usize| format!("{i:0>400}");
    let channels: Vec<Value> = (0..200)
        .map(|i| json!({"channelID": channel_id(i), "version": 1}))
        .collect();
    let mut h = Harness::with_document(json!({"uaid": "U1", "channels": channels}));
    h.push
        .subscribe((0..200).map(|_| SubscribeRequest::new()), false)
        .unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    let result = h
        .push
        .connect(ConnectOptions::new().on_connect_error(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

    assert!(matches!(
        result,
        Err(PushError::Protocol(ProtocolError::FrameTooLarge(_)))
    ));
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(h.push.state(), ConnectionState::Disconnected);
    h.wait_for(|e| matches!(e, PushEvent::ConnectError { .. }))
        .await;
}

#[tokio::test]
async fn test_send_failure_releases_reader() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;

    // The server stops reading but never ends its stream
    peer.stop_reading();
    h.push.unsubscribe(["a"]).unwrap();

    h.wait_for(|e| matches!(e, PushEvent::ConnectError { .. }))
        .await;
    h.wait_for(|e| *e == PushEvent::Disconnected).await;
    assert_eq!(h.push.state(), ConnectionState::Disconnected);

    timeout(WAIT, async {
        while !peer.is_client_gone() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
