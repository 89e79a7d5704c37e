mod common;

use common::{recv, Harness};
use parking_lot::Mutex;
use serde_json::json;
use simplepush_agent::{ConnectionState, PushError, PushEvent, SubscribeRequest};
use simplepush_core::{ChannelRecord, ChannelState, FilePersistence};
use simplepush_protocol::{ClientMessage, ServerMessage};
use simplepush_transport::MemoryPeer;
use std::sync::Arc;

/// Read the next client message, which must be a `register`.
async fn registered_id(peer: &mut MemoryPeer) -> String {
    match recv(peer).await {
        ClientMessage::Register { channel_id } => channel_id,
        other => panic!("expected register, got {other:?}"),
    }
}

#[tokio::test]
async fn test_offline_subscribe_reuses_available_channel() {
    let mut h = Harness::with_document(json!({
        "uaid": "U1",
        "channels": [
            {"channelID": "a", "version": 7, "state": "used", "registered": true},
            {"channelID": "b", "version": 2, "state": "used", "registered": true}
        ]
    }));

    let bindings = h.push.subscribe([SubscribeRequest::new()], false).unwrap();
    assert_eq!(bindings, ["a"]);
    assert_eq!(
        h.push.channel("a"),
        Some(ChannelRecord {
            channel_id: "a".into(),
            version: 7,
            state: ChannelState::Used,
            registered: true,
        })
    );
    assert_eq!(h.push.channel("b").unwrap().state, ChannelState::Available);
    assert_eq!(h.persisted()["channels"][0]["state"], "used");

    // Nothing went over the wire
    assert_eq!(h.push.state(), ConnectionState::Disconnected);
    assert!(h.listener.try_accept().is_none());
}

#[tokio::test]
async fn test_offline_subscribe_queues_new_channel() {
    let h = Harness::new();

    let bindings = h
        .push
        .subscribe([SubscribeRequest::new(), SubscribeRequest::new()], false)
        .unwrap();
    assert_eq!(bindings.len(), 2);
    assert_ne!(bindings[0], bindings[1]);

    for id in &bindings {
        assert_eq!(
            h.push.channel(id),
            Some(ChannelRecord::queued(id.as_str()))
        );
    }
    assert_eq!(h.push.pending_new_channels().len(), 2);
    assert_eq!(h.persisted()["channels"][1]["state"], "new");
}

#[tokio::test]
async fn test_offline_subscribe_ignores_supplied_channel_id() {
    let h = Harness::new();

    let bindings = h
        .push
        .subscribe([SubscribeRequest::new().with_channel_id("mine")], false)
        .unwrap();
    assert_ne!(bindings[0], "mine");
    assert!(h.push.channel("mine").is_none());
}

#[tokio::test]
async fn test_queued_channel_resolves_once_registered() {
    let mut h = Harness::new();
    let resolved = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&resolved);

    let bindings = h
        .push
        .subscribe(
            [SubscribeRequest::new().on_success(move |r| *sink.lock() = Some(r.clone()))],
            false,
        )
        .unwrap();
    let queued = bindings[0].clone();

    let (mut peer, _) = h.handshake("U1").await;
    // Connecting alone registers nothing
    assert!(peer.try_recv().is_none());
    assert!(resolved.lock().is_none());

    h.push
        .subscribe([SubscribeRequest::new().with_channel_id(queued.as_str())], false)
        .unwrap();
    assert_eq!(registered_id(&mut peer).await, queued);
    h.register(&peer, &queued, 1).await;

    assert_eq!(*resolved.lock(), Some(ChannelRecord::used(queued.as_str(), 1)));
    assert!(h.push.pending_new_channels().is_empty());
}

#[tokio::test]
async fn test_online_subscribe_registers_generated_channel() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;

    let resolved = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&resolved);
    let bindings = h
        .push
        .subscribe(
            [SubscribeRequest::new().on_success(move |r| *sink.lock() = Some(r.clone()))],
            false,
        )
        .unwrap();

    let channel_id = registered_id(&mut peer).await;
    assert_eq!(bindings, [channel_id.clone()]);
    // Not stored until the server answers
    assert!(h.push.channels().is_empty());

    h.register(&peer, &channel_id, 1).await;

    let expected = ChannelRecord {
        channel_id: channel_id.clone(),
        version: 1,
        state: ChannelState::Used,
        registered: false,
    };
    assert_eq!(*resolved.lock(), Some(expected.clone()));
    assert_eq!(h.push.channels(), [expected]);
    assert_eq!(
        h.persisted(),
        json!({
            "uaid": "U1",
            "channels": [
                {"channelID": channel_id, "version": 1, "state": "used", "registered": false}
            ]
        })
    );
}

#[tokio::test]
async fn test_register_replies_keep_one_record_per_channel() {
    let mut h = Harness::new();
    let (peer, _) = h.handshake("U1").await;

    h.register(&peer, "x", 1).await;
    h.register(&peer, "y", 1).await;
    h.register(&peer, "x", 5).await;

    assert_eq!(h.channel_ids(), ["x", "y"]);
    assert_eq!(h.push.channel("x").unwrap().version, 5);
}

#[tokio::test]
async fn test_register_reply_with_negative_version_resolves() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;

    let resolved = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&resolved);
    h.push
        .subscribe(
            [SubscribeRequest::new().on_success(move |r| *sink.lock() = Some(r.version))],
            false,
        )
        .unwrap();
    let channel_id = registered_id(&mut peer).await;

    h.register(&peer, &channel_id, -2).await;
    assert_eq!(*resolved.lock(), Some(-2));
    assert_eq!(h.push.channel(&channel_id).unwrap().version, -2);
}

#[tokio::test]
async fn test_supplied_channel_id_resolves_through_alias() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;

    let resolved = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&resolved);
    let bindings = h
        .push
        .subscribe(
            [SubscribeRequest::new()
                .with_channel_id("q1")
                .on_success(move |r| sink.lock().push(r.channel_id.clone()))],
            false,
        )
        .unwrap();

    assert_ne!(bindings[0], "q1");
    assert_eq!(registered_id(&mut peer).await, "q1");

    h.register(&peer, "q1", 3).await;
    assert_eq!(*resolved.lock(), ["q1"]);

    // One-shot: a repeated reply updates the store only
    h.register(&peer, "q1", 4).await;
    assert_eq!(*resolved.lock(), ["q1"]);
    assert_eq!(h.push.channel("q1").unwrap().version, 4);
}

#[tokio::test]
async fn test_unregister_removes_only_confirmed_channel() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;
    h.register(&peer, "x", 1).await;
    h.register(&peer, "y", 1).await;

    h.push.unsubscribe(["x"]).unwrap();
    assert_eq!(recv(&mut peer).await, ClientMessage::unregister("x"));
    // Removal waits for the reply
    assert_eq!(h.channel_ids(), ["x", "y"]);

    peer.send_message(&ServerMessage::unregister(200, "x"))
        .unwrap();
    h.wait_for(|e| matches!(e, PushEvent::Unregistered { .. }))
        .await;

    assert_eq!(h.channel_ids(), ["y"]);
    assert_eq!(h.persisted()["channels"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_unregister_of_unknown_channel_is_harmless() {
    let mut h = Harness::new();
    let (peer, _) = h.handshake("U1").await;
    h.register(&peer, "y", 1).await;

    peer.send_message(&ServerMessage::unregister(200, "ghost"))
        .unwrap();
    let event = h
        .wait_for(|e| matches!(e, PushEvent::Unregistered { .. }))
        .await;
    assert_eq!(
        event,
        PushEvent::Unregistered {
            channel_id: "ghost".into()
        }
    );
    assert_eq!(h.channel_ids(), ["y"]);
}

#[tokio::test]
async fn test_registration_error_is_scoped_to_channel() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;
    h.register(&peer, "keep", 1).await;

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    let succeeded = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&succeeded);
    h.push
        .subscribe(
            [SubscribeRequest::new()
                .on_success(move |_| *flag.lock() = true)
                .on_error(move |e| {
                    assert!(e.is_channel_error());
                    sink.lock().push(e.to_string());
                })],
            false,
        )
        .unwrap();
    let channel_id = registered_id(&mut peer).await;

    peer.send_message(&ServerMessage::register(500, channel_id.as_str(), 0))
        .unwrap();
    let event = h
        .wait_for(|e| matches!(e, PushEvent::RegistrationFailed { .. }))
        .await;
    assert_eq!(
        event,
        PushEvent::RegistrationFailed {
            channel_id: channel_id.clone(),
            status: 500
        }
    );

    assert_eq!(failures.lock().len(), 1);
    assert!(!*succeeded.lock());
    assert_eq!(h.push.state(), ConnectionState::Connected);
    assert_eq!(h.channel_ids(), ["keep"]);

    // Still usable afterwards
    h.register(&peer, "next", 1).await;
    assert_eq!(h.channel_ids(), ["keep", "next"]);
}

#[tokio::test]
async fn test_unregistration_error_keeps_record() {
    let mut h = Harness::new();
    let (mut peer, _) = h.handshake("U1").await;
    h.register(&peer, "x", 1).await;

    h.push.unsubscribe(["x"]).unwrap();
    recv(&mut peer).await;
    peer.send_message(&ServerMessage::unregister(409, "x"))
        .unwrap();

    let event = h
        .wait_for(|e| matches!(e, PushEvent::UnregistrationFailed { .. }))
        .await;
    assert_eq!(
        event,
        PushEvent::UnregistrationFailed {
            channel_id: "x".into(),
            status: 409
        }
    );
    assert_eq!(h.channel_ids(), ["x"]);
    assert_eq!(h.push.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_reset_unregisters_stored_channels_first() {
    let mut h = Harness::with_document(json!({
        "uaid": "U1",
        "channels": [
            {"channelID": "a", "version": 1},
            {"channelID": "b", "version": 1}
        ]
    }));
    let (mut peer, _) = h.handshake("U1").await;

    h.push.subscribe([SubscribeRequest::new()], true).unwrap();

    assert_eq!(recv(&mut peer).await, ClientMessage::unregister("a"));
    assert_eq!(recv(&mut peer).await, ClientMessage::unregister("b"));
    registered_id(&mut peer).await;
}

#[tokio::test]
async fn test_unsubscribe_and_reset_need_connection() {
    let h = Harness::with_document(json!({
        "channels": [{"channelID": "a", "version": 1}]
    }));

    assert!(matches!(
        h.push.unsubscribe(["a"]),
        Err(PushError::NotConnected)
    ));
    assert!(matches!(
        h.push.subscribe([SubscribeRequest::new()], true),
        Err(PushError::NotConnected)
    ));
    // The failed reset touched nothing
    assert_eq!(h.push.channel("a").unwrap().state, ChannelState::Available);
}

#[tokio::test]
async fn test_reload_resets_channel_states() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut h = Harness::with_persistence(Arc::new(FilePersistence::new(dir.path())));
        let (peer, _) = h.handshake("U1").await;
        h.register(&peer, "x", 3).await;
        h.push.disconnect().await.unwrap();

        // Offline, a queued record joins the registered one
        h.push.subscribe([SubscribeRequest::new()], false).unwrap();
        assert_eq!(h.push.pending_new_channels().len(), 1);
    }

    let h = Harness::with_persistence(Arc::new(FilePersistence::new(dir.path())));
    assert_eq!(h.push.uaid().as_deref(), Some("U1"));
    let channels = h.push.channels();
    assert_eq!(channels.len(), 2);
    assert!(channels
        .iter()
        .all(|r| r.state == ChannelState::Available && !r.registered));
    assert_eq!(channels[0].version, 3);
    assert!(h.persisted()["channels"]
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["state"] == "available"));
}
