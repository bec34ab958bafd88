//! End-to-end tests for signaling message routing and the transfer
//! session lifecycle derived from it.
//!
//! These tests drive the hub the way the WebSocket layer does: attach
//! connections, feed inbound messages through `handle_message`, and read
//! outbound messages from the per-connection receivers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use landrop_core::session::{SessionRegistry, SessionState};
use landrop_core::signaling::{ConnectionId, Envelope, Payload, SignalMessage, SignalingHub};

/// Attach a connection and bind it to a device identifier, draining the
/// REGISTERED acknowledgement.
fn register(
    hub: &SignalingHub,
    device_id: &str,
) -> (ConnectionId, mpsc::UnboundedReceiver<SignalMessage>) {
    let (conn, mut rx) = hub.connect();
    hub.handle_message(
        conn,
        SignalMessage::Register {
            device_id: device_id.to_string(),
            name: Some(format!("{device_id} device")),
            kind: None,
            icon: None,
        },
    );

    match rx.try_recv() {
        Ok(SignalMessage::Registered { status }) => assert_eq!(status, "OK"),
        other => panic!("Expected REGISTERED acknowledgement, got {other:?}"),
    }

    (conn, rx)
}

fn transfer_request(target_id: Option<&str>, transfer_id: &str) -> SignalMessage {
    SignalMessage::TransferRequest(Envelope {
        target_id: target_id.map(String::from),
        transfer_id: Some(transfer_id.to_string()),
        rest: serde_json::Map::new(),
    })
}

fn payload_msg(transfer_id: &str, rest: serde_json::Value) -> Payload {
    Payload {
        transfer_id: Some(transfer_id.to_string()),
        rest: rest.as_object().cloned().unwrap_or_default(),
    }
}

#[tokio::test]
async fn test_targeted_message_reaches_only_the_target() {
    let hub = SignalingHub::new();
    let (sender, mut sender_rx) = register(&hub, "sender-1");
    let (_target, mut target_rx) = register(&hub, "target-1");
    let (_other, mut other_rx) = register(&hub, "bystander-1");

    hub.handle_message(sender, transfer_request(Some("target-1"), "t-100"));

    match target_rx.try_recv() {
        Ok(SignalMessage::TransferRequest(env)) => {
            assert_eq!(env.transfer_id.as_deref(), Some("t-100"));
        }
        other => panic!("Target should receive the request, got {other:?}"),
    }
    assert!(sender_rx.try_recv().is_err(), "Sender gets no echo");
    assert!(other_rx.try_recv().is_err(), "Bystander gets nothing");
}

#[tokio::test]
async fn test_missing_target_yields_exactly_one_error_to_sender() {
    let hub = SignalingHub::new();
    let (sender, mut sender_rx) = register(&hub, "sender-1");
    let (_other, mut other_rx) = register(&hub, "bystander-1");

    hub.handle_message(sender, transfer_request(None, "t-101"));

    match sender_rx.try_recv() {
        Ok(SignalMessage::Error { message }) => assert_eq!(message, "targetId is required"),
        other => panic!("Expected error to sender, got {other:?}"),
    }
    assert!(sender_rx.try_recv().is_err(), "Exactly one error");
    assert!(other_rx.try_recv().is_err(), "Error goes only to the sender");
}

#[tokio::test]
async fn test_offline_target_yields_exactly_one_error_to_sender() {
    let hub = SignalingHub::new();
    let (sender, mut sender_rx) = register(&hub, "sender-1");

    hub.handle_message(sender, transfer_request(Some("nobody-home"), "t-102"));

    match sender_rx.try_recv() {
        Ok(SignalMessage::Error { message }) => assert_eq!(message, "Target device offline"),
        other => panic!("Expected error to sender, got {other:?}"),
    }
    assert!(sender_rx.try_recv().is_err(), "Exactly one error");
}

#[tokio::test]
async fn test_disconnected_target_becomes_offline() {
    let hub = SignalingHub::new();
    let (sender, mut sender_rx) = register(&hub, "sender-1");
    let (target, _target_rx) = register(&hub, "target-1");

    hub.disconnect(target);
    hub.handle_message(sender, transfer_request(Some("target-1"), "t-103"));

    match sender_rx.try_recv() {
        Ok(SignalMessage::Error { message }) => assert_eq!(message, "Target device offline"),
        other => panic!("Expected offline error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rebind_routes_to_latest_connection() {
    let hub = SignalingHub::new();
    let (sender, _sender_rx) = register(&hub, "sender-1");
    let (_old, mut old_rx) = register(&hub, "target-1");
    let (_new, mut new_rx) = register(&hub, "target-1");

    hub.handle_message(sender, transfer_request(Some("target-1"), "t-104"));

    assert!(
        matches!(new_rx.try_recv(), Ok(SignalMessage::TransferRequest(_))),
        "Latest binding receives the message"
    );
    assert!(
        old_rx.try_recv().is_err(),
        "Stale connection is detached from routing"
    );
}

#[tokio::test]
async fn test_broadcast_reaches_unregistered_connections() {
    let hub = SignalingHub::new();
    let (sender, _sender_rx) = register(&hub, "sender-1");
    // Connected but never sent REGISTER.
    let (_anon, mut anon_rx) = hub.connect();

    hub.handle_message(
        sender,
        SignalMessage::FileMetadata(payload_msg("t-105", json!({ "fileName": "notes.txt" }))),
    );

    match anon_rx.try_recv() {
        Ok(SignalMessage::FileMetadata(payload)) => {
            assert_eq!(payload.transfer_id.as_deref(), Some("t-105"));
        }
        other => panic!("Broadcast should reach every connection, got {other:?}"),
    }
}

/// Poll the registry until the session reaches `expected`, or fail after
/// one second. The registry consumes hub events on a background task.
async fn wait_for_state(registry: &SessionRegistry, transfer_id: &str, expected: SessionState) {
    for _ in 0..100 {
        if registry.get(transfer_id).is_some_and(|s| s.state == expected) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let actual = registry.get(transfer_id).map(|s| s.state);
    panic!("Session {transfer_id} never reached {expected:?}, last seen {actual:?}");
}

#[tokio::test]
async fn test_session_lifecycle_follows_signaling_events() {
    let hub = Arc::new(SignalingHub::new());
    let registry = Arc::new(SessionRegistry::new());
    let _watcher = registry.attach(&hub);

    let (conn, _rx) = hub.connect();

    hub.handle_message(
        conn,
        SignalMessage::FileMetadata(payload_msg(
            "t-200",
            json!({ "fileName": "photo.jpg", "fileSize": 2048, "senderId": "sender-1" }),
        )),
    );
    wait_for_state(&registry, "t-200", SessionState::AwaitingDecision).await;

    let session = registry.get("t-200").expect("session tracked");
    assert_eq!(session.file_name.as_deref(), Some("photo.jpg"));
    assert_eq!(session.file_size, Some(2048));
    assert_eq!(session.sender_id.as_deref(), Some("sender-1"));

    hub.handle_message(conn, SignalMessage::Accept(payload_msg("t-200", json!({}))));
    wait_for_state(&registry, "t-200", SessionState::Accepted).await;

    hub.handle_message(
        conn,
        SignalMessage::Progress(payload_msg(
            "t-200",
            json!({ "receivedBytes": 1024, "totalBytes": 2048 }),
        )),
    );
    wait_for_state(&registry, "t-200", SessionState::Transferring).await;
    let session = registry.get("t-200").expect("session tracked");
    assert_eq!(session.bytes_transferred, 1024);
    assert_eq!(session.total_bytes, 2048);

    hub.handle_message(
        conn,
        SignalMessage::TransferComplete(payload_msg("t-200", json!({}))),
    );
    wait_for_state(&registry, "t-200", SessionState::Complete).await;
}

#[tokio::test]
async fn test_session_rejection_is_terminal() {
    let hub = Arc::new(SignalingHub::new());
    let registry = Arc::new(SessionRegistry::new());
    let _watcher = registry.attach(&hub);

    let (conn, _rx) = hub.connect();

    hub.handle_message(
        conn,
        SignalMessage::FileMetadata(payload_msg("t-201", json!({ "fileName": "a.bin" }))),
    );
    wait_for_state(&registry, "t-201", SessionState::AwaitingDecision).await;

    hub.handle_message(conn, SignalMessage::Reject(payload_msg("t-201", json!({}))));
    wait_for_state(&registry, "t-201", SessionState::Rejected).await;

    // A late progress event must not resurrect the session.
    hub.handle_message(
        conn,
        SignalMessage::Progress(payload_msg("t-201", json!({ "receivedBytes": 1 }))),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        registry.get("t-201").map(|s| s.state),
        Some(SessionState::Rejected)
    );
}

#[tokio::test]
async fn test_session_awaits_decision_indefinitely() {
    let hub = Arc::new(SignalingHub::new());
    let registry = Arc::new(SessionRegistry::new());
    let _watcher = registry.attach(&hub);

    let (conn, _rx) = hub.connect();
    hub.handle_message(
        conn,
        SignalMessage::FileMetadata(payload_msg("t-202", json!({ "fileName": "b.bin" }))),
    );
    wait_for_state(&registry, "t-202", SessionState::AwaitingDecision).await;

    // No decision arrives; the session must still be waiting, not timed out.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        registry.get("t-202").map(|s| s.state),
        Some(SessionState::AwaitingDecision)
    );

    // Cancellation is the only way out short of a decision.
    registry.cancel("t-202").expect("cancel pending session");
    assert_eq!(
        registry.get("t-202").map(|s| s.state),
        Some(SessionState::Cancelled)
    );
}
