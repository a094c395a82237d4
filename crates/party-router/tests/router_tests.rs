//! Router tests
//!
//! Routing through a live relay:
//! - Motion broadcast excludes the sender
//! - Model requests reach only their target
//! - Asset frames are forwarded byte-for-byte
//! - Undeliverable and malformed input is dropped without side effects

use bytes::Bytes;
use party_core::{codec, Envelope, FrameHeader};
use party_router::{Router, RouterConfig, RouterError};
use party_test_utils::{RawPeer, TestRelay, DEFAULT_TIMEOUT, QUIET_WINDOW};
use serde_json::json;

/// Three joined peers with their join traffic already consumed
async fn trio(relay: &TestRelay) -> (RawPeer, RawPeer, RawPeer) {
    let mut alice = relay.join("alice").await;
    assert_eq!(
        alice.recv_envelope(DEFAULT_TIMEOUT).await,
        Some(Envelope::existing_users(vec![]))
    );

    let mut bob = relay.join("bob").await;
    assert!(bob.recv_envelope(DEFAULT_TIMEOUT).await.is_some());
    assert_eq!(
        alice.recv_envelope(DEFAULT_TIMEOUT).await,
        Some(Envelope::user_joined("bob"))
    );

    let mut carol = relay.join("carol").await;
    assert!(carol.recv_envelope(DEFAULT_TIMEOUT).await.is_some());
    assert_eq!(
        alice.recv_envelope(DEFAULT_TIMEOUT).await,
        Some(Envelope::user_joined("carol"))
    );
    assert_eq!(
        bob.recv_envelope(DEFAULT_TIMEOUT).await,
        Some(Envelope::user_joined("carol"))
    );

    (alice, bob, carol)
}

#[tokio::test]
async fn test_router_defaults() {
    let router = Router::default();
    assert_eq!(router.participant_count(), 0);
    assert_eq!(router.config().id_param, "userId");
    assert!(router.config().broadcast_untargeted_frames);
    assert!(!router.is_running());

    // Stoppable even when not serving
    router.stop();
}

#[tokio::test]
async fn test_bind_failure_is_transport_error() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let router = Router::default();
    let err = router.serve_websocket(&addr).await.unwrap_err();
    assert!(matches!(err, RouterError::Transport(_)));
    assert!(!router.is_running());
}

#[tokio::test]
async fn test_motion_broadcast_excludes_sender() {
    let relay = TestRelay::start().await;
    let (mut alice, mut bob, mut carol) = trio(&relay).await;

    let motion = r#"{"type":"motion","userId":"alice","data":{"blendshapes":{"aa":0.25},"extra":[1,2,3]}}"#;
    alice.send_text(motion).await;

    // Forwarded as the original text
    assert_eq!(bob.recv_text(DEFAULT_TIMEOUT).await.as_deref(), Some(motion));
    assert_eq!(carol.recv_text(DEFAULT_TIMEOUT).await.as_deref(), Some(motion));
    assert!(alice.is_quiet(QUIET_WINDOW).await);
}

#[tokio::test]
async fn test_request_vrm_is_directed() {
    let relay = TestRelay::start().await;
    let (mut alice, mut bob, mut carol) = trio(&relay).await;

    alice
        .send_envelope(&Envelope::request_vrm("alice", "bob"))
        .await;

    assert_eq!(
        bob.recv_envelope(DEFAULT_TIMEOUT).await,
        Some(Envelope::send_vrm_to("alice"))
    );
    assert!(carol.is_quiet(QUIET_WINDOW).await);
    assert!(alice.is_quiet(QUIET_WINDOW).await);
}

#[tokio::test]
async fn test_request_all_vrms_names_requester() {
    let relay = TestRelay::start().await;
    let (mut alice, mut bob, mut carol) = trio(&relay).await;

    bob.send_text(r#"{"type":"requestAllVrms"}"#).await;

    assert_eq!(
        alice.recv_envelope(DEFAULT_TIMEOUT).await,
        Some(Envelope::send_vrm_to("bob"))
    );
    assert_eq!(
        carol.recv_envelope(DEFAULT_TIMEOUT).await,
        Some(Envelope::send_vrm_to("bob"))
    );
    assert!(bob.is_quiet(QUIET_WINDOW).await);
}

#[tokio::test]
async fn test_targeted_frame_forwarded_unchanged() {
    let relay = TestRelay::start().await;
    let (mut alice, mut bob, mut carol) = trio(&relay).await;

    let model: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let frame = codec::encode(&FrameHeader::vrm_data("bob", "alice"), &model).unwrap();
    bob.send_binary(frame.clone()).await;

    let received = alice.recv_binary(DEFAULT_TIMEOUT).await.expect("no frame");
    assert_eq!(received, frame);

    let (header, body): (FrameHeader, Bytes) = codec::decode(&received).unwrap();
    assert_eq!(header.sender_id.as_deref(), Some("bob"));
    assert_eq!(body.as_ref(), model.as_slice());

    assert!(carol.is_quiet(QUIET_WINDOW).await);
    assert!(bob.is_quiet(QUIET_WINDOW).await);
}

#[tokio::test]
async fn test_untargeted_frame_broadcast() {
    let relay = TestRelay::start().await;
    let (mut alice, mut bob, mut carol) = trio(&relay).await;

    let frame = codec::encode(&FrameHeader::vrm_data_broadcast("carol"), b"model").unwrap();
    carol.send_binary(frame.clone()).await;

    assert_eq!(alice.recv_binary(DEFAULT_TIMEOUT).await, Some(frame.clone()));
    assert_eq!(bob.recv_binary(DEFAULT_TIMEOUT).await, Some(frame));
    assert!(carol.is_quiet(QUIET_WINDOW).await);
}

#[tokio::test]
async fn test_untargeted_frame_dropped_when_disabled() {
    let relay = TestRelay::start_with_config(RouterConfig {
        broadcast_untargeted_frames: false,
        ..Default::default()
    })
    .await;
    let (mut alice, mut bob, _carol) = trio(&relay).await;

    let frame = codec::encode(&FrameHeader::vrm_data_broadcast("alice"), b"model").unwrap();
    alice.send_binary(frame).await;

    assert!(bob.is_quiet(QUIET_WINDOW).await);
}

#[tokio::test]
async fn test_undeliverable_target_dropped_silently() {
    let relay = TestRelay::start().await;
    let (mut alice, mut bob, mut carol) = trio(&relay).await;

    alice
        .send_envelope(&Envelope::request_vrm("alice", "ghost"))
        .await;
    let frame = codec::encode(&FrameHeader::vrm_data("alice", "ghost"), b"model").unwrap();
    alice.send_binary(frame).await;

    assert!(alice.is_quiet(QUIET_WINDOW).await);
    assert!(bob.is_quiet(QUIET_WINDOW).await);
    assert!(carol.is_quiet(QUIET_WINDOW).await);

    // Nothing else changed
    assert_eq!(relay.participant_count(), 3);
    alice.send_text(r#"{"type":"motion","userId":"alice","data":{}}"#).await;
    assert!(bob.recv_text(DEFAULT_TIMEOUT).await.is_some());
}

#[tokio::test]
async fn test_malformed_input_keeps_connection() {
    let relay = TestRelay::start().await;
    let (mut alice, mut bob, _carol) = trio(&relay).await;

    // Bad JSON, unknown type, relay-only type, and two broken frames
    alice.send_text("{not json").await;
    alice.send_text(r#"{"type":"emote","userId":"alice"}"#).await;
    alice.send_text(r#"{"type":"userLeft","userId":"bob"}"#).await;
    alice.send_binary(Bytes::from_static(&[7, 0])).await;
    let mut overrun = 1000u32.to_le_bytes().to_vec();
    overrun.extend_from_slice(br#"{"type":"vrmData"}"#);
    alice.send_binary(overrun).await;

    assert!(bob.is_quiet(QUIET_WINDOW).await);
    assert_eq!(relay.participant_count(), 3);

    let motion = json!({"type": "motion", "userId": "alice", "data": {"x": 1}}).to_string();
    alice.send_text(&motion).await;
    assert_eq!(bob.recv_text(DEFAULT_TIMEOUT).await, Some(motion));
}

#[tokio::test]
async fn test_messages_keep_sender_order() {
    let relay = TestRelay::start().await;
    let (alice, mut bob, _carol) = trio(&relay).await;

    for i in 0..50 {
        alice
            .send_envelope(&Envelope::motion("alice", json!({ "seq": i })))
            .await;
    }

    for i in 0..50 {
        match bob.recv_envelope(DEFAULT_TIMEOUT).await {
            Some(Envelope::Motion(motion)) => assert_eq!(motion.data["seq"], i),
            other => panic!("expected motion {}, got {:?}", i, other),
        }
    }
}
