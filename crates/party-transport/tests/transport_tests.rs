//! Transport Layer Tests
//!
//! Tests for the WebSocket transport:
//! - Handshake query extraction
//! - Text and binary message modes
//! - Large binary messages
//! - Close propagation
//! - Upgrades that never complete

use bytes::Bytes;
use party_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
    WebSocketConfig, WebSocketServer, WebSocketTransport, WireMessage,
};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::timeout;

async fn bind_server() -> (WebSocketServer, String) {
    let server = WebSocketServer::bind("127.0.0.1:0")
        .await
        .expect("bind failed");
    let addr = server.local_addr().expect("no local addr");
    (server, format!("ws://{}", addr))
}

/// Receive events until one that is not `Connected`
async fn next_payload(receiver: &mut impl TransportReceiver) -> TransportEvent {
    loop {
        let event = timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("timed out waiting for event")
            .expect("receiver closed");
        if !matches!(event, TransportEvent::Connected) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_handshake_captures_query() {
    let (mut server, url) = bind_server().await;

    let accept = tokio::spawn(async move { server.accept().await });

    let (_client_tx, _client_rx) =
        WebSocketTransport::connect(&format!("{}/party?userId=al%20ice&room=1", url))
            .await
            .expect("connect failed");

    let (_tx, _rx, handshake) = accept.await.unwrap().expect("accept failed");
    assert_eq!(handshake.path, "/party");
    assert_eq!(handshake.param("userId"), Some("al ice"));
    assert_eq!(handshake.param("room"), Some("1"));
    assert_eq!(handshake.param("missing"), None);
}

#[tokio::test]
async fn test_text_and_binary_modes() {
    let (mut server, url) = bind_server().await;
    let accept = tokio::spawn(async move { server.accept().await });

    let (client_tx, mut client_rx) = WebSocketTransport::connect(&format!("{}/?userId=a", url))
        .await
        .expect("connect failed");
    let (server_tx, mut server_rx, _) = accept.await.unwrap().expect("accept failed");

    client_tx
        .send(WireMessage::Text(r#"{"type":"requestAllVrms"}"#.into()))
        .await
        .expect("send failed");
    client_tx
        .send(WireMessage::Binary(Bytes::from_static(&[1, 2, 3])))
        .await
        .expect("send failed");

    match next_payload(&mut server_rx).await {
        TransportEvent::Text(text) => assert_eq!(text, r#"{"type":"requestAllVrms"}"#),
        other => panic!("expected text, got {:?}", other),
    }
    match next_payload(&mut server_rx).await {
        TransportEvent::Binary(data) => assert_eq!(data.as_ref(), &[1, 2, 3]),
        other => panic!("expected binary, got {:?}", other),
    }

    server_tx
        .try_send(WireMessage::Text("pong".into()))
        .expect("try_send failed");
    match next_payload(&mut client_rx).await {
        TransportEvent::Text(text) => assert_eq!(text, "pong"),
        other => panic!("expected text, got {:?}", other),
    }
}

#[tokio::test]
async fn test_large_binary_message() {
    let (mut server, url) = bind_server().await;
    let accept = tokio::spawn(async move { server.accept().await });

    let (client_tx, _client_rx) = WebSocketTransport::connect(&url)
        .await
        .expect("connect failed");
    let (_server_tx, mut server_rx, _) = accept.await.unwrap().expect("accept failed");

    let body: Vec<u8> = (0..4 * 1024 * 1024).map(|i| (i % 253) as u8).collect();
    client_tx
        .send(WireMessage::Binary(Bytes::from(body.clone())))
        .await
        .expect("send failed");

    match next_payload(&mut server_rx).await {
        TransportEvent::Binary(data) => assert_eq!(data.as_ref(), body.as_slice()),
        other => panic!("expected binary, got {:?}", other),
    }
}

#[tokio::test]
async fn test_close_with_reason() {
    let (mut server, url) = bind_server().await;
    let accept = tokio::spawn(async move { server.accept().await });

    let (_client_tx, mut client_rx) = WebSocketTransport::connect(&url)
        .await
        .expect("connect failed");
    let (server_tx, _server_rx, _) = accept.await.unwrap().expect("accept failed");

    server_tx
        .close(Some("duplicate participant id".into()))
        .await
        .expect("close failed");
    assert!(!server_tx.is_connected());
    assert!(server_tx.try_send(WireMessage::Text("late".into())).is_err());

    match next_payload(&mut client_rx).await {
        TransportEvent::Disconnected { reason } => {
            assert_eq!(reason.as_deref(), Some("duplicate participant id"));
        }
        other => panic!("expected disconnect, got {:?}", other),
    }
}

#[tokio::test]
async fn test_subprotocol_mismatch_tolerated_when_disabled() {
    let (mut server, url) = bind_server().await;
    let accept = tokio::spawn(async move { server.accept().await });

    let config = WebSocketConfig {
        subprotocol: String::new(),
        ..Default::default()
    };
    let result = WebSocketTransport::connect_with_config(&url, &config).await;
    assert!(result.is_ok(), "plain browser-style connect should succeed");

    assert!(accept.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_connect_refused() {
    let (server, url) = bind_server().await;
    drop(server);

    let result = timeout(Duration::from_secs(5), WebSocketTransport::connect(&url))
        .await
        .expect("connect hung");
    assert!(result.is_err());
}

#[tokio::test]
async fn test_silent_socket_does_not_block_accept() {
    let server = WebSocketServer::bind("127.0.0.1:0")
        .await
        .expect("bind failed")
        .with_config(WebSocketConfig {
            handshake_timeout: Duration::from_millis(200),
            ..Default::default()
        });
    let addr = server.local_addr().expect("no local addr");
    let mut server = server;
    let accept = tokio::spawn(async move { server.accept().await });

    // Connects but never sends an upgrade request
    let mut silent = tokio::net::TcpStream::connect(addr)
        .await
        .expect("tcp connect failed");

    let (_client_tx, _client_rx) =
        WebSocketTransport::connect(&format!("ws://{}/?userId=bob", addr))
            .await
            .expect("connect failed");

    let (_tx, _rx, handshake) = timeout(Duration::from_secs(5), accept)
        .await
        .expect("accept stuck behind the silent socket")
        .unwrap()
        .expect("accept failed");
    assert_eq!(handshake.param("userId"), Some("bob"));

    // Dropped once the handshake timeout passes
    let mut buf = [0u8; 1];
    let read = timeout(Duration::from_secs(5), silent.read(&mut buf))
        .await
        .expect("silent socket was never dropped");
    assert!(matches!(read, Ok(0) | Err(_)));
}
