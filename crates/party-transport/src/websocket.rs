//! WebSocket transport implementation

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{ErrorResponse, Request as HsRequest, Response as HsResponse},
        http::HeaderValue,
        protocol::{
            frame::coding::CloseCode, CloseFrame, Message as WsMessage,
            WebSocketConfig as WsProtocolConfig,
        },
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    Handshake, Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
    WireMessage,
};

use party_core::WS_SUBPROTOCOL;

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Subprotocol to request/echo; empty disables negotiation
    pub subprotocol: String,
    /// Maximum message size. Avatar models are large, so this is generous.
    pub max_message_size: usize,
    /// Capacity of the per-connection outbound queue
    pub send_queue: usize,
    /// How long an accepted socket may take to finish the upgrade
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            subprotocol: WS_SUBPROTOCOL.to_string(),
            max_message_size: 64 * 1024 * 1024, // 64MB
            send_queue: 256,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl WebSocketConfig {
    fn protocol_config(&self) -> WsProtocolConfig {
        let mut config = WsProtocolConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

/// WebSocket transport (client side)
pub struct WebSocketTransport {
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            config: WebSocketConfig::default(),
        }
    }

    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }

    /// Connect using an explicit configuration
    pub async fn connect_with_config(
        url: &str,
        config: &WebSocketConfig,
    ) -> Result<(WebSocketSender, WebSocketReceiver)> {
        info!("Connecting to WebSocket: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        if !config.subprotocol.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&config.subprotocol) {
                request
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", value);
            }
        }

        let (ws_stream, response) =
            connect_async_with_config(request, Some(config.protocol_config()), true)
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_io(ws_stream, config.send_queue))
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

/// Binary payloads keep sharing the caller's buffer, so one model fanned out
/// to many peers is never copied per recipient.
fn to_ws(message: WireMessage) -> WsMessage {
    match message {
        WireMessage::Text(text) => WsMessage::Text(text.into()),
        WireMessage::Binary(data) => WsMessage::Binary(data),
    }
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, message: WireMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(to_ws(message))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn try_send(&self, message: WireMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(to_ws(message)).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self, reason: Option<String>) -> Result<()> {
        let frame = reason.map(|reason| CloseFrame {
            code: CloseCode::Policy,
            reason: reason.into(),
        });
        let _ = self.tx.send(WsMessage::Close(frame)).await;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        Self::connect_with_config(url, &WebSocketConfig::default()).await
    }
}

/// Split an upgraded stream into a queued sender and an event receiver.
///
/// One writer task drains the outbound queue into the socket; one reader
/// task turns socket frames into [`TransportEvent`]s.
fn spawn_io<S>(ws_stream: WebSocketStream<S>, send_queue: usize) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(send_queue.max(1));
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    // Spawn writer task
    tokio::spawn(async move {
        let mut write = write;
        while let Some(msg) = send_rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("WebSocket write error: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        *connected_write.lock() = false;
    });

    // Spawn reader task
    tokio::spawn(async move {
        let mut read = read;
        let mut announced = false;

        let _ = event_tx.send(TransportEvent::Connected).await;

        while let Some(result) = read.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    let _ = event_tx.send(TransportEvent::Text(text.to_string())).await;
                }
                Ok(WsMessage::Binary(data)) => {
                    let _ = event_tx.send(TransportEvent::Binary(data)).await;
                }
                Ok(WsMessage::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Received ping");
                }
                Ok(WsMessage::Pong(_)) => {
                    debug!("Received pong");
                }
                Ok(WsMessage::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    debug!("WebSocket closed: {:?}", reason);
                    let _ = event_tx
                        .send(TransportEvent::Disconnected { reason })
                        .await;
                    announced = true;
                    break;
                }
                Ok(WsMessage::Frame(_)) => {}
                Err(e) => {
                    warn!("WebSocket read error: {}", e);
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    let _ = event_tx
                        .send(TransportEvent::Disconnected {
                            reason: Some(e.to_string()),
                        })
                        .await;
                    announced = true;
                    break;
                }
            }
        }

        if !announced {
            let _ = event_tx
                .send(TransportEvent::Disconnected { reason: None })
                .await;
        }

        *connected_read.lock() = false;
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
    };

    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

/// A connection that finished its WebSocket upgrade
type Upgraded = (WebSocketSender, WebSocketReceiver, Handshake);

/// Upgraded connections waiting for `accept`
const UPGRADE_QUEUE: usize = 64;

/// WebSocket server
///
/// TCP accepts and WebSocket upgrades run in background tasks; `accept`
/// hands out connections in the order their upgrades complete. A socket
/// that never finishes its upgrade is dropped after
/// [`WebSocketConfig::handshake_timeout`] and never delays anyone else.
pub struct WebSocketServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: WebSocketConfig,
    upgraded: Option<mpsc::Receiver<Upgraded>>,
    acceptor: Option<JoinHandle<()>>,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let local_addr = listener.local_addr()?;

        info!("WebSocket server listening on {}", local_addr);

        Ok(Self {
            listener: Some(listener),
            local_addr,
            config: WebSocketConfig::default(),
            upgraded: None,
            acceptor: None,
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    fn start(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or(TransportError::ConnectionClosed)?;
        let (tx, rx) = mpsc::channel(UPGRADE_QUEUE);
        self.acceptor = Some(tokio::spawn(accept_loop(listener, self.config.clone(), tx)));
        self.upgraded = Some(rx);
        Ok(())
    }
}

impl Drop for WebSocketServer {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: WebSocketConfig,
    upgraded: mpsc::Sender<Upgraded>,
) {
    loop {
        let (stream, addr) = tokio::select! {
            _ = upgraded.closed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("TCP accept error: {}", e);
                    continue;
                }
            },
        };

        debug!("Accepted TCP connection from {}", addr);
        let _ = stream.set_nodelay(true);

        let config = config.clone();
        let upgraded = upgraded.clone();
        tokio::spawn(async move {
            match timeout(config.handshake_timeout, upgrade(stream, addr, &config)).await {
                Ok(Ok(connection)) => {
                    let _ = upgraded.send(connection).await;
                }
                Ok(Err(e)) => debug!("WebSocket handshake with {} failed: {}", addr, e),
                Err(_) => warn!(
                    "WebSocket handshake with {} timed out after {:?}",
                    addr, config.handshake_timeout
                ),
            }
        });
    }
}

/// Run the server side of the upgrade, capturing path and query
async fn upgrade(stream: TcpStream, addr: SocketAddr, config: &WebSocketConfig) -> Result<Upgraded> {
    let subprotocol = config.subprotocol.as_str();
    let mut handshake = Handshake::new(addr);

    let callback = |req: &HsRequest,
                    mut response: HsResponse|
     -> std::result::Result<HsResponse, ErrorResponse> {
        handshake.path = req.uri().path().to_string();
        if let Some(query) = req.uri().query() {
            handshake.query = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
        }

        // Client may request multiple protocols, comma-separated
        let requested = req
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|p| p.to_str().ok())
            .map(|p| p.split(',').any(|s| s.trim() == subprotocol))
            .unwrap_or(false);

        if requested {
            if let Ok(value) = HeaderValue::from_str(subprotocol) {
                response
                    .headers_mut()
                    .insert("Sec-WebSocket-Protocol", value);
            }
        }
        Ok(response)
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        callback,
        Some(config.protocol_config()),
    )
    .await
    .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    info!("WebSocket client connected from {}", addr);

    let (sender, receiver) = spawn_io(ws_stream, config.send_queue);
    Ok((sender, receiver, handshake))
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, Handshake)> {
        if self.upgraded.is_none() {
            self.start()?;
        }

        match self.upgraded.as_mut() {
            Some(upgraded) => upgraded
                .recv()
                .await
                .ok_or(TransportError::ConnectionClosed),
            None => Err(TransportError::NotConnected),
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(&self) -> Result<()> {
        if let Some(acceptor) = &self.acceptor {
            acceptor.abort();
        }
        Ok(())
    }
}
