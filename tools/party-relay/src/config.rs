//! Relay configuration file
//!
//! Optional TOML file. Every key is optional; command-line flags win.
//!
//! ```toml
//! listen = "0.0.0.0:3000"
//! name = "Studio Relay"
//! max_participants = 64
//! broadcast_untargeted_frames = true
//!
//! [websocket]
//! max_message_size = 67108864
//! send_queue = 512
//! handshake_timeout_secs = 5
//! ```

use anyhow::{Context, Result};
use party_router::RouterConfig;
use party_transport::WebSocketConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub listen: Option<SocketAddr>,
    pub name: Option<String>,
    pub id_param: Option<String>,
    pub max_participants: Option<usize>,
    pub event_queue: Option<usize>,
    pub broadcast_untargeted_frames: Option<bool>,
    pub websocket: WebSocketSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebSocketSection {
    pub subprotocol: Option<String>,
    pub max_message_size: Option<usize>,
    pub send_queue: Option<usize>,
    pub handshake_timeout_secs: Option<u64>,
}

impl RelayConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn router_config(&self) -> RouterConfig {
        let defaults = RouterConfig::default();
        RouterConfig {
            name: self.name.clone().unwrap_or(defaults.name),
            id_param: self.id_param.clone().unwrap_or(defaults.id_param),
            max_participants: self.max_participants.unwrap_or(defaults.max_participants),
            event_queue: self.event_queue.unwrap_or(defaults.event_queue),
            broadcast_untargeted_frames: self
                .broadcast_untargeted_frames
                .unwrap_or(defaults.broadcast_untargeted_frames),
        }
    }

    pub fn websocket_config(&self) -> WebSocketConfig {
        let defaults = WebSocketConfig::default();
        let ws = &self.websocket;
        WebSocketConfig {
            subprotocol: ws.subprotocol.clone().unwrap_or(defaults.subprotocol),
            max_message_size: ws.max_message_size.unwrap_or(defaults.max_message_size),
            send_queue: ws.send_queue.unwrap_or(defaults.send_queue),
            handshake_timeout: ws
                .handshake_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.handshake_timeout),
        }
    }
}
