//! Party Client Library
//!
//! Client side of a shared avatar session: the session protocol, a
//! persistent asset cache, and the connection driver that ties them to a
//! relay.
//!
//! # Example
//!
//! ```no_run
//! use party_client::PartyClient;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> party_client::Result<()> {
//!     let client = PartyClient::builder("ws://localhost:3000")
//!         .user_id("alice")
//!         .cache_dir("./avatars")
//!         .connect()
//!         .await?;
//!
//!     client.wait_until_active(Duration::from_secs(5)).await?;
//!     client.send_motion(json!({"blendshapes": {"aa": 0.4}})).await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod client;
pub mod error;
pub mod renderer;
pub mod session;

pub use builder::PartyClientBuilder;
pub use cache::{AssetCache, FsAssetCache, MemoryAssetCache};
pub use client::PartyClient;
pub use error::{CacheError, ClientError, Result};
pub use renderer::{AvatarAsset, NullRenderer, Renderer};
pub use session::{Session, SessionState};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::builder::PartyClientBuilder;
    pub use crate::cache::{AssetCache, FsAssetCache, MemoryAssetCache};
    pub use crate::client::PartyClient;
    pub use crate::error::{ClientError, Result};
    pub use crate::renderer::{AvatarAsset, Renderer};
    pub use crate::session::SessionState;
    pub use party_core::{Envelope, FrameHeader, ParticipantId};
}
