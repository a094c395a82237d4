//! Party Router
//!
//! The relay at the center of a shared avatar session:
//! - Registers participants by the id they connect with
//! - Announces joins and leaves
//! - Routes motion envelopes and asset frames, broadcast or directed
//!
//! Payloads are never inspected beyond the envelope `type` and the
//! binary frame header.
//!
//! # Example
//!
//! ```no_run
//! use party_router::{Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::new(RouterConfig::default());
//!     router.serve_websocket("0.0.0.0:3000").await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod participant;
pub mod registry;
pub mod router;

pub use error::{RegistryError, Result, RouterError};
pub use participant::{ConnectionId, Participant};
pub use registry::{Admission, Departure, Registry};
pub use router::{deliver, route_binary, route_text, DropReason, Route, Router, RouterConfig};
