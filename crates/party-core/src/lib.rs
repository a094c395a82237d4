//! Party Core
//!
//! Core types and wire formats for the party relay protocol.
//!
//! This crate provides:
//! - Text envelope types ([`Envelope`])
//! - Asset frame headers ([`FrameHeader`])
//! - Length-prefixed binary framing ([`Frame`], [`codec`])
//!
//! It has no knowledge of routing; the relay and the client share it as-is.

pub mod codec;
pub mod error;
pub mod frame;
pub mod types;

pub use codec::{decode, decode_bytes, decode_envelope, encode, encode_envelope};
pub use error::{Error, ErrorKind, Result};
pub use frame::Frame;
pub use types::*;

/// Default WebSocket port
pub const DEFAULT_WS_PORT: u16 = 3000;

/// Query parameter carrying the participant id at connect time
pub const USER_ID_PARAM: &str = "userId";

/// WebSocket subprotocol identifier
pub const WS_SUBPROTOCOL: &str = "party.v1";
