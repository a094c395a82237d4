//! Party codec
//!
//! Two wire forms share one connection:
//! - text: a single JSON [`Envelope`] per message
//! - binary: a length-prefixed [`Frame`] with a JSON header and opaque body
//!
//! Neither function here looks at what a message means.

use crate::{Envelope, Error, Frame, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a header and body into one binary frame
pub fn encode<H: Serialize>(header: &H, body: &[u8]) -> Result<Bytes> {
    let header = serde_json::to_vec(header).map_err(|e| Error::EncodeError(e.to_string()))?;
    Frame::new(header, Bytes::copy_from_slice(body)).encode()
}

/// Decode a binary frame into its header and body
pub fn decode<H: DeserializeOwned>(frame: &[u8]) -> Result<(H, Bytes)> {
    decode_bytes(Bytes::copy_from_slice(frame))
}

/// Decode a binary frame that is already held in `Bytes`, without copying the body
pub fn decode_bytes<H: DeserializeOwned>(frame: Bytes) -> Result<(H, Bytes)> {
    let frame = Frame::parse(frame)?;
    let header = frame.header_as()?;
    Ok((header, frame.body))
}

/// Encode an envelope as a text message
pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| Error::EncodeError(e.to_string()))
}

/// Decode a text message into an envelope
pub fn decode_envelope(text: &str) -> Result<Envelope> {
    serde_json::from_str(text).map_err(|e| Error::Protocol(e.to_string()))
}
