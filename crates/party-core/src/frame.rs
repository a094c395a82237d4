//! Binary frame encoding/decoding
//!
//! Asset frame format:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Byte 0-3:   Header Length L (uint32 little-endian)              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Bytes 4..4+L: Header (UTF-8 JSON object)                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Remaining bytes: Body (opaque asset bytes, may be empty)        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `L` is validated against the bytes actually present before anything is
//! sliced, so a lying prefix is reported as malformed instead of panicking.

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;

/// Size of the header length prefix
pub const PREFIX_SIZE: usize = 4;

/// A parsed asset frame. Header and body share the original buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Bytes,
    pub body: Bytes,
}

impl Frame {
    /// Create a frame from already-serialized header JSON and a body
    pub fn new(header: impl Into<Bytes>, body: impl Into<Bytes>) -> Self {
        Self {
            header: header.into(),
            body: body.into(),
        }
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        PREFIX_SIZE + self.header.len() + self.body.len()
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<Bytes> {
        let header_len =
            u32::try_from(self.header.len()).map_err(|_| Error::HeaderTooLarge(self.header.len()))?;

        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u32_le(header_len);
        buf.extend_from_slice(&self.header);
        buf.extend_from_slice(&self.body);

        Ok(buf.freeze())
    }

    /// Split a received frame into header and body without copying.
    ///
    /// Only the length prefix is checked here; the header is parsed by
    /// [`Frame::header_as`].
    pub fn parse(data: Bytes) -> Result<Self> {
        let header_len = declared_header_len(&data)?;
        let remaining = data.len() - PREFIX_SIZE;

        if header_len > remaining {
            return Err(Error::HeaderOverrun {
                declared: header_len,
                remaining,
            });
        }

        let header_end = PREFIX_SIZE + header_len;
        Ok(Self {
            header: data.slice(PREFIX_SIZE..header_end),
            body: data.slice(header_end..),
        })
    }

    /// Parse the header JSON into `H`.
    ///
    /// A header that is not UTF-8 JSON of the expected shape is a
    /// `PROTOCOL_ERROR` ([`Error::Protocol`]); only a short prefix or an
    /// overrunning length is `FRAME_MALFORMED`.
    pub fn header_as<H: DeserializeOwned>(&self) -> Result<H> {
        let text = std::str::from_utf8(&self.header)
            .map_err(|e| Error::Protocol(format!("header is not UTF-8: {}", e)))?;
        serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("header is not valid JSON: {}", e)))
    }

    /// Check whether a buffer holds a frame whose prefix is consistent.
    ///
    /// Returns the header length when it fits within the buffer.
    pub fn check_complete(buf: &[u8]) -> Option<usize> {
        let header_len = declared_header_len(buf).ok()?;
        if buf.len() - PREFIX_SIZE >= header_len {
            Some(header_len)
        } else {
            None
        }
    }
}

fn declared_header_len(buf: &[u8]) -> Result<usize> {
    let prefix: [u8; PREFIX_SIZE] = buf
        .get(..PREFIX_SIZE)
        .and_then(|p| p.try_into().ok())
        .ok_or_else(|| {
            Error::FrameMalformed(format!(
                "need {} prefix bytes, have {}",
                PREFIX_SIZE,
                buf.len()
            ))
        })?;

    Ok(u32::from_le_bytes(prefix) as usize)
}
