//! Error types for the party protocol

use thiserror::Error;

/// Result type alias for party protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Party protocol error types
#[derive(Error, Debug)]
pub enum Error {
    /// Text envelope that is not a JSON object with a `type` field
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Binary frame whose length prefix or header cannot be trusted
    #[error("malformed frame: {0}")]
    FrameMalformed(String),

    /// Declared header length runs past the end of the frame
    #[error("header length {declared} exceeds remaining {remaining} bytes")]
    HeaderOverrun { declared: usize, remaining: usize },

    /// Header JSON longer than the u32 length prefix can describe
    #[error("header too large: {0} bytes")]
    HeaderTooLarge(usize),

    /// JSON encoding error
    #[error("encode error: {0}")]
    EncodeError(String),
}

/// Taxonomy class of an error, used as a structured logging field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed JSON envelope; the message is dropped
    Protocol,
    /// Unreadable binary frame; the frame is dropped
    FrameMalformed,
    /// Local encoding failure
    Encode,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Protocol => "PROTOCOL_ERROR",
            ErrorKind::FrameMalformed => "FRAME_MALFORMED",
            ErrorKind::Encode => "ENCODE_ERROR",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::FrameMalformed(_) | Error::HeaderOverrun { .. } => ErrorKind::FrameMalformed,
            Error::HeaderTooLarge(_) | Error::EncodeError(_) => ErrorKind::Encode,
        }
    }

    /// True when the error describes an unreadable binary frame
    pub fn is_frame_malformed(&self) -> bool {
        self.kind() == ErrorKind::FrameMalformed
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
