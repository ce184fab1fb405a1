//! Error types for the responder, the correlation store and the correlator

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum NatError {
    /// STUN protocol errors
    #[error("STUN error: {0}")]
    Stun(#[from] StunError),

    /// SDP decoding errors
    #[error("SDP error: {0}")]
    Sdp(#[from] SdpError),

    /// I/O errors outside the receive loop
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The listener socket can no longer be read
    #[error("socket {addr} failed: {source}")]
    SocketFatal {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Audit sink failure
    #[error("Audit log error: {0}")]
    Audit(String),
}

/// STUN decoding errors following RFC 8489 framing rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StunError {
    /// Fewer bytes than the header or the declared length require
    #[error("truncated message: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Invalid magic cookie
    #[error("Invalid magic cookie: expected 0x2112A442, got 0x{0:08X}")]
    InvalidMagicCookie(u32),

    /// The two most significant bits of the message type are not zero
    #[error("Invalid message type: 0x{0:04X}")]
    InvalidMessageType(u16),

    /// Attribute value (with padding) runs past the end of the message
    #[error("attribute 0x{attr_type:04X} declares {length} bytes, {remaining} left")]
    BadAttributeLength {
        attr_type: u16,
        length: usize,
        remaining: usize,
    },

    /// Attribute body does not match its type
    #[error("Failed to parse attribute 0x{attr_type:04X}: {reason}")]
    AttributeParseError { attr_type: u16, reason: String },

    /// Invalid address family
    #[error("Invalid address family: {0}")]
    InvalidAddressFamily(u8),

    /// Message would not fit the 16-bit length field
    #[error("message body of {0} bytes exceeds the STUN length field")]
    MessageTooLarge(usize),
}

/// ICE candidate attribute parsing errors (RFC 8839 Section 5.1)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateParseError {
    #[error("attribute does not start with \"candidate:\"")]
    MissingPrefix,

    #[error("candidate has {0} fields, at least 8 required")]
    TooFewFields(usize),

    #[error("invalid component ID {0:?}")]
    InvalidComponent(String),

    #[error("unsupported transport {0:?}")]
    InvalidTransport(String),

    #[error("invalid priority {0:?}")]
    InvalidPriority(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("invalid connection address {0:?}")]
    InvalidAddress(String),

    #[error("expected \"typ\", found {0:?}")]
    MissingType(String),

    #[error("unknown candidate type {0:?}")]
    UnknownType(String),

    #[error("extension attribute {0:?} has no value")]
    DanglingExtension(String),

    #[error("candidate attribute is not valid UTF-8")]
    InvalidUtf8,
}

/// SDP decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdpError {
    #[error("line {line}: expected \"<type>=<value>\", got {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("session description is empty")]
    Empty,
}

/// Result type for this crate
pub type NatResult<T> = Result<T, NatError>;
