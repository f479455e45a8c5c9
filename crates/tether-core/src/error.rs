//! Error types for the Tether protocol core.

use thiserror::Error;

/// Signal and version errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Protocol version outside the supported range
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    /// Signal `type` field is not a known kind
    #[error("unknown signal type: {0}")]
    UnknownSignalType(String),

    /// Token or payload failed schema validation
    #[error("malformed signal: {0}")]
    MalformedSignal(&'static str),

    /// A field the negotiated flow requires is absent
    #[error("missing signal field: {0}")]
    MissingField(&'static str),

    /// Application payload could not be encoded or decoded
    #[error("payload codec error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer channel is not open
    #[error("channel not open")]
    ChannelNotOpen,

    /// The underlying channel rejected the frame
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Core protocol errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Signal or version error
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key agreement error
    #[error("key agreement error: {0}")]
    KeyAgreement(#[from] tether_crypto::KeyAgreementError),

    /// Envelope error
    #[error("envelope error: {0}")]
    Envelope(#[from] tether_crypto::EnvelopeError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
