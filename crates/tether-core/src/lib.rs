//! # Tether Core
//!
//! Protocol core for Tether: two devices pair via out-of-band offer/answer
//! tokens, derive a per-session key, and exchange authenticated encrypted
//! envelopes over a direct peer channel with no server in the data path.
//!
//! This crate provides:
//! - Signal token encoding/decoding with schema validation
//! - The application payload model
//! - Per-peer session state and the connection state machine
//! - The session manager orchestrating codecs, transport, and events
//! - Reconnection scheduling with exponential backoff and jitter
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                       SessionManager                           │
//! │  (per-peer sessions, state machine, inbound/outbound routing)  │
//! ├──────────────┬──────────────────────────┬──────────────────────┤
//! │ Signal Codec │   Envelope Codecs (v2/v1)│ Reconnect Scheduler  │
//! │ (offer/answer│   (tether-crypto)        │ (backoff + jitter)   │
//! │  tokens)     │                          │                      │
//! ├──────────────┴──────────────────────────┴──────────────────────┤
//! │              Transport collaborator (ordered, reliable)        │
//! └────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod manager;
pub mod payload;
pub mod reconnect;
pub mod session;
pub mod signal;
pub mod transport;

pub use error::{Error, ProtocolError, TransportError};
pub use manager::{ManagerConfig, SessionEvent, SessionManager, SignalOutcome, SignalStatus};
pub use payload::AppPayload;
pub use reconnect::{ReconnectConfig, ReconnectScheduler};
pub use session::{ConnectionState, PeerSession, SessionCipher};
pub use signal::{
    AnswerSignal, KeyAgreementBlock, LEGACY_PROTOCOL_VERSION, LEGACY_SIGNAL_PREFIX, OfferSignal,
    PROTOCOL_VERSION, SIGNAL_PREFIX, Signal, TransportDescriptor, decode_signal, encode_signal,
};
pub use transport::{ChannelEvent, Transport};
