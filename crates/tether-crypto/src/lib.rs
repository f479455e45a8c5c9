//! # Tether Crypto
//!
//! Cryptographic primitives for the Tether pairing protocol.
//!
//! This crate provides:
//! - Ephemeral X25519 key agreement with HKDF-SHA256 session-key derivation
//! - `ChaCha20-Poly1305` AEAD envelopes with metadata bound as associated data
//! - The deprecated v1 pre-shared-secret codec (HMAC-SHA256 signed)
//! - Profile identities and fingerprints
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Notes |
//! |----------|-----------|-------|
//! | Key Exchange | X25519 | ephemeral, per handshake |
//! | KDF | HKDF-SHA256 | salt = both nonces, info = both identities |
//! | AEAD | ChaCha20-Poly1305 | 96-bit IV, detached 128-bit tag |
//! | Fingerprint | SHA-256, truncated | 16 bytes, hex |
//! | Legacy MAC | HMAC-SHA256 | v1 interop only |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod agreement;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod legacy;
pub mod random;
pub mod serde_hex;

pub use agreement::{
    CURVE_NAME, HANDSHAKE_NONCE_SIZE, KeyAgreement, KeyContext, KeyMaterial, PUBLIC_KEY_SIZE,
    SESSION_KEY_SIZE, SessionKey,
};
pub use envelope::{ENVELOPE_VERSION, IV_SIZE, OpenedEnvelope, SecureEnvelope, TAG_SIZE};
pub use error::{EnvelopeError, KeyAgreementError, RandomError};
pub use identity::{FINGERPRINT_BYTES, Identity, MemorySeedStore, SEED_SIZE, SeedStore};
pub use legacy::{LEGACY_VERSION, LegacyEnvelope, LegacySecret};
