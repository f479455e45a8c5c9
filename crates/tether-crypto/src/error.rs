//! Cryptographic error types.

use thiserror::Error;

/// Random number generation failed (OS CSPRNG unavailable).
#[derive(Debug, Error)]
#[error("random number generation failed")]
pub struct RandomError;

/// Key agreement errors.
#[derive(Debug, Error)]
pub enum KeyAgreementError {
    /// OS CSPRNG failure while generating key material or nonces
    #[error(transparent)]
    Random(#[from] RandomError),

    /// `finalize_as_initiator` called without a matching `begin_as_initiator`
    #[error("no pending handshake for peer")]
    NoPendingHandshake,

    /// The answer echoed a nonce that does not match the offer's
    #[error("handshake nonce mismatch")]
    NonceMismatch,

    /// Peer public key has the wrong length or is not valid curve material
    #[error("malformed peer public key: expected {expected} bytes, got {actual}")]
    MalformedPublicKey {
        /// Expected key length
        expected: usize,
        /// Actual length received
        actual: usize,
    },

    /// Peer public key produced an all-zero shared secret (low-order point)
    #[error("peer public key is a low-order point")]
    LowOrderKey,

    /// HKDF expansion failed
    #[error("session key derivation failed")]
    KeyDerivationFailed,

    /// A session key is required but none has been derived for the peer
    #[error("no session key derived for peer")]
    NoSessionKey,
}

/// Envelope pack/unpack errors.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// OS CSPRNG failure while generating an IV
    #[error(transparent)]
    Random(#[from] RandomError),

    /// Envelope version is not handled by this codec
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// A required envelope field is missing or malformed
    #[error("malformed envelope field: {0}")]
    MalformedField(&'static str),

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (tamper or wrong key)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// Legacy HMAC signature did not verify
    #[error("signature verification failed")]
    SignatureMismatch,
}
