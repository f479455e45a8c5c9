//! Secure channel envelopes (version 2).
//!
//! ChaCha20-Poly1305 AEAD over a derived session key. Every envelope
//! carries a fresh random 12-byte IV, a per-sender sequence number starting
//! at 1, and a detached 16-byte tag. The sender id, timestamp, and sequence
//! are bound as associated data, so tampering with any metadata field fails
//! authentication even though the fields travel in the clear.
//!
//! The codec is stateless: replay checking against the receiver's
//! high-water mark is the session manager's job.

use crate::agreement::SessionKey;
use crate::error::EnvelopeError;
use crate::random;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};

/// Current envelope version.
pub const ENVELOPE_VERSION: u8 = 2;

/// AEAD IV size (12 bytes / 96 bits).
pub const IV_SIZE: usize = 12;

/// Authentication tag size (16 bytes / 128 bits).
pub const TAG_SIZE: usize = 16;

/// An encrypted envelope as it travels over the peer channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecureEnvelope {
    /// Envelope version, always 2 for this codec
    pub version: u8,
    /// Sender peer id
    pub sender: String,
    /// Send timestamp, epoch milliseconds
    pub sent_at: u64,
    /// Per-sender sequence number, starts at 1
    pub seq: u64,
    /// Random AEAD IV
    #[serde(with = "crate::serde_hex")]
    pub iv: Vec<u8>,
    /// Ciphertext without the tag
    #[serde(with = "crate::serde_hex")]
    pub ciphertext: Vec<u8>,
    /// Detached authentication tag
    #[serde(with = "crate::serde_hex")]
    pub tag: Vec<u8>,
}

/// A decrypted envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedEnvelope {
    /// Decrypted application payload bytes
    pub payload: Vec<u8>,
    /// Sender peer id
    pub sender: String,
    /// Send timestamp, epoch milliseconds
    pub sent_at: u64,
    /// Sequence number (0 for legacy envelopes, which carry none)
    pub seq: u64,
}

fn associated_data(sender: &str, sent_at: u64, seq: u64) -> Vec<u8> {
    format!("{sender}|{sent_at}|{seq}").into_bytes()
}

pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Encrypt `payload` into a v2 envelope.
///
/// Generates a fresh random IV per call; IVs are never reused for a given
/// key because every call draws new CSPRNG output.
///
/// # Errors
///
/// Returns [`EnvelopeError::MalformedField`] for an empty sender or a zero
/// sequence number, [`EnvelopeError::Random`] on CSPRNG failure,
/// [`EnvelopeError::EncryptionFailed`] if AEAD encryption fails.
pub fn pack(
    payload: &[u8],
    key: &SessionKey,
    sender: &str,
    seq: u64,
) -> Result<SecureEnvelope, EnvelopeError> {
    if sender.is_empty() {
        return Err(EnvelopeError::MalformedField("sender"));
    }
    if seq == 0 {
        return Err(EnvelopeError::MalformedField("seq"));
    }

    let sent_at = epoch_millis();
    let iv = random::random_12()?;
    let aad = associated_data(sender, sent_at, seq);

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: payload,
                aad: &aad,
            },
        )
        .map_err(|_| EnvelopeError::EncryptionFailed)?;

    let tag = sealed.split_off(sealed.len() - TAG_SIZE);

    Ok(SecureEnvelope {
        version: ENVELOPE_VERSION,
        sender: sender.to_string(),
        sent_at,
        seq,
        iv: iv.to_vec(),
        ciphertext: sealed,
        tag,
    })
}

/// Authenticate and decrypt a v2 envelope.
///
/// Reconstructs the associated data from the envelope's visible fields; a
/// flipped bit anywhere in the ciphertext, tag, or metadata fails
/// authentication.
///
/// # Errors
///
/// Returns [`EnvelopeError::UnsupportedVersion`] for non-v2 envelopes,
/// [`EnvelopeError::MalformedField`] for missing metadata or wrong-size
/// IV/tag, [`EnvelopeError::AuthenticationFailed`] on tamper or key
/// mismatch.
pub fn unpack(envelope: &SecureEnvelope, key: &SessionKey) -> Result<OpenedEnvelope, EnvelopeError> {
    if envelope.version != ENVELOPE_VERSION {
        return Err(EnvelopeError::UnsupportedVersion(envelope.version));
    }
    if envelope.sender.is_empty() {
        return Err(EnvelopeError::MalformedField("sender"));
    }
    if envelope.seq == 0 {
        return Err(EnvelopeError::MalformedField("seq"));
    }
    if envelope.iv.len() != IV_SIZE {
        return Err(EnvelopeError::MalformedField("iv"));
    }
    if envelope.tag.len() != TAG_SIZE {
        return Err(EnvelopeError::MalformedField("tag"));
    }

    let aad = associated_data(&envelope.sender, envelope.sent_at, envelope.seq);

    let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(&envelope.ciphertext);
    sealed.extend_from_slice(&envelope.tag);

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let payload = cipher
        .decrypt(
            Nonce::from_slice(&envelope.iv),
            Payload {
                msg: &sealed,
                aad: &aad,
            },
        )
        .map_err(|_| EnvelopeError::AuthenticationFailed)?;

    Ok(OpenedEnvelope {
        payload,
        sender: envelope.sender.clone(),
        sent_at: envelope.sent_at,
        seq: envelope.seq,
    })
}
