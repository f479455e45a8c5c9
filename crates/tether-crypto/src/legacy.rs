//! Legacy pre-shared-secret envelopes (version 1, deprecated).
//!
//! Retained only for interoperating with peers that predate ephemeral key
//! agreement. The shared secret travels inside the (out-of-band) offer, the
//! AEAD key is a bare SHA-256 of it, and envelopes carry an HMAC-SHA256
//! signature over the visible fields instead of sequence numbers.
//!
//! This mode is strictly weaker than the v2 channel: there is no replay
//! protection and no per-peer key binding. Callers must treat it as an
//! interop fallback, never a default.

use crate::envelope::{IV_SIZE, OpenedEnvelope, TAG_SIZE, epoch_millis};
use crate::error::{EnvelopeError, RandomError};
use crate::random;
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Legacy envelope version.
pub const LEGACY_VERSION: u8 = 1;

type HmacSha256 = Hmac<Sha256>;

/// A pre-agreed shared secret for the legacy channel. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LegacySecret(String);

impl LegacySecret {
    /// Wrap a secret carried in an offer or answer signal.
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self(secret)
    }

    /// Mint a fresh random secret (32 CSPRNG bytes, hex-encoded).
    ///
    /// # Errors
    ///
    /// Returns [`RandomError`] if the OS CSPRNG fails.
    pub fn generate() -> Result<Self, RandomError> {
        Ok(Self(hex::encode(random::random_32()?)))
    }

    /// The secret as it appears in signal payloads.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// AEAD key derivation: SHA-256 of the plain secret.
    fn aead_key(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }
}

impl std::fmt::Debug for LegacySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LegacySecret(..)")
    }
}

/// A v1 envelope as it travels over the peer channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyEnvelope {
    /// Envelope version; older peers omit the field entirely
    #[serde(default = "default_version")]
    pub version: u8,
    /// Sender peer id
    pub sender: String,
    /// Send timestamp, epoch milliseconds
    pub sent_at: u64,
    /// Random AEAD IV
    #[serde(with = "crate::serde_hex")]
    pub iv: Vec<u8>,
    /// Detached authentication tag
    #[serde(with = "crate::serde_hex")]
    pub tag: Vec<u8>,
    /// Ciphertext without the tag
    #[serde(with = "crate::serde_hex")]
    pub ciphertext: Vec<u8>,
    /// HMAC-SHA256 over the fields above, keyed by the plain secret
    #[serde(with = "crate::serde_hex")]
    pub signature: Vec<u8>,
}

fn default_version() -> u8 {
    LEGACY_VERSION
}

/// The byte string covered by the envelope signature.
fn signing_input(sender: &str, sent_at: u64, iv: &[u8], tag: &[u8], ciphertext: &[u8]) -> Vec<u8> {
    format!(
        "{sender}|{sent_at}|{}|{}|{}",
        hex::encode(iv),
        hex::encode(tag),
        hex::encode(ciphertext)
    )
    .into_bytes()
}

fn sign(secret: &LegacySecret, input: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.expose().as_bytes())
        .map_err(|_| EnvelopeError::EncryptionFailed)?;
    mac.update(input);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Encrypt and sign a payload into a v1 envelope.
///
/// # Errors
///
/// Returns [`EnvelopeError::MalformedField`] for an empty sender,
/// [`EnvelopeError::Random`] on CSPRNG failure,
/// [`EnvelopeError::EncryptionFailed`] if AEAD encryption fails.
pub fn pack_legacy(
    payload: &[u8],
    secret: &LegacySecret,
    sender: &str,
) -> Result<LegacyEnvelope, EnvelopeError> {
    if sender.is_empty() {
        return Err(EnvelopeError::MalformedField("sender"));
    }

    let sent_at = epoch_millis();
    let iv = random::random_12()?;

    let cipher = ChaCha20Poly1305::new(&secret.aead_key().into());
    let mut sealed = cipher
        .encrypt(
            Nonce::from_slice(&iv),
            Payload {
                msg: payload,
                aad: b"",
            },
        )
        .map_err(|_| EnvelopeError::EncryptionFailed)?;
    let tag = sealed.split_off(sealed.len() - TAG_SIZE);

    let signature = sign(secret, &signing_input(sender, sent_at, &iv, &tag, &sealed))?;

    Ok(LegacyEnvelope {
        version: LEGACY_VERSION,
        sender: sender.to_string(),
        sent_at,
        iv: iv.to_vec(),
        tag,
        ciphertext: sealed,
        signature,
    })
}

/// Verify and decrypt a v1 envelope.
///
/// The signature is verified in constant time **before** any decryption is
/// attempted, so attacker-controlled ciphertext is never fed to the cipher
/// under an unverified key.
///
/// # Errors
///
/// Returns [`EnvelopeError::SignatureMismatch`] if the HMAC does not verify
/// under `secret`, [`EnvelopeError::MalformedField`] for wrong-size IV/tag,
/// [`EnvelopeError::AuthenticationFailed`] if decryption fails after a
/// valid signature.
pub fn unpack_legacy(
    envelope: &LegacyEnvelope,
    secret: &LegacySecret,
) -> Result<OpenedEnvelope, EnvelopeError> {
    if envelope.version != LEGACY_VERSION {
        return Err(EnvelopeError::UnsupportedVersion(envelope.version));
    }
    if envelope.sender.is_empty() {
        return Err(EnvelopeError::MalformedField("sender"));
    }

    let input = signing_input(
        &envelope.sender,
        envelope.sent_at,
        &envelope.iv,
        &envelope.tag,
        &envelope.ciphertext,
    );
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.expose().as_bytes())
        .map_err(|_| EnvelopeError::SignatureMismatch)?;
    mac.update(&input);
    mac.verify_slice(&envelope.signature)
        .map_err(|_| EnvelopeError::SignatureMismatch)?;

    if envelope.iv.len() != IV_SIZE {
        return Err(EnvelopeError::MalformedField("iv"));
    }
    if envelope.tag.len() != TAG_SIZE {
        return Err(EnvelopeError::MalformedField("tag"));
    }

    let mut sealed = Vec::with_capacity(envelope.ciphertext.len() + TAG_SIZE);
    sealed.extend_from_slice(&envelope.ciphertext);
    sealed.extend_from_slice(&envelope.tag);

    let cipher = ChaCha20Poly1305::new(&secret.aead_key().into());
    let payload = cipher
        .decrypt(
            Nonce::from_slice(&envelope.iv),
            Payload {
                msg: &sealed,
                aad: b"",
            },
        )
        .map_err(|_| EnvelopeError::AuthenticationFailed)?;

    Ok(OpenedEnvelope {
        payload,
        sender: envelope.sender.clone(),
        sent_at: envelope.sent_at,
        seq: 0,
    })
}
