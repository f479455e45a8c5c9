//! Ephemeral key agreement.
//!
//! Each handshake runs X25519 between two freshly generated ephemeral key
//! pairs, then derives a 32-byte symmetric session key with HKDF-SHA256.
//! The derivation is bound to both peers' ids, both identity fingerprints,
//! and both handshake nonces, so a key derived for one pairing can never be
//! confused with another.
//!
//! The initiator's ephemeral private key lives in a pending table between
//! offer creation and finalize (or abandonment) and is consumed by the
//! Diffie-Hellman computation; `x25519_dalek::EphemeralSecret` zeroizes
//! itself on drop, so no private material survives either path.

use crate::error::KeyAgreementError;
use crate::random;
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use std::collections::HashMap;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Named curve advertised in key-agreement blocks.
pub const CURVE_NAME: &str = "X25519";

/// Handshake nonce size in bytes.
pub const HANDSHAKE_NONCE_SIZE: usize = 16;

/// Session key size in bytes.
pub const SESSION_KEY_SIZE: usize = 32;

/// X25519 public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// A derived symmetric session key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes. Handle with care.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Public half of a handshake: what gets embedded in an offer or answer.
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    /// Curve name, always [`CURVE_NAME`] for keys generated here
    pub curve: String,
    /// Ephemeral public key
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    /// Fresh handshake nonce
    pub nonce: [u8; HANDSHAKE_NONCE_SIZE],
}

/// Identity binding mixed into the key derivation.
///
/// The ordering is fixed: initiator first, responder second, on both sides
/// of the exchange. This is the tie-break that prevents key confusion when
/// either side could have initiated.
#[derive(Debug, Clone)]
pub struct KeyContext {
    /// Peer id of the side that created the offer
    pub initiator_id: String,
    /// Peer id of the side that answered
    pub responder_id: String,
    /// Initiator's identity fingerprint
    pub initiator_fingerprint: String,
    /// Responder's identity fingerprint
    pub responder_fingerprint: String,
}

impl KeyContext {
    fn info(&self) -> Vec<u8> {
        format!(
            "tether-v2|{}|{}|{}|{}",
            self.initiator_id,
            self.responder_id,
            self.initiator_fingerprint,
            self.responder_fingerprint
        )
        .into_bytes()
    }
}

/// Initiator-side handshake state awaiting an answer.
struct PendingHandshake {
    secret: EphemeralSecret,
    nonce: [u8; HANDSHAKE_NONCE_SIZE],
}

/// Key agreement engine.
///
/// Owns the pending-handshake table for in-flight initiator offers. One
/// instance per session manager; lifetime is tied to the manager, not the
/// process.
#[derive(Default)]
pub struct KeyAgreement {
    pending: HashMap<String, PendingHandshake>,
}

impl KeyAgreement {
    /// Create an engine with no pending handshakes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a handshake as initiator.
    ///
    /// Generates a fresh ephemeral key pair and nonce and stores them
    /// pending under `peer_id`, replacing any stale entry for that peer.
    /// The returned material goes into the offer signal.
    ///
    /// # Errors
    ///
    /// Returns [`KeyAgreementError::Random`] if the OS CSPRNG fails.
    pub fn begin_as_initiator(&mut self, peer_id: &str) -> Result<KeyMaterial, KeyAgreementError> {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public_key = PublicKey::from(&secret);
        let nonce = random::random_16()?;

        self.pending
            .insert(peer_id.to_string(), PendingHandshake { secret, nonce });

        Ok(KeyMaterial {
            curve: CURVE_NAME.to_string(),
            public_key: public_key.to_bytes(),
            nonce,
        })
    }

    /// Run the responder side of a handshake.
    ///
    /// Validates the offer's public key, generates a responder ephemeral
    /// pair and nonce, and derives the session key immediately. The
    /// returned material goes into the answer signal; no responder state is
    /// retained.
    ///
    /// # Errors
    ///
    /// Returns [`KeyAgreementError::MalformedPublicKey`] or
    /// [`KeyAgreementError::LowOrderKey`] for an unusable offer key block,
    /// [`KeyAgreementError::Random`] on CSPRNG failure.
    pub fn begin_as_responder(
        &self,
        offer_public: &[u8],
        offer_nonce: &[u8],
        context: &KeyContext,
    ) -> Result<(SessionKey, KeyMaterial), KeyAgreementError> {
        let peer_public = parse_public_key(offer_public)?;

        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public_key = PublicKey::from(&secret);
        let nonce = random::random_16()?;

        let key = derive_session_key(secret, &peer_public, offer_nonce, &nonce, context)?;

        Ok((
            key,
            KeyMaterial {
                curve: CURVE_NAME.to_string(),
                public_key: public_key.to_bytes(),
                nonce,
            },
        ))
    }

    /// Finalize an initiator handshake from the peer's answer.
    ///
    /// Verifies that the answer echoes the nonce sent in the offer, then
    /// derives the session key with the roles fixed as at offer time. The
    /// pending entry is consumed on success; a nonce mismatch leaves it in
    /// place so an attacker cannot destroy an in-flight handshake with a
    /// forged answer.
    ///
    /// # Errors
    ///
    /// Returns [`KeyAgreementError::NoPendingHandshake`] if no offer is in
    /// flight for `peer_id`, [`KeyAgreementError::NonceMismatch`] if the
    /// echoed nonce differs from the one sent.
    pub fn finalize_as_initiator(
        &mut self,
        peer_id: &str,
        answer_public: &[u8],
        echoed_nonce: &[u8],
        answer_nonce: &[u8],
        context: &KeyContext,
    ) -> Result<SessionKey, KeyAgreementError> {
        let pending = self
            .pending
            .get(peer_id)
            .ok_or(KeyAgreementError::NoPendingHandshake)?;

        if echoed_nonce != pending.nonce.as_slice() {
            return Err(KeyAgreementError::NonceMismatch);
        }
        let peer_public = parse_public_key(answer_public)?;

        // Checks passed: consume the pending entry and its ephemeral secret.
        let pending = self
            .pending
            .remove(peer_id)
            .ok_or(KeyAgreementError::NoPendingHandshake)?;
        let offer_nonce = pending.nonce;

        derive_session_key(
            pending.secret,
            &peer_public,
            &offer_nonce,
            answer_nonce,
            context,
        )
    }

    /// Whether an initiator handshake is in flight for `peer_id`.
    #[must_use]
    pub fn has_pending(&self, peer_id: &str) -> bool {
        self.pending.contains_key(peer_id)
    }

    /// Abandon any in-flight initiator handshake for `peer_id`.
    ///
    /// The ephemeral secret is dropped (and zeroized) immediately. Removal
    /// is idempotent.
    pub fn abandon(&mut self, peer_id: &str) {
        self.pending.remove(peer_id);
    }

    /// Drop every pending handshake.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, KeyAgreementError> {
    let array: [u8; PUBLIC_KEY_SIZE] =
        bytes
            .try_into()
            .map_err(|_| KeyAgreementError::MalformedPublicKey {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
    Ok(PublicKey::from(array))
}

/// ECDH + HKDF-SHA256 derivation shared by both roles.
///
/// `salt = offer_nonce || answer_nonce`, initiator's nonce first on both
/// sides, matching the role ordering in [`KeyContext::info`].
fn derive_session_key(
    secret: EphemeralSecret,
    peer_public: &PublicKey,
    offer_nonce: &[u8],
    answer_nonce: &[u8],
    context: &KeyContext,
) -> Result<SessionKey, KeyAgreementError> {
    let shared = secret.diffie_hellman(peer_public);

    // Reject low-order points: an all-zero shared secret means the peer's
    // key contributed nothing to the exchange.
    if shared.as_bytes() == &[0u8; 32] {
        return Err(KeyAgreementError::LowOrderKey);
    }

    let mut salt = Vec::with_capacity(offer_nonce.len() + answer_nonce.len());
    salt.extend_from_slice(offer_nonce);
    salt.extend_from_slice(answer_nonce);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut okm = [0u8; SESSION_KEY_SIZE];
    hk.expand(&context.info(), &mut okm)
        .map_err(|_| KeyAgreementError::KeyDerivationFailed)?;

    Ok(SessionKey::from_bytes(okm))
}
