//! Profile identity and fingerprints.
//!
//! An identity is a 32-byte private seed created once at profile creation.
//! The seed is never transmitted; only its fingerprint (a truncated SHA-256
//! digest, hex-encoded) appears on the wire, where peers use it to bind
//! session keys to both parties.

use crate::error::RandomError;
use crate::random;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Private seed size in bytes.
pub const SEED_SIZE: usize = 32;

/// Fingerprint length in bytes before hex encoding.
pub const FINGERPRINT_BYTES: usize = 16;

/// A local profile identity.
///
/// The private seed is zeroized on drop. Only the fingerprint is exposed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Identity {
    seed: [u8; SEED_SIZE],
    #[zeroize(skip)]
    fingerprint: String,
}

impl Identity {
    /// Build an identity from an existing seed (e.g. loaded from storage).
    #[must_use]
    pub fn from_seed(seed: [u8; SEED_SIZE]) -> Self {
        let digest = Sha256::digest(seed);
        let fingerprint = hex::encode(&digest[..FINGERPRINT_BYTES]);
        Self { seed, fingerprint }
    }

    /// Generate a fresh identity from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`RandomError`] if the CSPRNG fails.
    pub fn generate() -> Result<Self, RandomError> {
        Ok(Self::from_seed(random::random_32()?))
    }

    /// The public fingerprint (hex, 32 characters).
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Identity storage collaborator.
///
/// Supplies the persistent 32-byte seed. The protocol core only reads the
/// seed to compute the fingerprint once per profile; it never writes it.
pub trait SeedStore {
    /// Storage-specific error type.
    type Error;

    /// Load the stored seed, creating and persisting one if absent.
    ///
    /// # Errors
    ///
    /// Returns the store's error type on load or persist failure.
    fn load_or_create(&mut self) -> Result<[u8; SEED_SIZE], Self::Error>;
}

/// In-memory seed store for tests and ephemeral profiles.
#[derive(Debug, Default)]
pub struct MemorySeedStore {
    seed: Option<[u8; SEED_SIZE]>,
}

impl SeedStore for MemorySeedStore {
    type Error = RandomError;

    fn load_or_create(&mut self) -> Result<[u8; SEED_SIZE], RandomError> {
        match self.seed {
            Some(seed) => Ok(seed),
            None => {
                let seed = random::random_32()?;
                self.seed = Some(seed);
                Ok(seed)
            }
        }
    }
}
