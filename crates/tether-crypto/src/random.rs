//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG.

use crate::error::RandomError;

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`RandomError`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), RandomError> {
    getrandom::getrandom(buf).map_err(|_| RandomError)
}

/// Generate a random 12-byte array (AEAD IV size).
///
/// # Errors
///
/// Returns [`RandomError`] if the underlying OS CSPRNG fails.
pub fn random_12() -> Result<[u8; 12], RandomError> {
    let mut buf = [0u8; 12];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a random 16-byte array (handshake nonce size).
///
/// # Errors
///
/// Returns [`RandomError`] if the underlying OS CSPRNG fails.
pub fn random_16() -> Result<[u8; 16], RandomError> {
    let mut buf = [0u8; 16];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a random 32-byte array.
///
/// # Errors
///
/// Returns [`RandomError`] if the underlying OS CSPRNG fails.
pub fn random_32() -> Result<[u8; 32], RandomError> {
    let mut buf = [0u8; 32];
    fill_random(&mut buf)?;
    Ok(buf)
}
