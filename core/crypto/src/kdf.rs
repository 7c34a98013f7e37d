//! Key derivation using PBKDF2-HMAC-SHA256.
//!
//! The authenticator secret material is the password-equivalent input and a
//! per-credential salt is the salt input. Derivation is deterministic: the
//! same (secret, salt, iterations) triple always yields the same key, which
//! is what lets the vault re-derive the key at decryption time without ever
//! persisting it.

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::keys::{DerivedKey, KEY_LENGTH};
use crate::memory::SecureMemory;
use seedlock_common::{Error, Result};

/// Minimum accepted salt length in bytes.
pub const MIN_SALT_LENGTH: usize = 16;

/// Parameters for PBKDF2 key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Number of PBKDF2 iterations.
    pub iterations: u32,
}

impl KdfParams {
    /// Default iteration count for interactive use.
    pub const DEFAULT_ITERATIONS: u32 = 100_000;

    /// Create parameters with the given iteration count.
    ///
    /// # Errors
    /// - Returns error if `iterations` is zero
    pub fn new(iterations: u32) -> Result<Self> {
        if iterations == 0 {
            return Err(Error::InvalidInput(
                "KDF iteration count must be at least 1".to_string(),
            ));
        }
        Ok(Self { iterations })
    }

    /// Reduced parameters for tests (fast but insecure).
    #[cfg(test)]
    pub fn fast() -> Self {
        Self { iterations: 10 }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: Self::DEFAULT_ITERATIONS,
        }
    }
}

/// Derive a 256-bit key from authenticator secret material and a salt.
///
/// The key is written directly into a scoped buffer acquired from
/// `memory`; the intermediate stack copy is zeroized before returning.
///
/// # Errors
/// - Returns error if `secret` is empty
/// - Returns error if `salt` is shorter than [`MIN_SALT_LENGTH`]
pub fn derive_key(
    memory: &SecureMemory,
    secret: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<DerivedKey> {
    if secret.is_empty() {
        return Err(Error::InvalidInput(
            "Secret material cannot be empty".to_string(),
        ));
    }
    if salt.len() < MIN_SALT_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Salt too short: expected at least {} bytes, got {}",
            MIN_SALT_LENGTH,
            salt.len()
        )));
    }

    let mut output = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(secret, salt, params.iterations, &mut output);

    let buf = memory.acquire_from(&output)?;
    output.zeroize();

    DerivedKey::from_buffer(buf)
}
