//! Key types with secure memory handling.
//!
//! A derived key never exists outside a scoped buffer: it is written into
//! secure memory at derivation time and wiped on release, drop or watchdog
//! timeout. Nothing here is serializable; keys are re-derived, not stored.

use std::fmt;

use subtle::ConstantTimeEq;

use crate::memory::ScopedBuffer;
use seedlock_common::Result;

/// Length of derived encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Symmetric key derived from authenticator secret material and a salt.
///
/// Exists only inside a secure-memory scope; the vault uses it once per
/// operation and releases it immediately.
pub struct DerivedKey {
    buf: ScopedBuffer,
}

impl DerivedKey {
    /// Wrap a scoped buffer holding exactly [`KEY_LENGTH`] bytes.
    ///
    /// # Errors
    /// - Returns error if the buffer length is not [`KEY_LENGTH`]
    pub fn from_buffer(buf: ScopedBuffer) -> Result<Self> {
        if buf.len() != KEY_LENGTH {
            return Err(seedlock_common::Error::Crypto(format!(
                "Invalid key length: expected {}, got {}",
                KEY_LENGTH,
                buf.len()
            )));
        }
        Ok(Self { buf })
    }

    /// Run `f` over the raw key bytes without copying them out.
    ///
    /// # Security
    /// The slice must be used immediately and never stored.
    pub fn expose<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.buf.expose(f)
    }

    /// Constant-time equality against another derived key.
    pub fn ct_eq(&self, other: &DerivedKey) -> Result<bool> {
        self.expose(|a| other.expose(|b| a.ct_eq(b).into()))?
    }

    /// Wipe the key now.
    pub fn release(self) {
        self.buf.release();
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}
