//! Common error types for seedlock.

use thiserror::Error;

/// Top-level error type for seedlock operations.
///
/// Verification failures are returned as typed variants rather than opaque
/// strings because callers react differently to each kind: a ceremony
/// mismatch is final, an expiry means "restart the ceremony", a replay
/// indication is a security event.
#[derive(Debug, Error)]
pub enum Error {
    /// Challenge, relying-party or client-data type did not match the
    /// ceremony. Not retryable.
    #[error("Ceremony mismatch: {0}")]
    CeremonyMismatch(String),

    /// Ceremony or challenge is past its TTL. The caller must start a new
    /// ceremony.
    #[error("Ceremony expired")]
    Expired,

    /// Signature counter did not advance. Indicates a possible cloned
    /// authenticator; never silently retried.
    #[error("Replay or cloned authenticator detected for credential {0}")]
    ReplayOrClone(String),

    /// Attestation statement failed verification.
    #[error("Attestation invalid: {0}")]
    AttestationInvalid(String),

    /// Assertion signature failed verification.
    #[error("Signature invalid")]
    SignatureInvalid,

    /// AEAD authentication failed. Wrong key and tampered ciphertext are
    /// deliberately indistinguishable.
    #[error("Decryption authentication failed")]
    TagMismatch,

    /// Salt deletion blocked because a vault entry still references it.
    #[error("Salt {0} is referenced by a vault entry")]
    SaltInUse(String),

    /// Missing credential, salt, entry or ceremony.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The persistence collaborator failed. The current operation is
    /// aborted without partial writes.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
