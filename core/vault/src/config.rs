//! Vault configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

use seedlock_common::bytes::base64;
use seedlock_common::{Error, Result};
use seedlock_crypto::kdf::KdfParams;
use seedlock_crypto::AeadAlgorithm;
use seedlock_webauthn::{CeremonySettings, RelyingParty, UserVerification};

/// Minimum accepted server secret length in bytes.
pub const MIN_SERVER_SECRET_LENGTH: usize = 32;

/// Complete configuration for a [`crate::SeedLock`] instance.
///
/// Serde round-trippable so deployments can keep it in a config file. The
/// server secret serializes as base64 and is redacted from Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Relying party id (a registrable domain suffix).
    pub rp_id: String,
    /// Human-readable relying party name.
    pub rp_name: String,
    /// Origin expected in client data.
    pub origin: String,
    /// User-verification policy for ceremonies.
    pub user_verification: UserVerification,
    /// Whether the user-presence (touch) flag is enforced.
    pub require_touch: bool,
    /// AEAD cipher for sealed seeds.
    pub aead: AeadAlgorithm,
    /// PBKDF2 iteration count.
    pub kdf_iterations: u32,
    /// Secure-memory watchdog timeout in seconds.
    pub memory_timeout_secs: u64,
    /// Ceremony time-to-live in seconds.
    pub ceremony_timeout_secs: u64,
    /// Server-held secret mixed into per-credential key material.
    #[serde(with = "base64")]
    pub server_secret: Vec<u8>,
}

impl VaultConfig {
    /// Configuration with defaults for everything but the relying party
    /// identity and the server secret.
    pub fn new(
        rp_id: impl Into<String>,
        rp_name: impl Into<String>,
        origin: impl Into<String>,
        server_secret: Vec<u8>,
    ) -> Self {
        Self {
            rp_id: rp_id.into(),
            rp_name: rp_name.into(),
            origin: origin.into(),
            user_verification: UserVerification::Preferred,
            require_touch: true,
            aead: AeadAlgorithm::default(),
            kdf_iterations: KdfParams::DEFAULT_ITERATIONS,
            memory_timeout_secs: 60,
            ceremony_timeout_secs: 300,
            server_secret,
        }
    }

    /// Check the configuration for values that cannot work.
    ///
    /// # Errors
    /// - Returns error for empty rp id/origin, a zero iteration count, a
    ///   zero memory or ceremony timeout, or a short server secret
    pub fn validate(&self) -> Result<()> {
        if self.rp_id.is_empty() {
            return Err(Error::InvalidInput("rp_id cannot be empty".to_string()));
        }
        if self.origin.is_empty() {
            return Err(Error::InvalidInput("origin cannot be empty".to_string()));
        }
        if self.kdf_iterations == 0 {
            return Err(Error::InvalidInput(
                "kdf_iterations must be at least 1".to_string(),
            ));
        }
        if self.memory_timeout_secs == 0 || self.ceremony_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "Timeouts must be at least one second".to_string(),
            ));
        }
        if self.server_secret.len() < MIN_SERVER_SECRET_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Server secret too short: expected at least {} bytes, got {}",
                MIN_SERVER_SECRET_LENGTH,
                self.server_secret.len()
            )));
        }
        Ok(())
    }

    /// Relying party identity for ceremony binding.
    pub fn relying_party(&self) -> RelyingParty {
        RelyingParty {
            id: self.rp_id.clone(),
            name: self.rp_name.clone(),
            origin: self.origin.clone(),
        }
    }

    /// Ceremony policy derived from this configuration.
    pub fn ceremony_settings(&self) -> CeremonySettings {
        CeremonySettings {
            user_verification: self.user_verification,
            require_touch: self.require_touch,
            ttl_secs: self.ceremony_timeout_secs,
        }
    }

    /// KDF parameters derived from this configuration.
    ///
    /// # Errors
    /// - Returns error if the iteration count is zero
    pub fn kdf_params(&self) -> Result<KdfParams> {
        KdfParams::new(self.kdf_iterations)
    }

    /// Serialize to JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Deserialize from JSON bytes and validate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("rp_id", &self.rp_id)
            .field("rp_name", &self.rp_name)
            .field("origin", &self.origin)
            .field("user_verification", &self.user_verification)
            .field("require_touch", &self.require_touch)
            .field("aead", &self.aead)
            .field("kdf_iterations", &self.kdf_iterations)
            .field("memory_timeout_secs", &self.memory_timeout_secs)
            .field("ceremony_timeout_secs", &self.ceremony_timeout_secs)
            .field("server_secret", &"[REDACTED]")
            .finish()
    }
}
