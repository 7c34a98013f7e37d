//! Per-credential salt lifecycle.
//!
//! A salt binds a derived key to one credential and one purpose. Issuing a
//! new salt for a pair deactivates the previous one without deleting it, so
//! entries sealed under the old salt stay decryptable. Deletion is refused
//! while any vault entry still references the salt; that check and the
//! vault's entry writes share one lock so they cannot interleave.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use seedlock_common::bytes::base64;
use seedlock_common::{CredentialId, Error, Purpose, Result, SaltId};
use seedlock_crypto::kdf::MIN_SALT_LENGTH;
use seedlock_storage::KvStore;

/// Length of issued salt values in bytes.
pub const SALT_LENGTH: usize = 32;

/// Persisted salt record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaltRecord {
    pub salt_id: SaltId,
    /// Credential the salt is bound to.
    pub credential_id: CredentialId,
    /// Purpose the salt is scoped to.
    pub purpose: Purpose,
    /// Random salt value.
    #[serde(with = "base64")]
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Last time a key was derived from this salt for decryption.
    pub last_used: Option<DateTime<Utc>>,
    /// Whether this is the current salt for its (credential, purpose) pair.
    pub active: bool,
}

/// Sees only the field it needs when scanning vault entries for references.
#[derive(Deserialize)]
struct SaltReference {
    salt_id: SaltId,
}

/// Manages salt issuance, rotation and referential integrity.
pub struct SaltManager {
    store: Arc<dyn KvStore>,
    /// Shared with the vault: held across the reference scan in `delete`
    /// and across the vault's salt-check-then-write.
    ref_lock: Arc<Mutex<()>>,
}

impl SaltManager {
    /// Create a manager over the given store.
    ///
    /// `ref_lock` must be the same lock the vault uses around entry writes.
    pub fn new(store: Arc<dyn KvStore>, ref_lock: Arc<Mutex<()>>) -> Self {
        Self { store, ref_lock }
    }

    fn record_key(salt_id: &SaltId) -> String {
        format!("salt/{}", salt_id)
    }

    fn active_key(credential_id: &CredentialId, purpose: Purpose) -> String {
        format!("salt_active/{}/{}", credential_id.encoded(), purpose)
    }

    /// Generate a random salt value of `length` bytes.
    ///
    /// # Errors
    /// - Returns error if `length` is below the KDF minimum
    pub fn random_salt(length: usize) -> Result<Vec<u8>> {
        if length < MIN_SALT_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Salt length {} below minimum {}",
                length, MIN_SALT_LENGTH
            )));
        }
        let mut value = vec![0u8; length];
        rand::rngs::OsRng.fill_bytes(&mut value);
        Ok(value)
    }

    /// Issue a fresh active salt for a (credential, purpose) pair.
    ///
    /// Any previously active salt for the pair is deactivated but kept, so
    /// entries sealed under it remain decryptable.
    pub async fn issue(
        &self,
        credential_id: &CredentialId,
        purpose: Purpose,
    ) -> Result<SaltRecord> {
        if let Some(previous) = self.get_active_opt(credential_id, purpose).await? {
            let mut previous = previous;
            previous.active = false;
            self.put_record(&previous).await?;
        }

        let record = SaltRecord {
            salt_id: SaltId::generate(),
            credential_id: credential_id.clone(),
            purpose,
            value: Self::random_salt(SALT_LENGTH)?,
            created_at: Utc::now(),
            last_used: None,
            active: true,
        };
        self.put_record(&record).await?;
        self.store
            .put(
                &Self::active_key(credential_id, purpose),
                record.salt_id.as_str().as_bytes().to_vec(),
            )
            .await?;

        debug!(credential = %credential_id, salt = %record.salt_id, %purpose, "salt issued");
        Ok(record)
    }

    /// Fetch a salt by id.
    ///
    /// # Errors
    /// - `NotFound` if no such salt exists
    pub async fn get(&self, salt_id: &SaltId) -> Result<SaltRecord> {
        let bytes = self
            .store
            .get(&Self::record_key(salt_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Salt {}", salt_id)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// The active salt for a (credential, purpose) pair.
    ///
    /// # Errors
    /// - `NotFound` if the pair has no active salt
    pub async fn get_active(
        &self,
        credential_id: &CredentialId,
        purpose: Purpose,
    ) -> Result<SaltRecord> {
        self.get_active_opt(credential_id, purpose)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No active salt for credential {} purpose {}",
                    credential_id, purpose
                ))
            })
    }

    /// Record that a key was just derived from this salt.
    pub async fn touch(&self, salt_id: &SaltId) -> Result<()> {
        let mut record = self.get(salt_id).await?;
        record.last_used = Some(Utc::now());
        self.put_record(&record).await
    }

    /// Delete a salt that no vault entry references.
    ///
    /// # Errors
    /// - `SaltInUse` if any vault entry still references the salt
    pub async fn delete(&self, salt_id: &SaltId) -> Result<()> {
        let _guard = self.ref_lock.lock().await;

        let record = self.get(salt_id).await?;
        for key in self.store.list("seed/").await? {
            let bytes = match self.store.get(&key).await? {
                Some(bytes) => bytes,
                None => continue,
            };
            let reference: SaltReference = serde_json::from_slice(&bytes)?;
            if reference.salt_id == *salt_id {
                return Err(Error::SaltInUse(salt_id.to_string()));
            }
        }

        self.store.delete(&Self::record_key(salt_id)).await?;
        // Drop the active pointer only if it still points at this salt.
        let active_key = Self::active_key(&record.credential_id, record.purpose);
        if let Some(pointed) = self.store.get(&active_key).await? {
            if pointed == salt_id.as_str().as_bytes() {
                self.store.delete(&active_key).await?;
            }
        }
        debug!(salt = %salt_id, "salt deleted");
        Ok(())
    }

    async fn get_active_opt(
        &self,
        credential_id: &CredentialId,
        purpose: Purpose,
    ) -> Result<Option<SaltRecord>> {
        let pointer = match self
            .store
            .get(&Self::active_key(credential_id, purpose))
            .await?
        {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let salt_id = SaltId::new(String::from_utf8_lossy(&pointer).into_owned())?;
        Ok(Some(self.get(&salt_id).await?))
    }

    async fn put_record(&self, record: &SaltRecord) -> Result<()> {
        self.store
            .put(
                &Self::record_key(&record.salt_id),
                serde_json::to_vec(record)?,
            )
            .await
    }
}
