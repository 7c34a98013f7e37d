//! Encrypted seed entries.
//!
//! An entry is immutable once written: ciphertext, nonce and tag plus the
//! identifiers needed to re-derive its key. The owning user, credential and
//! salt ids are bound as AEAD associated data, so an entry pasted under a
//! different identity fails authentication even with the right key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::salts::SaltManager;
use seedlock_common::{CredentialId, Error, Purpose, Result, SaltId, SeedId, UserId};
use seedlock_crypto::kdf::{derive_key, KdfParams};
use seedlock_crypto::{aead, AeadAlgorithm, ScopedBuffer, SealedSeed, SecureMemory};
use seedlock_storage::KvStore;

/// Persisted encrypted seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEntry {
    pub seed_id: SeedId,
    pub user_id: UserId,
    /// Credential whose secret material keys this entry.
    pub credential_id: CredentialId,
    /// Salt the key was derived with.
    pub salt_id: SaltId,
    /// Sealed ciphertext, nonce and tag.
    pub sealed: SealedSeed,
    /// Iteration count the key was derived with, pinned per entry so a
    /// config change never breaks old entries.
    pub kdf_iterations: u32,
    pub created_at: DateTime<Utc>,
}

/// Seals and opens seed entries against the store.
pub struct SeedVault {
    store: Arc<dyn KvStore>,
    salts: Arc<SaltManager>,
    memory: SecureMemory,
    algorithm: AeadAlgorithm,
    kdf: KdfParams,
    /// Shared with the salt manager; see [`SaltManager::new`].
    ref_lock: Arc<Mutex<()>>,
}

impl SeedVault {
    pub fn new(
        store: Arc<dyn KvStore>,
        salts: Arc<SaltManager>,
        memory: SecureMemory,
        algorithm: AeadAlgorithm,
        kdf: KdfParams,
        ref_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            store,
            salts,
            memory,
            algorithm,
            kdf,
            ref_lock,
        }
    }

    fn record_key(seed_id: &SeedId) -> String {
        format!("seed/{}", seed_id)
    }

    fn associated_data(user_id: &UserId, credential_id: &CredentialId, salt_id: &SaltId) -> Vec<u8> {
        format!("{}|{}|{}", user_id, credential_id.encoded(), salt_id).into_bytes()
    }

    /// Seal a seed under the credential's active salt and persist it.
    ///
    /// The plaintext never leaves its scoped buffer; the derived key is
    /// released before the entry is written.
    ///
    /// # Errors
    /// - `NotFound` if the credential has no active salt
    pub async fn store(
        &self,
        user_id: &UserId,
        credential_id: &CredentialId,
        secret: &[u8],
        seed: &ScopedBuffer,
    ) -> Result<SeedId> {
        let salt = self
            .salts
            .get_active(credential_id, Purpose::SeedEncryption)
            .await?;

        let key = derive_key(&self.memory, secret, &salt.value, &self.kdf)?;
        let aad = Self::associated_data(user_id, credential_id, &salt.salt_id);
        let sealed = seed.expose(|plaintext| aead::seal(self.algorithm, &key, plaintext, &aad))??;
        key.release();

        let entry = VaultEntry {
            seed_id: SeedId::generate(),
            user_id: user_id.clone(),
            credential_id: credential_id.clone(),
            salt_id: salt.salt_id.clone(),
            sealed,
            kdf_iterations: self.kdf.iterations,
            created_at: Utc::now(),
        };

        // The salt must still be durable when the entry lands; the lock
        // keeps SaltManager::delete from scanning between check and write.
        {
            let _guard = self.ref_lock.lock().await;
            self.salts.get(&salt.salt_id).await?;
            self.store
                .put(&Self::record_key(&entry.seed_id), serde_json::to_vec(&entry)?)
                .await?;
        }

        info!(user = %user_id, credential = %credential_id, seed = %entry.seed_id, "seed stored");
        Ok(entry.seed_id)
    }

    /// Fetch an entry by id.
    ///
    /// # Errors
    /// - `NotFound` if no such entry exists
    pub async fn get(&self, seed_id: &SeedId) -> Result<VaultEntry> {
        let bytes = self
            .store
            .get(&Self::record_key(seed_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Seed {}", seed_id)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All entries keyed by a credential, oldest first.
    pub async fn entries_for_credential(
        &self,
        credential_id: &CredentialId,
    ) -> Result<Vec<VaultEntry>> {
        let mut entries = Vec::new();
        for key in self.store.list("seed/").await? {
            let bytes = match self.store.get(&key).await? {
                Some(bytes) => bytes,
                None => continue,
            };
            let entry: VaultEntry = serde_json::from_slice(&bytes)?;
            if entry.credential_id == *credential_id {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    /// Open an entry, re-deriving its key from the secret material.
    ///
    /// Fails closed: wrong secret, wrong salt and tampered data are all the
    /// same [`Error::TagMismatch`]. On success the salt's `last_used` is
    /// updated and the plaintext is returned in a fresh scoped buffer.
    pub async fn open(&self, seed_id: &SeedId, secret: &[u8]) -> Result<ScopedBuffer> {
        let entry = self.get(seed_id).await?;
        let salt = self.salts.get(&entry.salt_id).await?;

        let params = KdfParams::new(entry.kdf_iterations)?;
        let key = derive_key(&self.memory, secret, &salt.value, &params)?;
        let aad = Self::associated_data(&entry.user_id, &entry.credential_id, &entry.salt_id);
        let plaintext = aead::open(&key, &entry.sealed, &aad)?;
        key.release();

        let buffer = self.memory.acquire_from(&plaintext)?;
        self.salts.touch(&entry.salt_id).await?;

        debug!(seed = %seed_id, "seed opened");
        Ok(buffer)
    }

    /// Open the most recently stored entry for a credential.
    ///
    /// # Errors
    /// - `NotFound` if the credential has no stored seed
    pub async fn open_latest(
        &self,
        credential_id: &CredentialId,
        secret: &[u8],
    ) -> Result<ScopedBuffer> {
        let entries = self.entries_for_credential(credential_id).await?;
        let latest = entries.last().ok_or_else(|| {
            Error::NotFound(format!("No seed stored for credential {}", credential_id))
        })?;
        self.open(&latest.seed_id, secret).await
    }

    /// Delete an entry.
    pub async fn delete(&self, seed_id: &SeedId) -> Result<()> {
        // Missing entries are checked first so deletion of an unknown id
        // surfaces as NotFound rather than silently succeeding.
        self.get(seed_id).await?;
        self.store.delete(&Self::record_key(seed_id)).await?;
        info!(seed = %seed_id, "seed deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedlock_storage::MemoryStore;

    struct Fixture {
        vault: SeedVault,
        salts: Arc<SaltManager>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let ref_lock = Arc::new(Mutex::new(()));
        let salts = Arc::new(SaltManager::new(Arc::clone(&store), Arc::clone(&ref_lock)));
        let vault = SeedVault::new(
            store,
            Arc::clone(&salts),
            SecureMemory::default(),
            AeadAlgorithm::default(),
            KdfParams::new(10).unwrap(),
            ref_lock,
        );
        Fixture { vault, salts }
    }

    fn user() -> UserId {
        UserId::new("alice").unwrap()
    }

    fn cred() -> CredentialId {
        CredentialId::new(vec![0xC1; 16]).unwrap()
    }

    const SECRET: &[u8] = b"stable secret material for tests";
    const SEED: &[u8] = b"abandon abandon abandon about";

    async fn store_seed(fx: &Fixture) -> SeedId {
        fx.salts.issue(&cred(), Purpose::SeedEncryption).await.unwrap();
        let seed = fx.vault.memory.acquire_from(SEED).unwrap();
        fx.vault.store(&user(), &cred(), SECRET, &seed).await.unwrap()
    }

    #[tokio::test]
    async fn test_store_and_open_roundtrip() {
        let fx = fixture();
        let seed_id = store_seed(&fx).await;

        let opened = fx.vault.open(&seed_id, SECRET).await.unwrap();
        opened
            .expose(|plaintext| assert_eq!(plaintext, SEED))
            .unwrap();
    }

    #[tokio::test]
    async fn test_wrong_secret_fails_closed() {
        let fx = fixture();
        let seed_id = store_seed(&fx).await;
        assert!(matches!(
            fx.vault.open(&seed_id, b"a different secret entirely").await,
            Err(Error::TagMismatch)
        ));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails_closed() {
        let fx = fixture();
        let seed_id = store_seed(&fx).await;

        let mut entry = fx.vault.get(&seed_id).await.unwrap();
        entry.sealed.ciphertext[0] ^= 0x01;
        fx.vault
            .store
            .put(
                &SeedVault::record_key(&seed_id),
                serde_json::to_vec(&entry).unwrap(),
            )
            .await
            .unwrap();

        assert!(matches!(
            fx.vault.open(&seed_id, SECRET).await,
            Err(Error::TagMismatch)
        ));
    }

    #[tokio::test]
    async fn test_swapped_identity_fails_closed() {
        // Same key, same sealed bytes, different claimed owner.
        let fx = fixture();
        let seed_id = store_seed(&fx).await;

        let mut entry = fx.vault.get(&seed_id).await.unwrap();
        entry.user_id = UserId::new("mallory").unwrap();
        fx.vault
            .store
            .put(
                &SeedVault::record_key(&seed_id),
                serde_json::to_vec(&entry).unwrap(),
            )
            .await
            .unwrap();

        assert!(matches!(
            fx.vault.open(&seed_id, SECRET).await,
            Err(Error::TagMismatch)
        ));
    }

    #[tokio::test]
    async fn test_store_without_salt_fails() {
        let fx = fixture();
        let seed = fx.vault.memory.acquire_from(SEED).unwrap();
        assert!(matches!(
            fx.vault.store(&user(), &cred(), SECRET, &seed).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_updates_salt_last_used() {
        let fx = fixture();
        let seed_id = store_seed(&fx).await;
        let entry = fx.vault.get(&seed_id).await.unwrap();
        assert!(fx.salts.get(&entry.salt_id).await.unwrap().last_used.is_none());

        fx.vault.open(&seed_id, SECRET).await.unwrap();
        assert!(fx.salts.get(&entry.salt_id).await.unwrap().last_used.is_some());
    }

    #[tokio::test]
    async fn test_old_entries_survive_salt_rotation() {
        let fx = fixture();
        let seed_id = store_seed(&fx).await;

        // Rotate: new active salt, old one deactivated but kept.
        fx.salts.issue(&cred(), Purpose::SeedEncryption).await.unwrap();
        let opened = fx.vault.open(&seed_id, SECRET).await.unwrap();
        opened.expose(|pt| assert_eq!(pt, SEED)).unwrap();
    }

    #[tokio::test]
    async fn test_open_latest_picks_newest() {
        let fx = fixture();
        store_seed(&fx).await;

        let newer = fx.vault.memory.acquire_from(b"newer seed phrase").unwrap();
        fx.vault.store(&user(), &cred(), SECRET, &newer).await.unwrap();

        let opened = fx.vault.open_latest(&cred(), SECRET).await.unwrap();
        opened
            .expose(|pt| assert_eq!(pt, b"newer seed phrase"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_releases_salt() {
        let fx = fixture();
        let seed_id = store_seed(&fx).await;
        let salt_id = fx.vault.get(&seed_id).await.unwrap().salt_id;

        assert!(matches!(
            fx.salts.delete(&salt_id).await,
            Err(Error::SaltInUse(_))
        ));
        fx.vault.delete(&seed_id).await.unwrap();
        fx.salts.delete(&salt_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let fx = fixture();
        assert!(matches!(
            fx.vault.delete(&SeedId::generate()).await,
            Err(Error::NotFound(_))
        ));
    }
}
