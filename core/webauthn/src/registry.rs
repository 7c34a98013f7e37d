//! Credential registry with clone-detecting counter enforcement.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use seedlock_common::bytes::base64;
use seedlock_common::{CredentialId, Error, Result, UserId};
use seedlock_storage::KvStore;

/// Registered authenticator credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Raw credential id chosen by the authenticator.
    pub credential_id: CredentialId,
    /// Owner of the credential.
    pub user_id: UserId,
    /// COSE-encoded public key, stored as its raw CBOR bytes.
    #[serde(with = "base64")]
    pub public_key: Vec<u8>,
    /// Highest signature counter observed so far.
    pub signature_counter: u32,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

/// Registry of credentials keyed by credential id, with a per-user index.
///
/// Counter advancement for one credential is serialized through a
/// per-credential mutex so two concurrent authentications cannot both read
/// a stale counter and both succeed.
pub struct CredentialRegistry {
    store: Arc<dyn KvStore>,
    counter_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialRegistry {
    /// Create a registry over the given store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            counter_locks: Mutex::new(HashMap::new()),
        }
    }

    fn record_key(credential_id: &CredentialId) -> String {
        format!("credential/{}", credential_id.encoded())
    }

    fn index_key(user_id: &UserId, credential_id: &CredentialId) -> String {
        format!("user/{}/credential/{}", user_id, credential_id.encoded())
    }

    /// Persist a newly verified credential.
    ///
    /// # Errors
    /// - Returns error if the credential id is already registered
    pub async fn register(
        &self,
        user_id: &UserId,
        credential_id: CredentialId,
        public_key: Vec<u8>,
        initial_counter: u32,
    ) -> Result<CredentialId> {
        let key = Self::record_key(&credential_id);
        if self.store.get(&key).await?.is_some() {
            return Err(Error::InvalidInput(format!(
                "Credential {} already registered",
                credential_id
            )));
        }

        let credential = Credential {
            credential_id: credential_id.clone(),
            user_id: user_id.clone(),
            public_key,
            signature_counter: initial_counter,
            created_at: Utc::now(),
        };

        self.store
            .put(&key, serde_json::to_vec(&credential)?)
            .await?;
        self.store
            .put(&Self::index_key(user_id, &credential_id), Vec::new())
            .await?;

        debug!(user = %user_id, credential = %credential_id, "credential registered");
        Ok(credential_id)
    }

    /// Fetch a credential by id.
    ///
    /// # Errors
    /// - `NotFound` if no such credential exists
    pub async fn get(&self, credential_id: &CredentialId) -> Result<Credential> {
        let bytes = self
            .store
            .get(&Self::record_key(credential_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("Credential {}", credential_id)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All credentials registered by a user, oldest first.
    pub async fn credentials_for_user(&self, user_id: &UserId) -> Result<Vec<Credential>> {
        let prefix = format!("user/{}/credential/", user_id);
        let mut credentials = Vec::new();
        for key in self.store.list(&prefix).await? {
            let encoded = key
                .rsplit('/')
                .next()
                .expect("list returned key without the queried prefix");
            let bytes = match self.store.get(&format!("credential/{}", encoded)).await? {
                Some(bytes) => bytes,
                // Index entry without a record: skip rather than fail the
                // whole listing.
                None => continue,
            };
            credentials.push(serde_json::from_slice::<Credential>(&bytes)?);
        }
        credentials.sort_by_key(|c| c.created_at);
        Ok(credentials)
    }

    /// Check a freshly observed signature counter and persist the advance.
    ///
    /// A counter that does not strictly increase indicates a possible
    /// cloned authenticator and fails with `ReplayOrClone`. Authenticators
    /// that do not implement counters report zero on both sides; that case
    /// is accepted and logged, per the WebAuthn caveat.
    pub async fn verify_and_advance_counter(
        &self,
        credential_id: &CredentialId,
        observed_counter: u32,
    ) -> Result<()> {
        let lock = self.lock_for(credential_id).await;
        let _guard = lock.lock().await;

        let mut credential = self.get(credential_id).await?;

        if observed_counter == 0 && credential.signature_counter == 0 {
            warn!(
                credential = %credential_id,
                "authenticator does not support signature counters; clone detection disabled"
            );
            return Ok(());
        }

        if observed_counter <= credential.signature_counter {
            warn!(
                credential = %credential_id,
                observed = observed_counter,
                stored = credential.signature_counter,
                "non-increasing signature counter"
            );
            return Err(Error::ReplayOrClone(credential_id.encoded()));
        }

        credential.signature_counter = observed_counter;
        self.store
            .put(
                &Self::record_key(credential_id),
                serde_json::to_vec(&credential)?,
            )
            .await?;
        Ok(())
    }

    async fn lock_for(&self, credential_id: &CredentialId) -> Arc<Mutex<()>> {
        let mut locks = self.counter_locks.lock().await;
        locks
            .entry(credential_id.encoded())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedlock_storage::MemoryStore;

    fn registry() -> CredentialRegistry {
        CredentialRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn cred_id(byte: u8) -> CredentialId {
        CredentialId::new(vec![byte; 16]).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = registry();
        let user = UserId::new("alice").unwrap();

        registry
            .register(&user, cred_id(1), vec![0xA0], 5)
            .await
            .unwrap();

        let credential = registry.get(&cred_id(1)).await.unwrap();
        assert_eq!(credential.user_id, user);
        assert_eq!(credential.signature_counter, 5);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = registry();
        let user = UserId::new("alice").unwrap();

        registry
            .register(&user, cred_id(1), vec![], 0)
            .await
            .unwrap();
        assert!(registry.register(&user, cred_id(1), vec![], 0).await.is_err());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.get(&cred_id(9)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_credentials_for_user() {
        let registry = registry();
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();

        registry.register(&alice, cred_id(1), vec![], 0).await.unwrap();
        registry.register(&alice, cred_id(2), vec![], 0).await.unwrap();
        registry.register(&bob, cred_id(3), vec![], 0).await.unwrap();

        let creds = registry.credentials_for_user(&alice).await.unwrap();
        assert_eq!(creds.len(), 2);
        assert!(creds.iter().all(|c| c.user_id == alice));
    }

    #[tokio::test]
    async fn test_counter_must_strictly_increase() {
        let registry = registry();
        let user = UserId::new("alice").unwrap();
        registry.register(&user, cred_id(1), vec![], 10).await.unwrap();

        // Equal counter: replay.
        assert!(matches!(
            registry.verify_and_advance_counter(&cred_id(1), 10).await,
            Err(Error::ReplayOrClone(_))
        ));
        // Lower counter: clone.
        assert!(matches!(
            registry.verify_and_advance_counter(&cred_id(1), 3).await,
            Err(Error::ReplayOrClone(_))
        ));
        // Strictly greater: accepted and persisted.
        registry.verify_and_advance_counter(&cred_id(1), 11).await.unwrap();
        assert_eq!(registry.get(&cred_id(1)).await.unwrap().signature_counter, 11);
    }

    #[tokio::test]
    async fn test_both_zero_counters_accepted() {
        let registry = registry();
        let user = UserId::new("alice").unwrap();
        registry.register(&user, cred_id(1), vec![], 0).await.unwrap();

        // Counter-less authenticators report zero forever.
        registry.verify_and_advance_counter(&cred_id(1), 0).await.unwrap();
        registry.verify_and_advance_counter(&cred_id(1), 0).await.unwrap();
        assert_eq!(registry.get(&cred_id(1)).await.unwrap().signature_counter, 0);
    }

    #[tokio::test]
    async fn test_concurrent_advances_single_winner() {
        let registry = Arc::new(registry());
        let user = UserId::new("alice").unwrap();
        registry.register(&user, cred_id(1), vec![], 0).await.unwrap();

        // Many tasks race to claim the same observed counter; exactly one
        // may win.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.verify_and_advance_counter(&cred_id(1), 7).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(registry.get(&cred_id(1)).await.unwrap().signature_counter, 7);
    }
}
