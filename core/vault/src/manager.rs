//! Top-level facade wiring ceremonies, credentials, salts and the vault.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::VaultConfig;
use crate::salts::SaltManager;
use crate::vault::SeedVault;
use seedlock_common::{CeremonyId, CredentialId, Error, Purpose, Result, SaltId, SeedId, UserId};
use seedlock_crypto::{ScopedBuffer, SecureMemory};
use seedlock_storage::KvStore;
use seedlock_webauthn::secret::derive_secret_material;
use seedlock_webauthn::{
    AssertionResponse, AttestationResponse, AuthenticationChallenge, CeremonyOrchestrator,
    CredentialRegistry, RegistrationChallenge,
};

/// Authenticator-bound seed vault.
///
/// One instance per relying party. All state lives behind the supplied
/// [`KvStore`], so instances are cheap and can be recreated over the same
/// store.
pub struct SeedLock {
    config: VaultConfig,
    registry: Arc<CredentialRegistry>,
    ceremonies: CeremonyOrchestrator,
    salts: Arc<SaltManager>,
    vault: SeedVault,
    memory: SecureMemory,
}

impl SeedLock {
    /// Build a vault over the given store.
    ///
    /// # Errors
    /// - Returns error if the configuration does not validate
    pub fn new(config: VaultConfig, store: Arc<dyn KvStore>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(CredentialRegistry::new(Arc::clone(&store)));
        let ceremonies = CeremonyOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.relying_party(),
            config.ceremony_settings(),
            config.server_secret.clone(),
        );

        let ref_lock = Arc::new(Mutex::new(()));
        let salts = Arc::new(SaltManager::new(Arc::clone(&store), Arc::clone(&ref_lock)));
        let memory = SecureMemory::new(Duration::from_secs(config.memory_timeout_secs));
        let vault = SeedVault::new(
            store,
            Arc::clone(&salts),
            memory.clone(),
            config.aead,
            config.kdf_params()?,
            ref_lock,
        );

        Ok(Self {
            config,
            registry,
            ceremonies,
            salts,
            vault,
            memory,
        })
    }

    /// Secure-memory manager for acquiring seed buffers to pass into
    /// [`SeedLock::store_seed`].
    pub fn memory(&self) -> &SecureMemory {
        &self.memory
    }

    /// Begin registering a new authenticator for a user.
    pub async fn begin_registration(&self, user_id: &UserId) -> Result<RegistrationChallenge> {
        self.ceremonies.start_registration(user_id).await
    }

    /// Complete a registration ceremony.
    ///
    /// On success the credential is persisted and an initial encryption
    /// salt is issued for it.
    pub async fn complete_registration(
        &self,
        ceremony_id: &CeremonyId,
        response: &AttestationResponse,
    ) -> Result<CredentialId> {
        let credential = self
            .ceremonies
            .finish_registration(ceremony_id, response)
            .await?;
        self.salts
            .issue(&credential.credential_id, Purpose::SeedEncryption)
            .await?;
        Ok(credential.credential_id)
    }

    /// Begin authenticating a user with any of their credentials.
    pub async fn begin_authentication(&self, user_id: &UserId) -> Result<AuthenticationChallenge> {
        self.ceremonies.start_authentication(user_id).await
    }

    /// Complete an authentication ceremony and open the user's most recent
    /// seed for the authenticated credential.
    ///
    /// The plaintext comes back in a scoped buffer wiped on release, drop
    /// or watchdog timeout.
    ///
    /// # Errors
    /// - `NotFound` if the authenticated credential has no stored seed
    pub async fn complete_authentication(
        &self,
        ceremony_id: &CeremonyId,
        response: &AssertionResponse,
    ) -> Result<ScopedBuffer> {
        let (credential_id, secret) = self
            .ceremonies
            .finish_authentication(ceremony_id, response)
            .await?;
        self.vault.open_latest(&credential_id, &secret).await
    }

    /// Seal a seed under a registered credential.
    ///
    /// # Errors
    /// - `InvalidInput` if the credential belongs to a different user
    pub async fn store_seed(
        &self,
        user_id: &UserId,
        credential_id: &CredentialId,
        seed: &ScopedBuffer,
    ) -> Result<SeedId> {
        let credential = self.registry.get(credential_id).await?;
        if credential.user_id != *user_id {
            return Err(Error::InvalidInput(format!(
                "Credential {} belongs to a different user",
                credential_id
            )));
        }

        let secret = derive_secret_material(&self.config.server_secret, &credential);
        self.vault
            .store(user_id, credential_id, &secret, seed)
            .await
    }

    /// Delete a stored seed. Its salt can then be retired.
    pub async fn delete_seed(&self, seed_id: &SeedId) -> Result<()> {
        self.vault.delete(seed_id).await
    }

    /// Issue a fresh encryption salt for a credential.
    ///
    /// Existing entries keep decrypting under their old salt; new entries
    /// use the new one.
    pub async fn rotate_salt(&self, credential_id: &CredentialId) -> Result<SaltId> {
        // Only known credentials get salts.
        self.registry.get(credential_id).await?;
        let record = self
            .salts
            .issue(credential_id, Purpose::SeedEncryption)
            .await?;
        info!(credential = %credential_id, salt = %record.salt_id, "salt rotated");
        Ok(record.salt_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mnemonic;
    use seedlock_storage::MemoryStore;
    use seedlock_webauthn::{SoftAuthenticator, SoftKeyType};

    const ORIGIN: &str = "https://localhost";

    fn config() -> VaultConfig {
        let mut config = VaultConfig::new("localhost", "Seedlock Test", ORIGIN, vec![0x5A; 32]);
        config.kdf_iterations = 10; // keep tests fast
        config
    }

    fn seedlock() -> SeedLock {
        SeedLock::new(config(), Arc::new(MemoryStore::new())).unwrap()
    }

    fn user() -> UserId {
        UserId::new("alice").unwrap()
    }

    async fn register(lock: &SeedLock, token: &mut SoftAuthenticator) -> CredentialId {
        let challenge = lock.begin_registration(&user()).await.unwrap();
        let response = token.create_credential(&challenge, ORIGIN);
        lock.complete_registration(&challenge.ceremony_id, &response)
            .await
            .unwrap()
    }

    async fn authenticate(lock: &SeedLock, token: &mut SoftAuthenticator) -> Result<ScopedBuffer> {
        let challenge = lock.begin_authentication(&user()).await?;
        let assertion = token.sign_assertion(&challenge, ORIGIN);
        lock.complete_authentication(&challenge.ceremony_id, &assertion)
            .await
    }

    #[tokio::test]
    async fn test_register_store_authenticate_decrypt() {
        let lock = seedlock();
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);

        let credential_id = register(&lock, &mut token).await;

        let phrase = mnemonic::generate(12).unwrap();
        let seed = lock.memory().acquire_from(phrase.as_bytes()).unwrap();
        lock.store_seed(&user(), &credential_id, &seed).await.unwrap();
        seed.release();

        let opened = authenticate(&lock, &mut token).await.unwrap();
        opened
            .expose(|plaintext| assert_eq!(plaintext, phrase.as_bytes()))
            .unwrap();
        opened.release();
    }

    #[tokio::test]
    async fn test_survives_instance_recreation() {
        // Everything lives in the store; a new facade over the same store
        // must decrypt what the old one sealed.
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);

        let first = SeedLock::new(config(), Arc::clone(&store)).unwrap();
        let credential_id = register(&first, &mut token).await;
        let seed = first.memory().acquire_from(b"persisted seed").unwrap();
        first.store_seed(&user(), &credential_id, &seed).await.unwrap();
        drop(first);

        let second = SeedLock::new(config(), store).unwrap();
        let opened = authenticate(&second, &mut token).await.unwrap();
        opened.expose(|pt| assert_eq!(pt, b"persisted seed")).unwrap();
    }

    #[tokio::test]
    async fn test_replayed_ceremony_rejected() {
        let lock = seedlock();
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);
        let credential_id = register(&lock, &mut token).await;
        let seed = lock.memory().acquire_from(b"seed bytes").unwrap();
        lock.store_seed(&user(), &credential_id, &seed).await.unwrap();

        let challenge = lock.begin_authentication(&user()).await.unwrap();
        let assertion = token.sign_assertion(&challenge, ORIGIN);
        lock.complete_authentication(&challenge.ceremony_id, &assertion)
            .await
            .unwrap();
        assert!(matches!(
            lock.complete_authentication(&challenge.ceremony_id, &assertion)
                .await,
            Err(Error::CeremonyMismatch(_))
        ));
    }

    #[tokio::test]
    async fn test_cloned_authenticator_detected() {
        let lock = seedlock();
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);
        let credential_id = register(&lock, &mut token).await;
        let seed = lock.memory().acquire_from(b"seed bytes").unwrap();
        lock.store_seed(&user(), &credential_id, &seed).await.unwrap();

        authenticate(&lock, &mut token).await.unwrap();

        // A clone starts from the counter value it was copied at.
        token.rewind_sign_count(0);
        assert!(matches!(
            authenticate(&lock, &mut token).await,
            Err(Error::ReplayOrClone(_))
        ));
    }

    #[tokio::test]
    async fn test_salt_rotation_keeps_old_entries() {
        let lock = seedlock();
        let mut token = SoftAuthenticator::new(SoftKeyType::Ed25519);
        let credential_id = register(&lock, &mut token).await;

        let seed = lock.memory().acquire_from(b"pre-rotation seed").unwrap();
        lock.store_seed(&user(), &credential_id, &seed).await.unwrap();
        lock.rotate_salt(&credential_id).await.unwrap();

        let opened = authenticate(&lock, &mut token).await.unwrap();
        opened.expose(|pt| assert_eq!(pt, b"pre-rotation seed")).unwrap();
    }

    #[tokio::test]
    async fn test_authentication_without_seed_is_not_found() {
        let lock = seedlock();
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);
        register(&lock, &mut token).await;

        assert!(matches!(
            authenticate(&lock, &mut token).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deleted_seed_is_gone() {
        let lock = seedlock();
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);
        let credential_id = register(&lock, &mut token).await;
        let seed = lock.memory().acquire_from(b"to be deleted").unwrap();
        let seed_id = lock.store_seed(&user(), &credential_id, &seed).await.unwrap();

        lock.delete_seed(&seed_id).await.unwrap();
        assert!(matches!(
            authenticate(&lock, &mut token).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_store_seed_rejects_foreign_credential() {
        let lock = seedlock();
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);
        let credential_id = register(&lock, &mut token).await;

        let seed = lock.memory().acquire_from(b"seed").unwrap();
        assert!(lock
            .store_seed(&UserId::new("mallory").unwrap(), &credential_id, &seed)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_two_credentials_one_user() {
        let lock = seedlock();
        let mut first = SoftAuthenticator::new(SoftKeyType::P256);
        let mut second = SoftAuthenticator::new(SoftKeyType::Ed25519);

        let first_id = register(&lock, &mut first).await;
        let second_id = register(&lock, &mut second).await;
        assert_ne!(first_id, second_id);

        let seed = lock.memory().acquire_from(b"second token seed").unwrap();
        lock.store_seed(&user(), &second_id, &seed).await.unwrap();

        // Authenticating with the second token finds its seed.
        let opened = authenticate(&lock, &mut second).await.unwrap();
        opened.expose(|pt| assert_eq!(pt, b"second token seed")).unwrap();
        // The first token has none stored.
        assert!(matches!(
            authenticate(&lock, &mut first).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_on_local_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<dyn KvStore> =
            Arc::new(seedlock_storage::LocalStore::new(dir.path()).unwrap());
        let lock = SeedLock::new(config(), store).unwrap();
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);

        let credential_id = register(&lock, &mut token).await;
        let seed = lock.memory().acquire_from(b"on-disk seed").unwrap();
        lock.store_seed(&user(), &credential_id, &seed).await.unwrap();

        let opened = authenticate(&lock, &mut token).await.unwrap();
        opened.expose(|pt| assert_eq!(pt, b"on-disk seed")).unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.server_secret = vec![1; 4];
        assert!(SeedLock::new(bad, Arc::new(MemoryStore::new())).is_err());
    }
}
