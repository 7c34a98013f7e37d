//! Registration and authentication ceremony state machines.
//!
//! A ceremony is a single-use token: `start_*` issues a challenge bound to
//! a ceremony id and persists it with an expiry; the matching `finish_*`
//! consumes the record exactly once, under a per-ceremony lock, before any
//! verification begins. A replayed ceremony id therefore fails regardless
//! of how valid the accompanying signature is.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::attestation::{AttestationObject, ClientData, TYPE_CREATE, TYPE_GET};
use crate::authenticator::{client_data_hash, rp_id_hash, AuthenticatorData};
use crate::cose::CoseKey;
use crate::registry::{Credential, CredentialRegistry};
use crate::secret::derive_secret_material;
use seedlock_common::bytes::base64url;
use seedlock_common::{CeremonyId, CredentialId, Error, Result, UserId};
use seedlock_storage::KvStore;

/// Challenge length in bytes.
pub const CHALLENGE_LENGTH: usize = 32;

/// Relying party identity the ceremonies bind to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelyingParty {
    /// Relying party id (a registrable domain suffix, e.g. `localhost`).
    pub id: String,
    /// Human-readable relying party name.
    pub name: String,
    /// Origin expected in client data (e.g. `https://localhost`).
    pub origin: String,
}

/// Required level of user verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    /// The authenticator must verify the user (PIN/biometric).
    Required,
    /// Verification is requested; the flag is still enforced on
    /// assertions per the "required unless discouraged" rule.
    Preferred,
    /// Verification is not requested and its flag is not enforced.
    Discouraged,
}

/// Ceremony policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeremonySettings {
    /// User-verification policy for both ceremony kinds.
    pub user_verification: UserVerification,
    /// Whether the user-presence (touch) flag is enforced.
    pub require_touch: bool,
    /// Ceremony time-to-live in seconds.
    pub ttl_secs: u64,
}

impl Default for CeremonySettings {
    fn default() -> Self {
        Self {
            user_verification: UserVerification::Preferred,
            require_touch: true,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CeremonyKind {
    Registration,
    Authentication,
}

/// Persisted ceremony state between `start_*` and `finish_*`.
#[derive(Debug, Serialize, Deserialize)]
struct CeremonyRecord {
    ceremony_id: CeremonyId,
    user_id: UserId,
    kind: CeremonyKind,
    #[serde(with = "base64url")]
    challenge: Vec<u8>,
    expires_at: DateTime<Utc>,
    allowed_credentials: Vec<CredentialId>,
}

/// Challenge payload handed to the client for registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationChallenge {
    pub ceremony_id: CeremonyId,
    #[serde(with = "base64url")]
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub rp_name: String,
    pub user_verification: UserVerification,
    /// Credentials the authenticator should refuse to re-register.
    pub exclude_credentials: Vec<CredentialId>,
    pub timeout_ms: u64,
}

/// Challenge payload handed to the client for authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationChallenge {
    pub ceremony_id: CeremonyId,
    #[serde(with = "base64url")]
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub user_verification: UserVerification,
    pub allow_credentials: Vec<CredentialId>,
    pub timeout_ms: u64,
}

/// Client response completing a registration ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationResponse {
    #[serde(with = "base64url")]
    pub credential_id: Vec<u8>,
    #[serde(with = "base64url")]
    pub client_data_json: Vec<u8>,
    #[serde(with = "base64url")]
    pub attestation_object: Vec<u8>,
}

/// Client response completing an authentication ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResponse {
    #[serde(with = "base64url")]
    pub credential_id: Vec<u8>,
    #[serde(with = "base64url")]
    pub client_data_json: Vec<u8>,
    #[serde(with = "base64url")]
    pub authenticator_data: Vec<u8>,
    #[serde(with = "base64url")]
    pub signature: Vec<u8>,
}

/// Runs WebAuthn ceremonies against the credential registry.
pub struct CeremonyOrchestrator {
    store: Arc<dyn KvStore>,
    registry: Arc<CredentialRegistry>,
    rp: RelyingParty,
    settings: CeremonySettings,
    server_secret: Zeroizing<Vec<u8>>,
    ceremony_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CeremonyOrchestrator {
    /// Create an orchestrator.
    ///
    /// `server_secret` seeds the per-credential secret material; see
    /// [`crate::secret::derive_secret_material`] for its trust model.
    pub fn new(
        store: Arc<dyn KvStore>,
        registry: Arc<CredentialRegistry>,
        rp: RelyingParty,
        settings: CeremonySettings,
        server_secret: Vec<u8>,
    ) -> Self {
        Self {
            store,
            registry,
            rp,
            settings,
            server_secret: Zeroizing::new(server_secret),
            ceremony_locks: Mutex::new(HashMap::new()),
        }
    }

    fn record_key(ceremony_id: &CeremonyId) -> String {
        format!("ceremony/{}", ceremony_id)
    }

    fn new_challenge() -> Vec<u8> {
        let mut challenge = vec![0u8; CHALLENGE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut challenge);
        challenge
    }

    async fn put_record(&self, record: &CeremonyRecord) -> Result<()> {
        self.store
            .put(&Self::record_key(&record.ceremony_id), serde_json::to_vec(record)?)
            .await
    }

    /// Begin a registration ceremony for a user.
    pub async fn start_registration(&self, user_id: &UserId) -> Result<RegistrationChallenge> {
        let exclude: Vec<CredentialId> = self
            .registry
            .credentials_for_user(user_id)
            .await?
            .into_iter()
            .map(|c| c.credential_id)
            .collect();

        let record = CeremonyRecord {
            ceremony_id: CeremonyId::generate(),
            user_id: user_id.clone(),
            kind: CeremonyKind::Registration,
            challenge: Self::new_challenge(),
            expires_at: Utc::now() + Duration::seconds(self.settings.ttl_secs as i64),
            allowed_credentials: Vec::new(),
        };
        self.put_record(&record).await?;

        debug!(user = %user_id, ceremony = %record.ceremony_id, "registration ceremony started");
        Ok(RegistrationChallenge {
            ceremony_id: record.ceremony_id,
            challenge: record.challenge,
            rp_id: self.rp.id.clone(),
            rp_name: self.rp.name.clone(),
            user_verification: self.settings.user_verification,
            exclude_credentials: exclude,
            timeout_ms: self.settings.ttl_secs * 1000,
        })
    }

    /// Complete a registration ceremony and persist the new credential.
    ///
    /// # Errors
    /// - `CeremonyMismatch` for unknown/consumed ceremonies, challenge or
    ///   rp binding failures
    /// - `Expired` for ceremonies past their TTL
    /// - `AttestationInvalid` for malformed or unacceptable attestations
    pub async fn finish_registration(
        &self,
        ceremony_id: &CeremonyId,
        response: &AttestationResponse,
    ) -> Result<Credential> {
        let record = self.consume(ceremony_id, CeremonyKind::Registration).await?;

        ClientData::verify(
            &response.client_data_json,
            TYPE_CREATE,
            &record.challenge,
            &self.rp.origin,
        )?;

        let attestation = AttestationObject::parse(&response.attestation_object)?;
        let auth_data = AuthenticatorData::parse(&attestation.auth_data)?;

        if auth_data.rp_id_hash != rp_id_hash(&self.rp.id) {
            return Err(Error::CeremonyMismatch(
                "Relying party id hash does not match".to_string(),
            ));
        }
        if self.settings.require_touch && !auth_data.user_present() {
            return Err(Error::AttestationInvalid(
                "User presence flag not set".to_string(),
            ));
        }
        if self.settings.user_verification == UserVerification::Required
            && !auth_data.user_verified()
        {
            return Err(Error::AttestationInvalid(
                "User verification required but flag not set".to_string(),
            ));
        }

        let attested = auth_data.attested_credential.ok_or_else(|| {
            Error::AttestationInvalid("Missing attested credential data".to_string())
        })?;
        if attested.credential_id != response.credential_id {
            return Err(Error::AttestationInvalid(
                "Credential id does not match attested data".to_string(),
            ));
        }

        // Parsing validates the key type and algorithm before anything is
        // persisted.
        CoseKey::parse(&attested.public_key_cbor)?;

        let credential_id = CredentialId::new(attested.credential_id)?;
        self.registry
            .register(
                &record.user_id,
                credential_id.clone(),
                attested.public_key_cbor,
                auth_data.sign_count,
            )
            .await?;

        info!(
            user = %record.user_id,
            credential = %credential_id,
            fmt = %attestation.fmt,
            "credential registered"
        );
        self.registry.get(&credential_id).await
    }

    /// Begin an authentication ceremony for a user.
    ///
    /// # Errors
    /// - `NotFound` if the user has no registered credentials
    pub async fn start_authentication(&self, user_id: &UserId) -> Result<AuthenticationChallenge> {
        let allowed: Vec<CredentialId> = self
            .registry
            .credentials_for_user(user_id)
            .await?
            .into_iter()
            .map(|c| c.credential_id)
            .collect();
        if allowed.is_empty() {
            return Err(Error::NotFound(format!(
                "No credentials registered for user {}",
                user_id
            )));
        }

        let record = CeremonyRecord {
            ceremony_id: CeremonyId::generate(),
            user_id: user_id.clone(),
            kind: CeremonyKind::Authentication,
            challenge: Self::new_challenge(),
            expires_at: Utc::now() + Duration::seconds(self.settings.ttl_secs as i64),
            allowed_credentials: allowed.clone(),
        };
        self.put_record(&record).await?;

        debug!(user = %user_id, ceremony = %record.ceremony_id, "authentication ceremony started");
        Ok(AuthenticationChallenge {
            ceremony_id: record.ceremony_id,
            challenge: record.challenge,
            rp_id: self.rp.id.clone(),
            user_verification: self.settings.user_verification,
            allow_credentials: allowed,
            timeout_ms: self.settings.ttl_secs * 1000,
        })
    }

    /// Complete an authentication ceremony.
    ///
    /// On success returns the authenticated credential id and the stable
    /// secret material for key derivation.
    pub async fn finish_authentication(
        &self,
        ceremony_id: &CeremonyId,
        response: &AssertionResponse,
    ) -> Result<(CredentialId, Zeroizing<Vec<u8>>)> {
        let record = self
            .consume(ceremony_id, CeremonyKind::Authentication)
            .await?;

        let credential_id = CredentialId::new(response.credential_id.clone())?;
        if !record.allowed_credentials.contains(&credential_id) {
            return Err(Error::CeremonyMismatch(
                "Credential not in the ceremony's allow list".to_string(),
            ));
        }

        let credential = self.registry.get(&credential_id).await?;
        if credential.user_id != record.user_id {
            return Err(Error::CeremonyMismatch(
                "Credential belongs to a different user".to_string(),
            ));
        }

        ClientData::verify(
            &response.client_data_json,
            TYPE_GET,
            &record.challenge,
            &self.rp.origin,
        )?;

        let auth_data = AuthenticatorData::parse(&response.authenticator_data)?;
        if auth_data.rp_id_hash != rp_id_hash(&self.rp.id) {
            return Err(Error::CeremonyMismatch(
                "Relying party id hash does not match".to_string(),
            ));
        }
        if self.settings.require_touch && !auth_data.user_present() {
            return Err(Error::CeremonyMismatch(
                "User presence flag not set".to_string(),
            ));
        }
        if self.settings.user_verification != UserVerification::Discouraged
            && !auth_data.user_verified()
        {
            return Err(Error::CeremonyMismatch(
                "User verification flag not set".to_string(),
            ));
        }

        // Signature covers authenticatorData || SHA-256(clientDataJSON).
        let mut message = response.authenticator_data.clone();
        message.extend_from_slice(&client_data_hash(&response.client_data_json));
        CoseKey::parse(&credential.public_key)?.verify(&message, &response.signature)?;

        self.registry
            .verify_and_advance_counter(&credential_id, auth_data.sign_count)
            .await?;

        let secret = derive_secret_material(&self.server_secret, &credential);
        info!(user = %record.user_id, credential = %credential_id, "authentication verified");
        Ok((credential_id, secret))
    }

    /// Load, check and delete a ceremony record, exactly once.
    async fn consume(&self, ceremony_id: &CeremonyId, kind: CeremonyKind) -> Result<CeremonyRecord> {
        let lock = {
            let mut locks = self.ceremony_locks.lock().await;
            locks
                .entry(ceremony_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        let key = Self::record_key(ceremony_id);
        let bytes = self.store.get(&key).await?.ok_or_else(|| {
            Error::CeremonyMismatch(format!("Unknown or already consumed ceremony {}", ceremony_id))
        })?;
        // Delete before verifying: even a failed finish burns the ceremony.
        self.store.delete(&key).await?;
        self.ceremony_locks
            .lock()
            .await
            .remove(&ceremony_id.to_string());

        let record: CeremonyRecord = serde_json::from_slice(&bytes)?;
        if Utc::now() > record.expires_at {
            return Err(Error::Expired);
        }
        if record.kind != kind {
            return Err(Error::CeremonyMismatch(
                "Ceremony kind does not match this operation".to_string(),
            ));
        }
        Ok(record)
    }
}
