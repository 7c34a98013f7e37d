//! Software authenticator for tests and demos.
//!
//! Emulates just enough of a FIDO2 token to drive both ceremonies end to
//! end without hardware: it mints a credential, produces a `none`-format
//! attestation object and signs assertions with a strictly increasing
//! counter. Knobs for the UV flag and the counter exist so verification
//! failures can be exercised deliberately.

use ciborium::value::Value;
use p256::ecdsa::signature::Signer as _;
use rand::RngCore;

use crate::authenticator::{flags, rp_id_hash};
use crate::ceremony::{AttestationResponse, AssertionResponse, AuthenticationChallenge, RegistrationChallenge};
use crate::cose::CoseKey;
use seedlock_common::bytes::base64url;

const CREDENTIAL_ID_LENGTH: usize = 16;
const SOFT_AAGUID: [u8; 16] = *b"seedlock-soft-tk";

/// Signature algorithm the soft token registers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftKeyType {
    /// ES256 (WebAuthn's mandatory algorithm).
    P256,
    /// EdDSA over Ed25519.
    Ed25519,
}

enum SoftKey {
    P256(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl SoftKey {
    fn generate(key_type: SoftKeyType) -> Self {
        match key_type {
            SoftKeyType::P256 => {
                SoftKey::P256(p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng))
            }
            SoftKeyType::Ed25519 => {
                SoftKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
            }
        }
    }

    fn public_cose(&self) -> CoseKey {
        match self {
            SoftKey::P256(key) => {
                let point = key.verifying_key().to_encoded_point(false);
                let x: [u8; 32] = point
                    .x()
                    .expect("uncompressed point carries x")
                    .as_slice()
                    .try_into()
                    .expect("P-256 coordinate is 32 bytes");
                let y: [u8; 32] = point
                    .y()
                    .expect("uncompressed point carries y")
                    .as_slice()
                    .try_into()
                    .expect("P-256 coordinate is 32 bytes");
                CoseKey::Es256 { x, y }
            }
            SoftKey::Ed25519(key) => CoseKey::Ed25519 {
                key: key.verifying_key().to_bytes(),
            },
        }
    }

    /// Sign in the wire form the relying party expects: DER for ES256,
    /// raw 64 bytes for Ed25519.
    fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            SoftKey::P256(key) => {
                let signature: p256::ecdsa::Signature = key.sign(message);
                signature.to_der().as_bytes().to_vec()
            }
            SoftKey::Ed25519(key) => {
                use ed25519_dalek::Signer;
                key.sign(message).to_bytes().to_vec()
            }
        }
    }
}

/// In-memory authenticator holding exactly one credential.
pub struct SoftAuthenticator {
    key: SoftKey,
    credential_id: Vec<u8>,
    sign_count: u32,
    user_verified: bool,
}

impl SoftAuthenticator {
    /// Create a fresh authenticator with a random key and credential id.
    pub fn new(key_type: SoftKeyType) -> Self {
        let mut credential_id = vec![0u8; CREDENTIAL_ID_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut credential_id);
        Self {
            key: SoftKey::generate(key_type),
            credential_id,
            sign_count: 0,
            user_verified: true,
        }
    }

    /// Raw credential id this authenticator registers under.
    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    /// Control whether assertions and attestations carry the UV flag.
    pub fn set_user_verified(&mut self, verified: bool) {
        self.user_verified = verified;
    }

    /// Force the signature counter backwards, as a cloned token would.
    pub fn rewind_sign_count(&mut self, count: u32) {
        self.sign_count = count;
    }

    fn flags_byte(&self, attested: bool) -> u8 {
        let mut byte = flags::UP;
        if self.user_verified {
            byte |= flags::UV;
        }
        if attested {
            byte |= flags::AT;
        }
        byte
    }

    fn client_data_json(ceremony_type: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": ceremony_type,
            "challenge": base64url::encode(challenge),
            "origin": origin,
        }))
        .expect("client data map serializes")
    }

    /// Answer a registration challenge with a `none`-format attestation.
    pub fn create_credential(
        &mut self,
        challenge: &RegistrationChallenge,
        origin: &str,
    ) -> AttestationResponse {
        let cose_key = self
            .key
            .public_cose()
            .to_cbor()
            .expect("COSE key of a known shape encodes");

        let mut auth_data = Vec::new();
        auth_data.extend_from_slice(&rp_id_hash(&challenge.rp_id));
        auth_data.push(self.flags_byte(true));
        auth_data.extend_from_slice(&self.sign_count.to_be_bytes());
        auth_data.extend_from_slice(&SOFT_AAGUID);
        auth_data.extend_from_slice(&(self.credential_id.len() as u16).to_be_bytes());
        auth_data.extend_from_slice(&self.credential_id);
        auth_data.extend_from_slice(&cose_key);

        let attestation = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text("none".into())),
            (Value::Text("attStmt".into()), Value::Map(Vec::new())),
            (Value::Text("authData".into()), Value::Bytes(auth_data)),
        ]);
        let mut attestation_object = Vec::new();
        ciborium::ser::into_writer(&attestation, &mut attestation_object)
            .expect("attestation map encodes");

        AttestationResponse {
            credential_id: self.credential_id.clone(),
            client_data_json: Self::client_data_json(
                crate::attestation::TYPE_CREATE,
                &challenge.challenge,
                origin,
            ),
            attestation_object,
        }
    }

    /// Answer an authentication challenge with a signed assertion.
    pub fn sign_assertion(
        &mut self,
        challenge: &AuthenticationChallenge,
        origin: &str,
    ) -> AssertionResponse {
        self.sign_count = self.sign_count.wrapping_add(1);

        let client_data_json = Self::client_data_json(
            crate::attestation::TYPE_GET,
            &challenge.challenge,
            origin,
        );

        let mut authenticator_data = Vec::new();
        authenticator_data.extend_from_slice(&rp_id_hash(&challenge.rp_id));
        authenticator_data.push(self.flags_byte(false));
        authenticator_data.extend_from_slice(&self.sign_count.to_be_bytes());

        let mut message = authenticator_data.clone();
        message.extend_from_slice(&crate::authenticator::client_data_hash(&client_data_json));

        AssertionResponse {
            credential_id: self.credential_id.clone(),
            client_data_json,
            authenticator_data,
            signature: self.key.sign(&message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::AttestationObject;
    use crate::authenticator::AuthenticatorData;

    fn registration_challenge() -> RegistrationChallenge {
        RegistrationChallenge {
            ceremony_id: seedlock_common::CeremonyId::generate(),
            challenge: vec![7u8; 32],
            rp_id: "localhost".to_string(),
            rp_name: "test".to_string(),
            user_verification: crate::ceremony::UserVerification::Preferred,
            exclude_credentials: Vec::new(),
            timeout_ms: 60_000,
        }
    }

    fn authentication_challenge() -> AuthenticationChallenge {
        AuthenticationChallenge {
            ceremony_id: seedlock_common::CeremonyId::generate(),
            challenge: vec![9u8; 32],
            rp_id: "localhost".to_string(),
            user_verification: crate::ceremony::UserVerification::Preferred,
            allow_credentials: Vec::new(),
            timeout_ms: 60_000,
        }
    }

    #[test]
    fn test_attestation_parses_back() {
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);
        let response = token.create_credential(&registration_challenge(), "https://localhost");

        let attestation = AttestationObject::parse(&response.attestation_object).unwrap();
        assert_eq!(attestation.fmt, "none");

        let auth_data = AuthenticatorData::parse(&attestation.auth_data).unwrap();
        let attested = auth_data.attested_credential.unwrap();
        assert_eq!(attested.credential_id, token.credential_id());
        CoseKey::parse(&attested.public_key_cbor).unwrap();
    }

    #[test]
    fn test_assertion_signature_verifies() {
        for key_type in [SoftKeyType::P256, SoftKeyType::Ed25519] {
            let mut token = SoftAuthenticator::new(key_type);
            let cose = token.key.public_cose();

            let assertion = token.sign_assertion(&authentication_challenge(), "https://localhost");
            let mut message = assertion.authenticator_data.clone();
            message.extend_from_slice(&crate::authenticator::client_data_hash(
                &assertion.client_data_json,
            ));
            cose.verify(&message, &assertion.signature).unwrap();
        }
    }

    #[test]
    fn test_sign_count_advances_per_assertion() {
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);
        let first = token.sign_assertion(&authentication_challenge(), "https://localhost");
        let second = token.sign_assertion(&authentication_challenge(), "https://localhost");

        let first = AuthenticatorData::parse(&first.authenticator_data).unwrap();
        let second = AuthenticatorData::parse(&second.authenticator_data).unwrap();
        assert_eq!(first.sign_count, 1);
        assert_eq!(second.sign_count, 2);
    }

    #[test]
    fn test_uv_flag_toggle() {
        let mut token = SoftAuthenticator::new(SoftKeyType::P256);
        token.set_user_verified(false);
        let assertion = token.sign_assertion(&authentication_challenge(), "https://localhost");
        let parsed = AuthenticatorData::parse(&assertion.authenticator_data).unwrap();
        assert!(parsed.user_present());
        assert!(!parsed.user_verified());
    }
}
