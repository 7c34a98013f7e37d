//! Stable secret material derived from a credential binding.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::registry::Credential;

type HmacSha256 = Hmac<Sha256>;

/// Derive stable, ceremony-independent secret material for a credential.
///
/// Assertion signatures cannot serve as key-derivation input: ECDSA is
/// randomized, so every ceremony would produce a different "secret". What
/// is stable across ceremonies is the authenticator/credential binding
/// itself, so the material is an HMAC over the credential id and its COSE
/// public key under a server-held secret.
///
/// Known limitation: without an authenticator secret extension (such as
/// FIDO2 hmac-secret) the effective key strength reduces to possession of
/// the per-credential salt plus this server secret. Callers must treat the
/// server secret accordingly; this function does not pretend otherwise.
pub fn derive_secret_material(server_secret: &[u8], credential: &Credential) -> Zeroizing<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(server_secret)
        .expect("HMAC accepts keys of any length");
    mac.update(credential.credential_id.as_bytes());
    mac.update(&credential.public_key);
    Zeroizing::new(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use seedlock_common::{CredentialId, UserId};

    fn credential(id_byte: u8, key_byte: u8) -> Credential {
        Credential {
            credential_id: CredentialId::new(vec![id_byte; 16]).unwrap(),
            user_id: UserId::new("alice").unwrap(),
            public_key: vec![key_byte; 40],
            signature_counter: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_stable_across_calls() {
        let cred = credential(1, 2);
        let a = derive_secret_material(b"server secret", &cred);
        let b = derive_secret_material(b"server secret", &cred);
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_differs_per_credential_and_secret() {
        let a = derive_secret_material(b"server secret", &credential(1, 2));
        let b = derive_secret_material(b"server secret", &credential(3, 2));
        let c = derive_secret_material(b"other secret", &credential(1, 2));
        assert_ne!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_counter_does_not_affect_material() {
        // The counter mutates on every authentication; key material must not.
        let mut cred = credential(1, 2);
        let before = derive_secret_material(b"s", &cred);
        cred.signature_counter = 99;
        let after = derive_secret_material(b"s", &cred);
        assert_eq!(*before, *after);
    }
}
