//! Authenticated encryption for seed material.
//!
//! Two ciphers are supported: XChaCha20-Poly1305 (default; its 24-byte
//! nonce is safe for random generation) and AES-256-GCM for parity with
//! deployments standardized on AES. Every seal draws a fresh random nonce
//! of the cipher's required length; nonce, ciphertext and tag are kept as
//! separate fields in the stored entry.

use aes_gcm::Aes256Gcm;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::keys::DerivedKey;
use seedlock_common::bytes::base64;
use seedlock_common::{Error, Result};

/// Authentication tag size in bytes.
pub const TAG_LENGTH: usize = 16;

/// Selectable AEAD cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AeadAlgorithm {
    /// XChaCha20-Poly1305 with a 24-byte nonce.
    XChaCha20Poly1305,
    /// AES-256-GCM with a 12-byte nonce.
    Aes256Gcm,
}

impl AeadAlgorithm {
    /// Nonce length required by the cipher.
    pub fn nonce_length(&self) -> usize {
        match self {
            AeadAlgorithm::XChaCha20Poly1305 => 24,
            AeadAlgorithm::Aes256Gcm => 12,
        }
    }
}

impl Default for AeadAlgorithm {
    fn default() -> Self {
        AeadAlgorithm::XChaCha20Poly1305
    }
}

/// Output of a seal operation, ready for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedSeed {
    /// Cipher the seed was sealed with.
    pub algorithm: AeadAlgorithm,
    /// Random nonce, unique per key.
    #[serde(with = "base64")]
    pub nonce: Vec<u8>,
    /// Ciphertext without the tag.
    #[serde(with = "base64")]
    pub ciphertext: Vec<u8>,
    /// Poly1305/GHASH authentication tag.
    #[serde(with = "base64")]
    pub tag: Vec<u8>,
}

/// Encrypt `plaintext` under `key`, binding `aad` as associated data.
///
/// # Postconditions
/// - The nonce is freshly drawn from the OS RNG
/// - `aad` must be presented unchanged at open time
pub fn seal(
    algorithm: AeadAlgorithm,
    key: &DerivedKey,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<SealedSeed> {
    let mut nonce = vec![0u8; algorithm.nonce_length()];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let mut ciphertext = key.expose(|key_bytes| match algorithm {
        AeadAlgorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(key_bytes)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .encrypt(nonce.as_slice().into(), payload)
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e))),
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key_bytes)
            .map_err(|e| Error::Crypto(e.to_string()))?
            .encrypt(nonce.as_slice().into(), payload)
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e))),
    })??;

    // The aead crates append the tag; store it as its own field.
    let tag = ciphertext.split_off(ciphertext.len() - TAG_LENGTH);

    Ok(SealedSeed {
        algorithm,
        nonce,
        ciphertext,
        tag,
    })
}

/// Decrypt a sealed seed.
///
/// Fails closed: any authentication failure (wrong key, flipped bit in
/// ciphertext, nonce or tag, different associated data) surfaces as the
/// single [`Error::TagMismatch`] with no partial output. The underlying
/// Poly1305/GHASH verification is constant-time in the ciphertext contents.
pub fn open(key: &DerivedKey, sealed: &SealedSeed, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.nonce.len() != sealed.algorithm.nonce_length() || sealed.tag.len() != TAG_LENGTH {
        return Err(Error::TagMismatch);
    }

    let mut combined = Vec::with_capacity(sealed.ciphertext.len() + TAG_LENGTH);
    combined.extend_from_slice(&sealed.ciphertext);
    combined.extend_from_slice(&sealed.tag);

    let payload = Payload {
        msg: &combined,
        aad,
    };

    let plaintext = key.expose(|key_bytes| match sealed.algorithm {
        AeadAlgorithm::XChaCha20Poly1305 => XChaCha20Poly1305::new_from_slice(key_bytes)
            .map_err(|_| Error::TagMismatch)?
            .decrypt(sealed.nonce.as_slice().into(), payload)
            .map_err(|_| Error::TagMismatch),
        AeadAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key_bytes)
            .map_err(|_| Error::TagMismatch)?
            .decrypt(sealed.nonce.as_slice().into(), payload)
            .map_err(|_| Error::TagMismatch),
    })??;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;
    use crate::memory::SecureMemory;

    fn test_key(memory: &SecureMemory, fill: u8) -> DerivedKey {
        DerivedKey::from_buffer(memory.acquire_from(&[fill; KEY_LENGTH]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_seal_open_roundtrip_both_ciphers() {
        let memory = SecureMemory::default();
        let key = test_key(&memory, 0xA1);
        let aad = b"user:alice/cred:abc/salt:s1";

        for algorithm in [AeadAlgorithm::XChaCha20Poly1305, AeadAlgorithm::Aes256Gcm] {
            let sealed = seal(algorithm, &key, b"zoo zoo zoo zoo wrong", aad).unwrap();
            assert_eq!(sealed.nonce.len(), algorithm.nonce_length());
            assert_eq!(sealed.tag.len(), TAG_LENGTH);

            let plaintext = open(&key, &sealed, aad).unwrap();
            assert_eq!(&plaintext[..], b"zoo zoo zoo zoo wrong");
        }
    }

    #[tokio::test]
    async fn test_wrong_key_fails_closed() {
        let memory = SecureMemory::default();
        let key = test_key(&memory, 0x01);
        let other = test_key(&memory, 0x02);

        let sealed = seal(AeadAlgorithm::default(), &key, b"secret", b"").unwrap();
        assert!(matches!(open(&other, &sealed, b""), Err(Error::TagMismatch)));
    }

    #[tokio::test]
    async fn test_tampered_fields_fail() {
        let memory = SecureMemory::default();
        let key = test_key(&memory, 0x33);
        let sealed = seal(AeadAlgorithm::default(), &key, b"seed words here", b"aad").unwrap();

        let mut bad = sealed.clone();
        bad.ciphertext[0] ^= 0x01;
        assert!(matches!(open(&key, &bad, b"aad"), Err(Error::TagMismatch)));

        let mut bad = sealed.clone();
        bad.nonce[0] ^= 0x01;
        assert!(matches!(open(&key, &bad, b"aad"), Err(Error::TagMismatch)));

        let mut bad = sealed.clone();
        bad.tag[TAG_LENGTH - 1] ^= 0x80;
        assert!(matches!(open(&key, &bad, b"aad"), Err(Error::TagMismatch)));
    }

    #[tokio::test]
    async fn test_wrong_aad_fails() {
        let memory = SecureMemory::default();
        let key = test_key(&memory, 0x44);
        let sealed = seal(AeadAlgorithm::default(), &key, b"secret", b"correct aad").unwrap();
        assert!(matches!(
            open(&key, &sealed, b"wrong aad"),
            Err(Error::TagMismatch)
        ));
    }

    #[tokio::test]
    async fn test_nonces_are_fresh() {
        let memory = SecureMemory::default();
        let key = test_key(&memory, 0x55);
        let a = seal(AeadAlgorithm::default(), &key, b"same", b"").unwrap();
        let b = seal(AeadAlgorithm::default(), &key, b"same", b"").unwrap();
        assert_ne!(a.nonce, b.nonce);
    }

    #[tokio::test]
    async fn test_sealed_seed_serializes_as_base64() {
        let memory = SecureMemory::default();
        let key = test_key(&memory, 0x66);
        let sealed = seal(AeadAlgorithm::default(), &key, b"secret", b"").unwrap();

        let json = serde_json::to_value(&sealed).unwrap();
        assert!(json["ciphertext"].is_string());
        assert!(json["nonce"].is_string());
        assert!(json["tag"].is_string());
    }
}
