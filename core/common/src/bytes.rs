//! Serde adapters for binary fields.
//!
//! Persisted records carry ciphertext, nonces, salts and public keys. These
//! must serialize as their raw byte encoding (base64 text in JSON), never as
//! arrays of integers.

/// Standard base64 encoding for opaque binary record fields.
pub mod base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn decode(s: &str) -> crate::Result<Vec<u8>> {
        STANDARD
            .decode(s)
            .map_err(|e| crate::Error::Serialization(format!("Invalid base64: {}", e)))
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Unpadded base64url, the encoding WebAuthn uses on the wire for
/// credential ids, challenges and response payloads.
pub mod base64url {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Decode base64url, tolerating padded input. Browser layers disagree on
    /// padding, so both forms are accepted.
    pub fn decode(s: &str) -> crate::Result<Vec<u8>> {
        URL_SAFE_NO_PAD
            .decode(s.trim_end_matches('='))
            .map_err(|e| crate::Error::Serialization(format!("Invalid base64url: {}", e)))
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode(&s).map_err(serde::de::Error::custom)
    }
}
