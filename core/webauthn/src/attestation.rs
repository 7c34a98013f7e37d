//! Attestation object and client data parsing.

use ciborium::value::Value;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use seedlock_common::bytes::base64url;
use seedlock_common::{Error, Result};

/// Client data type for registration ceremonies.
pub const TYPE_CREATE: &str = "webauthn.create";
/// Client data type for authentication ceremonies.
pub const TYPE_GET: &str = "webauthn.get";

/// Parsed `clientDataJSON`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientData {
    /// `webauthn.create` or `webauthn.get`.
    #[serde(rename = "type")]
    pub ceremony_type: String,
    /// Base64url-encoded challenge echoed by the client.
    pub challenge: String,
    /// Origin the client saw.
    pub origin: String,
}

impl ClientData {
    /// Parse and check client data against the ceremony's expectations.
    ///
    /// The challenge comparison is constant-time; type and origin are
    /// public values and compared normally.
    ///
    /// # Errors
    /// - `CeremonyMismatch` on type, challenge or origin mismatch
    pub fn verify(
        raw: &[u8],
        expected_type: &str,
        expected_challenge: &[u8],
        expected_origin: &str,
    ) -> Result<Self> {
        let parsed: ClientData = serde_json::from_slice(raw)
            .map_err(|e| Error::CeremonyMismatch(format!("Bad client data JSON: {}", e)))?;

        if parsed.ceremony_type != expected_type {
            return Err(Error::CeremonyMismatch(format!(
                "Client data type is {:?}, expected {:?}",
                parsed.ceremony_type, expected_type
            )));
        }

        let challenge = base64url::decode(&parsed.challenge)
            .map_err(|_| Error::CeremonyMismatch("Undecodable challenge".to_string()))?;
        if !bool::from(challenge.ct_eq(expected_challenge)) {
            return Err(Error::CeremonyMismatch(
                "Challenge does not match ceremony".to_string(),
            ));
        }

        if parsed.origin != expected_origin {
            return Err(Error::CeremonyMismatch(format!(
                "Origin {:?} does not match relying party",
                parsed.origin
            )));
        }

        Ok(parsed)
    }
}

/// Parsed attestation object from a registration response.
#[derive(Debug, Clone)]
pub struct AttestationObject {
    /// Attestation statement format (`none`, `packed`, ...).
    pub fmt: String,
    /// Raw authenticator data bytes.
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    /// Decode the CBOR attestation object and structurally validate the
    /// attestation statement.
    ///
    /// Format `none` must carry an empty statement. Any other format must
    /// at least carry `alg` and `sig` entries; deeper chain validation is
    /// out of scope for a `none`-preference relying party.
    ///
    /// # Errors
    /// - `AttestationInvalid` on malformed CBOR or statement structure
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| Error::AttestationInvalid(format!("Bad attestation CBOR: {}", e)))?;

        let map = match value {
            Value::Map(entries) => entries,
            _ => {
                return Err(Error::AttestationInvalid(
                    "Attestation object is not a CBOR map".to_string(),
                ))
            }
        };

        let fmt = match text_entry(&map, "fmt") {
            Some(fmt) => fmt,
            None => {
                return Err(Error::AttestationInvalid(
                    "Attestation object missing fmt".to_string(),
                ))
            }
        };

        let auth_data = match entry(&map, "authData") {
            Some(Value::Bytes(bytes)) => bytes.clone(),
            _ => {
                return Err(Error::AttestationInvalid(
                    "Attestation object missing authData".to_string(),
                ))
            }
        };

        let att_stmt = match entry(&map, "attStmt") {
            Some(Value::Map(entries)) => entries,
            _ => {
                return Err(Error::AttestationInvalid(
                    "Attestation object missing attStmt".to_string(),
                ))
            }
        };

        if fmt == "none" {
            if !att_stmt.is_empty() {
                return Err(Error::AttestationInvalid(
                    "Format none must carry an empty statement".to_string(),
                ));
            }
        } else {
            let has_alg = att_stmt
                .iter()
                .any(|(k, _)| matches!(k, Value::Text(t) if t == "alg"));
            let has_sig = att_stmt
                .iter()
                .any(|(k, v)| matches!(k, Value::Text(t) if t == "sig") && v.is_bytes());
            if !has_alg || !has_sig {
                return Err(Error::AttestationInvalid(format!(
                    "Statement for format {:?} is structurally invalid",
                    fmt
                )));
            }
        }

        Ok(Self { fmt, auth_data })
    }
}

fn entry<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(t) if t == key))
        .map(|(_, v)| v)
}

fn text_entry(map: &[(Value, Value)], key: &str) -> Option<String> {
    match entry(map, key) {
        Some(Value::Text(t)) => Some(t.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_data_json(ty: &str, challenge: &[u8], origin: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "type": ty,
            "challenge": base64url::encode(challenge),
            "origin": origin,
        }))
        .unwrap()
    }

    fn attestation_cbor(fmt: &str, att_stmt: Value, auth_data: &[u8]) -> Vec<u8> {
        let map = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(fmt.into())),
            (Value::Text("attStmt".into()), att_stmt),
            (Value::Text("authData".into()), Value::Bytes(auth_data.to_vec())),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out).unwrap();
        out
    }

    #[test]
    fn test_client_data_accepts_match() {
        let raw = client_data_json(TYPE_CREATE, b"challenge-bytes", "https://localhost");
        let parsed =
            ClientData::verify(&raw, TYPE_CREATE, b"challenge-bytes", "https://localhost")
                .unwrap();
        assert_eq!(parsed.ceremony_type, TYPE_CREATE);
    }

    #[test]
    fn test_client_data_rejects_wrong_type() {
        let raw = client_data_json(TYPE_GET, b"c", "https://localhost");
        assert!(matches!(
            ClientData::verify(&raw, TYPE_CREATE, b"c", "https://localhost"),
            Err(Error::CeremonyMismatch(_))
        ));
    }

    #[test]
    fn test_client_data_rejects_wrong_challenge() {
        let raw = client_data_json(TYPE_CREATE, b"right", "https://localhost");
        assert!(matches!(
            ClientData::verify(&raw, TYPE_CREATE, b"wrong", "https://localhost"),
            Err(Error::CeremonyMismatch(_))
        ));
    }

    #[test]
    fn test_client_data_rejects_wrong_origin() {
        let raw = client_data_json(TYPE_CREATE, b"c", "https://evil.example");
        assert!(ClientData::verify(&raw, TYPE_CREATE, b"c", "https://localhost").is_err());
    }

    #[test]
    fn test_attestation_none_with_empty_statement() {
        let cbor = attestation_cbor("none", Value::Map(vec![]), &[1, 2, 3]);
        let parsed = AttestationObject::parse(&cbor).unwrap();
        assert_eq!(parsed.fmt, "none");
        assert_eq!(parsed.auth_data, vec![1, 2, 3]);
    }

    #[test]
    fn test_attestation_none_with_statement_rejected() {
        let stmt = Value::Map(vec![(Value::Text("sig".into()), Value::Bytes(vec![0]))]);
        let cbor = attestation_cbor("none", stmt, &[]);
        assert!(AttestationObject::parse(&cbor).is_err());
    }

    #[test]
    fn test_attestation_packed_requires_alg_and_sig() {
        let good = Value::Map(vec![
            (Value::Text("alg".into()), Value::Integer((-7).into())),
            (Value::Text("sig".into()), Value::Bytes(vec![0u8; 70])),
        ]);
        let cbor = attestation_cbor("packed", good, &[9]);
        assert!(AttestationObject::parse(&cbor).is_ok());

        let missing_sig = Value::Map(vec![(
            Value::Text("alg".into()),
            Value::Integer((-7).into()),
        )]);
        let cbor = attestation_cbor("packed", missing_sig, &[9]);
        assert!(matches!(
            AttestationObject::parse(&cbor),
            Err(Error::AttestationInvalid(_))
        ));
    }

    #[test]
    fn test_attestation_rejects_garbage() {
        assert!(AttestationObject::parse(b"not cbor at all").is_err());
    }
}
