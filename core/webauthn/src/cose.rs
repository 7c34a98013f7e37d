//! COSE public key decoding and signature verification.
//!
//! Supports the two algorithms the vault accepts at registration: ES256
//! (ECDSA over P-256, COSE alg -7, WebAuthn's mandatory algorithm) and
//! EdDSA over Ed25519 (COSE alg -8).

use ciborium::value::{Integer, Value};

use seedlock_common::{Error, Result};

/// COSE algorithm identifier for ES256.
pub const ALG_ES256: i64 = -7;
/// COSE algorithm identifier for EdDSA.
pub const ALG_EDDSA: i64 = -8;

const KTY_OKP: i64 = 1;
const KTY_EC2: i64 = 2;
const CRV_P256: i64 = 1;
const CRV_ED25519: i64 = 6;

/// Decoded authenticator public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoseKey {
    /// P-256 point for ES256 verification.
    Es256 { x: [u8; 32], y: [u8; 32] },
    /// Ed25519 point for EdDSA verification.
    Ed25519 { key: [u8; 32] },
}

impl CoseKey {
    /// COSE algorithm identifier for this key.
    pub fn algorithm(&self) -> i64 {
        match self {
            CoseKey::Es256 { .. } => ALG_ES256,
            CoseKey::Ed25519 { .. } => ALG_EDDSA,
        }
    }

    /// Decode a COSE_Key CBOR map.
    ///
    /// # Errors
    /// - Returns `AttestationInvalid` for malformed CBOR, unknown key
    ///   types/curves, or coordinate length mismatches
    pub fn parse(cbor: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(cbor)
            .map_err(|e| Error::AttestationInvalid(format!("Bad COSE key CBOR: {}", e)))?;

        let map = match value {
            Value::Map(entries) => entries,
            _ => {
                return Err(Error::AttestationInvalid(
                    "COSE key is not a CBOR map".to_string(),
                ))
            }
        };

        let kty = require_int(&map, 1, "kty")?;
        let alg = require_int(&map, 3, "alg")?;
        let crv = require_int(&map, -1, "crv")?;

        match (kty, alg, crv) {
            (KTY_EC2, ALG_ES256, CRV_P256) => {
                let x = require_coordinate(&map, -2, "x")?;
                let y = require_coordinate(&map, -3, "y")?;
                Ok(CoseKey::Es256 { x, y })
            }
            (KTY_OKP, ALG_EDDSA, CRV_ED25519) => {
                let key = require_coordinate(&map, -2, "x")?;
                Ok(CoseKey::Ed25519 { key })
            }
            _ => Err(Error::AttestationInvalid(format!(
                "Unsupported COSE key: kty={}, alg={}, crv={}",
                kty, alg, crv
            ))),
        }
    }

    /// Encode back to a COSE_Key CBOR map.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let map = match self {
            CoseKey::Es256 { x, y } => Value::Map(vec![
                (int(1), int(KTY_EC2)),
                (int(3), int(ALG_ES256)),
                (int(-1), int(CRV_P256)),
                (int(-2), Value::Bytes(x.to_vec())),
                (int(-3), Value::Bytes(y.to_vec())),
            ]),
            CoseKey::Ed25519 { key } => Value::Map(vec![
                (int(1), int(KTY_OKP)),
                (int(3), int(ALG_EDDSA)),
                (int(-1), int(CRV_ED25519)),
                (int(-2), Value::Bytes(key.to_vec())),
            ]),
        };

        let mut out = Vec::new();
        ciborium::ser::into_writer(&map, &mut out)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(out)
    }

    /// Verify `signature` over `message`.
    ///
    /// ES256 signatures arrive DER-encoded per WebAuthn; Ed25519
    /// signatures are the raw 64-byte form.
    ///
    /// # Errors
    /// - Returns `SignatureInvalid` on any verification failure
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            CoseKey::Es256 { x, y } => {
                use p256::ecdsa::signature::Verifier;
                use p256::ecdsa::{Signature, VerifyingKey};
                use p256::EncodedPoint;

                let point = EncodedPoint::from_affine_coordinates(
                    x.as_slice().into(),
                    y.as_slice().into(),
                    false,
                );
                let key = VerifyingKey::from_encoded_point(&point)
                    .map_err(|_| Error::SignatureInvalid)?;
                let sig = Signature::from_der(signature).map_err(|_| Error::SignatureInvalid)?;
                key.verify(message, &sig).map_err(|_| Error::SignatureInvalid)
            }
            CoseKey::Ed25519 { key } => {
                use ed25519_dalek::{Signature, Verifier, VerifyingKey};

                let key = VerifyingKey::from_bytes(key).map_err(|_| Error::SignatureInvalid)?;
                let sig = Signature::from_slice(signature).map_err(|_| Error::SignatureInvalid)?;
                key.verify(message, &sig).map_err(|_| Error::SignatureInvalid)
            }
        }
    }
}

fn int(v: i64) -> Value {
    Value::Integer(Integer::from(v))
}

fn lookup<'a>(map: &'a [(Value, Value)], label: i64) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == label as i128))
        .map(|(_, v)| v)
}

fn require_int(map: &[(Value, Value)], label: i64, name: &str) -> Result<i64> {
    match lookup(map, label) {
        Some(Value::Integer(i)) => i64::try_from(i128::from(*i))
            .map_err(|_| Error::AttestationInvalid(format!("COSE {} out of range", name))),
        _ => Err(Error::AttestationInvalid(format!("COSE key missing {}", name))),
    }
}

fn require_coordinate(map: &[(Value, Value)], label: i64, name: &str) -> Result<[u8; 32]> {
    match lookup(map, label) {
        Some(Value::Bytes(bytes)) => bytes.as_slice().try_into().map_err(|_| {
            Error::AttestationInvalid(format!(
                "COSE {} has invalid length {}",
                name,
                bytes.len()
            ))
        }),
        _ => Err(Error::AttestationInvalid(format!("COSE key missing {}", name))),
    }
}
