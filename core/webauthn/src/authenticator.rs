//! Authenticator data parsing.
//!
//! The authenticator data block is the byte string every assertion and
//! attestation signs over:
//!
//! ```text
//! rpIdHash (32) || flags (1) || signCount (4, big-endian)
//!     [ || aaguid (16) || credIdLen (2) || credId || COSE public key ]
//! ```
//!
//! The bracketed attested-credential section is present only when the AT
//! flag is set (registration).

use sha2::{Digest, Sha256};

use seedlock_common::{Error, Result};

/// Flag bits in the authenticator data flags byte.
pub mod flags {
    /// User present (touch).
    pub const UP: u8 = 0x01;
    /// User verified (PIN or biometric).
    pub const UV: u8 = 0x04;
    /// Attested credential data included.
    pub const AT: u8 = 0x40;
    /// Extension data included.
    pub const ED: u8 = 0x80;
}

const RP_ID_HASH_LEN: usize = 32;
const HEADER_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const AAGUID_LEN: usize = 16;

/// Attested credential data carried in registration responses.
#[derive(Debug, Clone)]
pub struct AttestedCredential {
    /// Authenticator model identifier.
    pub aaguid: [u8; AAGUID_LEN],
    /// Credential id chosen by the authenticator.
    pub credential_id: Vec<u8>,
    /// COSE-encoded public key, kept as raw CBOR for storage.
    pub public_key_cbor: Vec<u8>,
}

/// Parsed authenticator data.
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    /// SHA-256 of the relying party id.
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    /// Raw flags byte.
    pub flags: u8,
    /// Signature counter reported by the authenticator.
    pub sign_count: u32,
    /// Present when the AT flag is set.
    pub attested_credential: Option<AttestedCredential>,
}

impl AuthenticatorData {
    /// Parse the fixed header and, when flagged, the attested credential.
    ///
    /// # Errors
    /// - Returns error on truncated input or inconsistent lengths
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidInput(format!(
                "Authenticator data too short: {} bytes",
                bytes.len()
            )));
        }

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(&bytes[..RP_ID_HASH_LEN]);
        let flags = bytes[RP_ID_HASH_LEN];
        let sign_count = u32::from_be_bytes(
            bytes[RP_ID_HASH_LEN + 1..HEADER_LEN]
                .try_into()
                .expect("slice length checked above"),
        );

        let attested_credential = if flags & flags::AT != 0 {
            let rest = &bytes[HEADER_LEN..];
            if rest.len() < AAGUID_LEN + 2 {
                return Err(Error::InvalidInput(
                    "Attested credential data truncated".to_string(),
                ));
            }
            let mut aaguid = [0u8; AAGUID_LEN];
            aaguid.copy_from_slice(&rest[..AAGUID_LEN]);
            let id_len =
                u16::from_be_bytes([rest[AAGUID_LEN], rest[AAGUID_LEN + 1]]) as usize;
            let id_start = AAGUID_LEN + 2;
            if rest.len() < id_start + id_len {
                return Err(Error::InvalidInput(
                    "Credential id truncated".to_string(),
                ));
            }
            let credential_id = rest[id_start..id_start + id_len].to_vec();
            // The COSE key is the remaining single CBOR item. Extensions
            // after it are not carried over.
            let public_key_cbor = rest[id_start + id_len..].to_vec();
            if public_key_cbor.is_empty() {
                return Err(Error::InvalidInput(
                    "Missing COSE public key".to_string(),
                ));
            }
            Some(AttestedCredential {
                aaguid,
                credential_id,
                public_key_cbor,
            })
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    /// Whether the user-presence flag is set.
    pub fn user_present(&self) -> bool {
        self.flags & flags::UP != 0
    }

    /// Whether the user-verification flag is set.
    pub fn user_verified(&self) -> bool {
        self.flags & flags::UV != 0
    }
}

/// SHA-256 hash of a relying party id, as carried in authenticator data.
pub fn rp_id_hash(rp_id: &str) -> [u8; RP_ID_HASH_LEN] {
    let digest = Sha256::digest(rp_id.as_bytes());
    digest.into()
}

/// SHA-256 of the raw client data JSON; the second half of the signed
/// message in assertions.
pub fn client_data_hash(client_data_json: &[u8]) -> [u8; 32] {
    Sha256::digest(client_data_json).into()
}
