//! Common types used throughout seedlock.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bytes::base64url;

/// Unique identifier for a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Create a new UserId from a string.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "UserId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a registered authenticator credential.
///
/// Wraps the raw credential id bytes chosen by the authenticator. Displayed
/// and persisted as unpadded base64url, matching the WebAuthn wire encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialId(#[serde(with = "base64url")] Vec<u8>);

impl CredentialId {
    /// Create from raw credential id bytes.
    ///
    /// # Errors
    /// - Returns error if the byte sequence is empty
    pub fn new(bytes: impl Into<Vec<u8>>) -> crate::Result<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(crate::Error::InvalidInput(
                "CredentialId cannot be empty".to_string(),
            ));
        }
        Ok(Self(bytes))
    }

    /// Get the raw credential id bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Unpadded base64url rendering used in storage keys and logs.
    pub fn encoded(&self) -> String {
        base64url::encode(&self.0)
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoded())
    }
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Wrap an existing identifier string.
            ///
            /// # Errors
            /// - Returns error if id is empty
            pub fn new(id: impl Into<String>) -> crate::Result<Self> {
                let id = id.into();
                if id.is_empty() {
                    return Err(crate::Error::InvalidInput(format!(
                        "{} cannot be empty",
                        stringify!($name)
                    )));
                }
                Ok(Self(id))
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a stored salt.
    SaltId
}

uuid_id! {
    /// Unique identifier for an encrypted vault entry.
    SeedId
}

uuid_id! {
    /// Unique identifier for a ceremony instance.
    ///
    /// A ceremony id is a single-use token: it is consumed exactly once by
    /// the matching `finish_*` call.
    CeremonyId
}

/// Purpose a salt is scoped to.
///
/// A closed set rather than a free-form string so salts cannot be silently
/// issued for unintended uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Key derivation for seed phrase encryption.
    SeedEncryption,
}

impl Purpose {
    /// Stable string form used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::SeedEncryption => "seed_encryption",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
