//! Authenticator-bound seed vault.
//!
//! This module provides:
//! - Configuration for relying-party identity, ciphers and timeouts
//! - Per-credential salt lifecycle with referential integrity
//! - Sealed seed entries with identity-bound associated data
//! - BIP-39 mnemonic helpers
//! - The [`SeedLock`] facade tying ceremonies, credentials, salts and the
//!   vault together
//!
//! # Security Guarantees
//! - Keys are derived per authentication and never persisted
//! - Decrypted seeds only exist inside watchdog-guarded scoped buffers
//! - A salt cannot be deleted while any entry still references it

pub mod config;
pub mod manager;
pub mod mnemonic;
pub mod salts;
pub mod vault;

pub use config::VaultConfig;
pub use manager::SeedLock;
pub use salts::{SaltManager, SaltRecord};
pub use vault::{SeedVault, VaultEntry};
