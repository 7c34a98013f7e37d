//! Common utilities and types shared across seedlock modules.
//!
//! This module provides foundational types that are used throughout the
//! codebase, ensuring consistency and type safety.

pub mod bytes;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{CeremonyId, CredentialId, Purpose, SaltId, SeedId, UserId};
