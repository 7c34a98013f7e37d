//! Cryptographic primitives for seedlock.
//!
//! This module provides:
//! - Key derivation using PBKDF2-HMAC-SHA256
//! - Authenticated encryption using XChaCha20-Poly1305 or AES-256-GCM
//! - Scoped secure memory with watchdog-enforced zeroing
//!
//! # Security Guarantees
//! - All key material lives in scoped buffers that zero on every exit path
//! - No plaintext or key material is ever logged
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod kdf;
pub mod keys;
pub mod memory;

pub use aead::{open, seal, AeadAlgorithm, SealedSeed};
pub use kdf::{derive_key, KdfParams};
pub use keys::{DerivedKey, KEY_LENGTH};
pub use memory::{ScopedBuffer, SecureMemory};
