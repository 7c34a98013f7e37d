//! Key-value persistence abstraction for seedlock.
//!
//! Credential, salt, ceremony and vault-entry records are all persisted
//! through one narrow trait-based interface. The core imposes no
//! transaction model on the backend; referential-integrity checks are
//! handled by the callers under their own locks.
//!
//! # Design Principles
//! - Backend isolation: no storage-specific logic in vault or crypto modules
//! - Async operations: all I/O operations are async
//! - Opaque values: records cross this boundary as serialized bytes
//! - Unified error semantics: I/O failures surface as `StorageUnavailable`

pub mod local;
pub mod memory;
pub mod store;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use store::KvStore;
