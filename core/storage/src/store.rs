//! Storage trait definition.

use async_trait::async_trait;

use seedlock_common::Result;

/// Key-value persistence backend.
///
/// Keys are flat strings with `/`-separated prefixes (`credential/…`,
/// `salt/…`, `seed/…`, `ceremony/…`); values are opaque serialized records.
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    ///
    /// # Errors
    /// - Backend I/O failure
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Postconditions
    /// - The value is durable before the call returns
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove the value under `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all keys beginning with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}
