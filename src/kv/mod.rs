//! TTL-capable key-value backends shared by the session and once-token stores.
//!
//! The trait is object safe so the backend is picked once at startup and
//! handed around as `Arc<dyn KvStore>`.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::AuthError;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryKv;
pub use self::redis::RedisKv;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` when absent or physically expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError>;

    /// Write a value with a backend-level time to live.
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), AuthError>;

    /// Overwrite a value only if it still equals `current`.
    ///
    /// Returns `false` when the key is absent or holds something else, so a
    /// read-modify-write never clobbers a concurrent writer or recreates a
    /// deleted key.
    async fn swap_ex(
        &self,
        key: &str,
        current: &[u8],
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, AuthError>;

    /// Atomically read and delete a value.
    ///
    /// At most one concurrent caller observes `Some` for a given key.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError>;

    /// Delete a key. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> Result<bool, AuthError>;

    /// List every live key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, AuthError>;
}

/// Backend TTLs are whole seconds and must be positive.
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    let mut seconds = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        seconds += 1;
    }
    seconds.max(1)
}
