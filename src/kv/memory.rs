//! In-process stand-in for the external TTL store.
//!
//! Entries carry a deadline computed from the injected clock and disappear
//! once the clock moves past it. Every operation runs under one mutex, which
//! makes `take` atomic. Writes purge expired entries, so keys that are never
//! read again do not accumulate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::KvStore;
use crate::{clock::Clock, error::AuthError};

struct Entry {
    value: Vec<u8>,
    deadline: DateTime<Utc>,
}

pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKv {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn deadline(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl =
            chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(36_500));
        self.clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Number of entries still alive.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let entries = self.entries.lock().await;
        entries.values().filter(|entry| now <= entry.deadline).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if now <= entry.deadline => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), AuthError> {
        let now = self.clock.now();
        let deadline = self.deadline(ttl);
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| now <= entry.deadline);
        entries.insert(key.to_string(), Entry { value, deadline });
        Ok(())
    }

    async fn swap_ex(
        &self,
        key: &str,
        current: &[u8],
        value: Vec<u8>,
        ttl: Duration,
    ) -> Result<bool, AuthError> {
        let now = self.clock.now();
        let deadline = self.deadline(ttl);
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(entry) if now <= entry.deadline => {
                if entry.value != current {
                    return Ok(false);
                }
                entry.value = value;
                entry.deadline = deadline;
                Ok(true)
            }
            Some(_) => {
                entries.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError> {
        let now = self.clock.now();
        let removed = self.entries.lock().await.remove(key);
        Ok(removed
            .filter(|entry| now <= entry.deadline)
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<bool, AuthError> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, AuthError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| now <= entry.deadline);
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
