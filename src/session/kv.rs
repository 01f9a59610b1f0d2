//! Session backend over a TTL key-value store.
//!
//! Records live under `session:<id>` as JSON with a backend TTL equal to the
//! remaining lifetime, so expired sessions disappear without a sweeper.
//!
//! `refresh` and `set_data` rewrite the whole record with a compare-and-swap
//! against the bytes they read, retrying when another writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{generate_session_id, short_id, SessionConfig, SessionInfo, SessionStore};
use crate::{clock::Clock, error::AuthError, kv::KvStore};

pub const SESSION_KEY_PREFIX: &str = "session:";

/// Compare-and-swap attempts before an update gives up.
const UPDATE_ATTEMPTS: usize = 8;

pub struct KvSessionStore {
    kv: Arc<dyn KvStore>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl KvSessionStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self { kv, config, clock }
    }

    fn key(session_id: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{session_id}")
    }

    /// Backend TTL for a record expiring at `expires_at`.
    fn ttl_until(&self, expires_at: DateTime<Utc>) -> Duration {
        (expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::from_secs(1))
    }

    async fn load(&self, key: &str) -> Result<SessionInfo, AuthError> {
        let bytes = self.kv.get(key).await?.ok_or(AuthError::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Apply `change` to the stored record and write it back atomically.
    async fn update<F>(&self, session_id: &str, change: F) -> Result<SessionInfo, AuthError>
    where
        F: Fn(&mut SessionInfo) -> Result<(), AuthError> + Send + Sync,
    {
        let key = Self::key(session_id);
        for _ in 0..UPDATE_ATTEMPTS {
            let current = self.kv.get(&key).await?.ok_or(AuthError::NotFound)?;
            let mut info: SessionInfo = serde_json::from_slice(&current)?;
            change(&mut info)?;
            let payload = serde_json::to_vec(&info)?;
            if self
                .kv
                .swap_ex(&key, &current, payload, self.ttl_until(info.expires_at))
                .await?
            {
                return Ok(info);
            }
            debug!("Session {} changed underneath, retrying", short_id(session_id));
        }
        Err(AuthError::Backend(
            "session update lost every compare-and-swap".to_string(),
        ))
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    #[instrument(skip_all, fields(user_id = info.user_id))]
    async fn create(&self, mut info: SessionInfo) -> Result<String, AuthError> {
        let session_id = generate_session_id()?;
        let now = self.clock.now();
        info.session_id.clone_from(&session_id);
        info.created_at = now;
        info.expires_at = self.config.expiry_from(now)?;

        let payload = serde_json::to_vec(&info)?;
        self.kv
            .set_ex(
                &Self::key(&session_id),
                payload,
                self.ttl_until(info.expires_at),
            )
            .await?;
        debug!("Session {} created", short_id(&session_id));
        Ok(session_id)
    }

    async fn get(&self, session_id: &str) -> Result<SessionInfo, AuthError> {
        self.load(&Self::key(session_id)).await
    }

    #[instrument(skip_all)]
    async fn verify(&self, session_id: &str) -> Result<SessionInfo, AuthError> {
        let key = Self::key(session_id);
        let info = self.load(&key).await?;
        if info.is_expired_at(self.clock.now()) {
            self.kv.delete(&key).await?;
            debug!("Session {} expired", short_id(session_id));
            return Err(AuthError::Expired);
        }
        Ok(info)
    }

    async fn refresh(&self, session_id: &str) -> Result<DateTime<Utc>, AuthError> {
        let info = self
            .update(session_id, |info| {
                info.expires_at = self.config.expiry_from(self.clock.now())?;
                Ok(())
            })
            .await?;
        Ok(info.expires_at)
    }

    async fn delete(&self, session_id: &str) -> Result<(), AuthError> {
        self.kv.delete(&Self::key(session_id)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_all_by_user_id(&self, user_id: u64) -> Result<usize, AuthError> {
        let mut removed = 0;
        for key in self.kv.scan_prefix(SESSION_KEY_PREFIX).await? {
            let Some(bytes) = self.kv.get(&key).await? else {
                continue;
            };
            let info: SessionInfo = match serde_json::from_slice(&bytes) {
                Ok(info) => info,
                Err(err) => {
                    warn!("Skipping unreadable session record: {err}");
                    continue;
                }
            };
            if info.user_id == user_id && self.kv.delete(&key).await? {
                removed += 1;
            }
        }
        debug!("Removed {removed} sessions");
        Ok(removed)
    }

    async fn set_data(&self, session_id: &str, key: &str, value: Value) -> Result<(), AuthError> {
        self.update(session_id, |info| {
            info.data.insert(key.to_string(), value.clone());
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<usize, AuthError> {
        // The backend expires records natively.
        Ok(0)
    }

    fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKv;
    use chrono::Duration as ChronoDuration;

    fn store(max_age: i64) -> (Arc<ManualClock>, Arc<MemoryKv>, KvSessionStore) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let kv = Arc::new(MemoryKv::new(clock.clone()));
        let config = SessionConfig::default().with_max_age_seconds(max_age);
        let store = KvSessionStore::new(kv.clone(), config, clock.clone());
        (clock, kv, store)
    }

    #[tokio::test]
    async fn records_are_prefixed_json() {
        let (_clock, kv, store) = store(100);
        let id = store.create(SessionInfo::new(9, "z")).await.unwrap();
        let raw = kv.get(&format!("session:{id}")).await.unwrap().unwrap();
        let info: SessionInfo = serde_json::from_slice(&raw).unwrap();
        assert_eq!(info.user_id, 9);
        assert_eq!(info.session_id, id);
    }

    #[tokio::test]
    async fn verify_then_refresh_slides_expiry() {
        let (clock, _kv, store) = store(100);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();

        clock.advance(ChronoDuration::seconds(99));
        store.verify(&id).await.unwrap();
        store.refresh(&id).await.unwrap();

        clock.advance(ChronoDuration::seconds(99));
        assert!(store.verify(&id).await.is_ok());

        clock.advance(ChronoDuration::seconds(1));
        assert!(store.verify(&id).await.unwrap_err().is_missing());
    }

    #[tokio::test]
    async fn refresh_cannot_resurrect_a_deleted_session() {
        let (_clock, _kv, store) = store(100);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();
        store.delete(&id).await.unwrap();
        assert_eq!(store.refresh(&id).await, Err(AuthError::NotFound));
        assert_eq!(store.get(&id).await, Err(AuthError::NotFound));
    }

    #[tokio::test]
    async fn bulk_revoke_by_user() {
        let (_clock, _kv, store) = store(100);
        let a = store.create(SessionInfo::new(1, "a")).await.unwrap();
        let b = store.create(SessionInfo::new(2, "b")).await.unwrap();
        store.create(SessionInfo::new(1, "a")).await.unwrap();

        assert_eq!(store.delete_all_by_user_id(1).await.unwrap(), 2);
        assert_eq!(store.verify(&a).await, Err(AuthError::NotFound));
        assert!(store.verify(&b).await.is_ok());
    }

    #[tokio::test]
    async fn bulk_revoke_skips_unreadable_records() {
        let (_clock, kv, store) = store(100);
        kv.set_ex("session:garbage", b"{".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        store.create(SessionInfo::new(1, "a")).await.unwrap();
        assert_eq!(store.delete_all_by_user_id(1).await.unwrap(), 1);
    }

    /// Yields between every read and the following write so concurrent
    /// updates interleave on a single-threaded runtime.
    struct YieldingKv(MemoryKv);

    #[async_trait]
    impl KvStore for YieldingKv {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError> {
            let value = self.0.get(key).await;
            tokio::task::yield_now().await;
            value
        }

        async fn set_ex(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), AuthError> {
            self.0.set_ex(key, value, ttl).await
        }

        async fn swap_ex(
            &self,
            key: &str,
            current: &[u8],
            value: Vec<u8>,
            ttl: Duration,
        ) -> Result<bool, AuthError> {
            self.0.swap_ex(key, current, value, ttl).await
        }

        async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, AuthError> {
            self.0.take(key).await
        }

        async fn delete(&self, key: &str) -> Result<bool, AuthError> {
            self.0.delete(key).await
        }

        async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, AuthError> {
            self.0.scan_prefix(prefix).await
        }
    }

    #[tokio::test]
    async fn interleaved_updates_keep_every_write() {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let kv = Arc::new(YieldingKv(MemoryKv::new(clock.clone())));
        let config = SessionConfig::default().with_max_age_seconds(100);
        let store = Arc::new(KvSessionStore::new(kv, config, clock.clone()));
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();
        clock.advance(ChronoDuration::seconds(40));

        let first = {
            let (store, id) = (store.clone(), id.clone());
            tokio::spawn(async move { store.set_data(&id, "a", Value::from(1)).await })
        };
        let second = {
            let (store, id) = (store.clone(), id.clone());
            tokio::spawn(async move { store.set_data(&id, "b", Value::from(2)).await })
        };
        let third = {
            let (store, id) = (store.clone(), id.clone());
            tokio::spawn(async move { store.refresh(&id).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        let expires_at = third.await.unwrap().unwrap();

        let info = store.get(&id).await.unwrap();
        assert_eq!(info.data.get("a"), Some(&Value::from(1)));
        assert_eq!(info.data.get("b"), Some(&Value::from(2)));
        assert_eq!(info.expires_at, expires_at);
        assert_eq!(expires_at, clock.now() + ChronoDuration::seconds(100));
    }

    #[tokio::test]
    async fn set_data_keeps_expiry() {
        let (clock, _kv, store) = store(100);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();
        let before = store.get(&id).await.unwrap().expires_at;

        clock.advance(ChronoDuration::seconds(30));
        store.set_data(&id, "k", Value::from(1)).await.unwrap();
        let after = store.get(&id).await.unwrap();
        assert_eq!(after.expires_at, before);
        assert_eq!(after.data.get("k"), Some(&Value::from(1)));

        clock.advance(ChronoDuration::seconds(70));
        assert!(store.verify(&id).await.unwrap_err().is_missing());
    }
}
