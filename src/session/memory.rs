//! In-process session backend.
//!
//! Reads (`get`, `verify`) share the lock; every write takes it exclusively.
//! A sweeper task evicts expired records on a fixed interval. It holds only a
//! weak reference to the map and stops when the store is shut down or dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, instrument, warn};

use super::{generate_session_id, short_id, SessionConfig, SessionInfo, SessionStore};
use crate::{clock::Clock, error::AuthError};

struct Inner {
    sessions: RwLock<HashMap<String, SessionInfo>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl Inner {
    async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, info| !info.is_expired_at(now));
        before - sessions.len()
    }
}

pub struct MemorySessionStore {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl MemorySessionStore {
    /// Create the store and, when called inside a Tokio runtime, start the
    /// periodic sweeper.
    #[must_use]
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        let inner = Arc::new(Inner {
            sessions: RwLock::new(HashMap::new()),
            config,
            clock,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(sweep_loop(
                Arc::downgrade(&inner),
                inner.config.sweep_interval(),
                shutdown_rx,
            ))),
            Err(_) => {
                warn!("No tokio runtime, expired sessions are only removed on access");
                None
            }
        };

        Self {
            inner,
            shutdown,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Number of records held, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.sweeper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("Session sweeper ended abnormally: {err}");
            }
        }
    }
}

impl Drop for MemorySessionStore {
    fn drop(&mut self) {
        if let Ok(slot) = self.sweeper.get_mut() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

async fn sweep_loop(
    inner: Weak<Inner>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let removed = inner.sweep().await;
                if removed > 0 {
                    debug!("Swept {removed} expired sessions");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Session sweeper stopped");
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    #[instrument(skip_all, fields(user_id = info.user_id))]
    async fn create(&self, mut info: SessionInfo) -> Result<String, AuthError> {
        let session_id = generate_session_id()?;
        let now = self.inner.clock.now();
        info.session_id.clone_from(&session_id);
        info.created_at = now;
        info.expires_at = self.inner.config.expiry_from(now)?;

        self.inner
            .sessions
            .write()
            .await
            .insert(session_id.clone(), info);
        debug!("Session {} created", short_id(&session_id));
        Ok(session_id)
    }

    async fn get(&self, session_id: &str) -> Result<SessionInfo, AuthError> {
        self.inner
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(AuthError::NotFound)
    }

    #[instrument(skip_all)]
    async fn verify(&self, session_id: &str) -> Result<SessionInfo, AuthError> {
        let now = self.inner.clock.now();
        {
            let sessions = self.inner.sessions.read().await;
            match sessions.get(session_id) {
                None => return Err(AuthError::NotFound),
                Some(info) if !info.is_expired_at(now) => return Ok(info.clone()),
                Some(_) => {}
            }
        }

        // Re-check under the write lock; a concurrent refresh may have won.
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get(session_id) {
            None => Err(AuthError::NotFound),
            Some(info) if !info.is_expired_at(now) => Ok(info.clone()),
            Some(_) => {
                sessions.remove(session_id);
                debug!("Session {} expired", short_id(session_id));
                Err(AuthError::Expired)
            }
        }
    }

    async fn refresh(&self, session_id: &str) -> Result<DateTime<Utc>, AuthError> {
        let mut sessions = self.inner.sessions.write().await;
        let info = sessions.get_mut(session_id).ok_or(AuthError::NotFound)?;
        info.expires_at = self.inner.config.expiry_from(self.inner.clock.now())?;
        Ok(info.expires_at)
    }

    async fn delete(&self, session_id: &str) -> Result<(), AuthError> {
        self.inner.sessions.write().await.remove(session_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_all_by_user_id(&self, user_id: u64) -> Result<usize, AuthError> {
        let mut sessions = self.inner.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, info| info.user_id != user_id);
        let removed = before - sessions.len();
        debug!("Removed {removed} sessions");
        Ok(removed)
    }

    async fn set_data(&self, session_id: &str, key: &str, value: Value) -> Result<(), AuthError> {
        let mut sessions = self.inner.sessions.write().await;
        let info = sessions.get_mut(session_id).ok_or(AuthError::NotFound)?;
        info.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<usize, AuthError> {
        Ok(self.inner.sweep().await)
    }

    fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Duration;
    use std::collections::HashSet;

    const T0: i64 = 1_700_000_000;

    fn store(max_age: i64) -> (Arc<ManualClock>, MemorySessionStore) {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let config = SessionConfig::default().with_max_age_seconds(max_age);
        let store = MemorySessionStore::new(config, clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn create_stamps_identifier_and_timestamps() {
        let (clock, store) = store(86_400);
        let id = store
            .create(SessionInfo::new(42, "admin").with_role_ids([1, 2]))
            .await
            .unwrap();

        let info = store.get(&id).await.unwrap();
        assert_eq!(info.session_id, id);
        assert_eq!(info.created_at, clock.now());
        assert_eq!(info.expires_at, clock.now() + Duration::seconds(86_400));
        assert_eq!(info.role_ids.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn oversized_max_age_is_capped_on_create() {
        let (clock, store) = store(10_000_000_000_000_000);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();
        let expires_at = store.refresh(&id).await.unwrap();
        assert_eq!(
            expires_at,
            clock.now() + Duration::seconds(crate::session::MAX_SESSION_AGE_SECONDS)
        );
    }

    #[tokio::test]
    async fn concurrent_creates_yield_distinct_ids() {
        let (_clock, store) = store(60);
        let store = Arc::new(store);
        let mut tasks = Vec::new();
        for user_id in 0..64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.create(SessionInfo::new(user_id, "u")).await.unwrap()
            }));
        }
        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }
        assert_eq!(ids.len(), 64);
        assert_eq!(store.len().await, 64);
    }

    #[tokio::test]
    async fn verify_enforces_strict_expiry_and_evicts() {
        let (clock, store) = store(100);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();

        clock.advance(Duration::seconds(99));
        assert!(store.verify(&id).await.is_ok());

        clock.advance(Duration::seconds(1));
        assert_eq!(store.verify(&id).await, Err(AuthError::Expired));
        assert_eq!(store.get(&id).await, Err(AuthError::NotFound));
        assert_eq!(store.verify(&id).await, Err(AuthError::NotFound));
    }

    #[tokio::test]
    async fn refresh_slides_the_window() {
        let (clock, store) = store(100);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();

        clock.advance(Duration::seconds(60));
        store.verify(&id).await.unwrap();
        let expires_at = store.refresh(&id).await.unwrap();
        assert_eq!(expires_at, clock.now() + Duration::seconds(100));

        clock.advance(Duration::seconds(99));
        assert!(store.verify(&id).await.is_ok());
    }

    #[tokio::test]
    async fn without_refresh_the_same_check_fails() {
        let (clock, store) = store(100);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();

        clock.advance(Duration::seconds(60));
        store.verify(&id).await.unwrap();
        clock.advance(Duration::seconds(99));
        assert_eq!(store.verify(&id).await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn refresh_of_missing_session_is_not_found() {
        let (_clock, store) = store(100);
        assert_eq!(store.refresh("nope").await, Err(AuthError::NotFound));
    }

    #[tokio::test]
    async fn bulk_revoke_only_touches_one_user() {
        let (_clock, store) = store(100);
        let a1 = store.create(SessionInfo::new(1, "a")).await.unwrap();
        let a2 = store.create(SessionInfo::new(1, "a")).await.unwrap();
        let b = store.create(SessionInfo::new(2, "b")).await.unwrap();

        assert_eq!(store.delete_all_by_user_id(1).await.unwrap(), 2);
        assert_eq!(store.verify(&a1).await, Err(AuthError::NotFound));
        assert_eq!(store.verify(&a2).await, Err(AuthError::NotFound));
        assert!(store.verify(&b).await.is_ok());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_clock, store) = store(100);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();
        store.delete(&id).await.unwrap();
        store.delete(&id).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn set_data_touches_the_extension_map() {
        let (_clock, store) = store(100);
        let id = store.create(SessionInfo::new(1, "a")).await.unwrap();
        store
            .set_data(&id, "theme", Value::from("dark"))
            .await
            .unwrap();
        let info = store.get(&id).await.unwrap();
        assert_eq!(info.data.get("theme"), Some(&Value::from("dark")));
        assert_eq!(
            store.set_data("nope", "k", Value::Null).await,
            Err(AuthError::NotFound)
        );
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired() {
        let (clock, store) = store(100);
        store.create(SessionInfo::new(1, "a")).await.unwrap();
        clock.advance(Duration::seconds(50));
        let fresh = store.create(SessionInfo::new(2, "b")).await.unwrap();
        clock.advance(Duration::seconds(60));

        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&fresh).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_on_its_interval() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let config = SessionConfig::default()
            .with_max_age_seconds(10)
            .with_sweep_interval(std::time::Duration::from_secs(300));
        let store = MemorySessionStore::new(config, clock.clone());
        store.create(SessionInfo::new(1, "a")).await.unwrap();

        clock.advance(Duration::seconds(11));
        assert_eq!(store.len().await, 1);

        tokio::time::sleep(std::time::Duration::from_secs(301)).await;
        assert_eq!(store.len().await, 0);

        store.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_sweep_interval_keeps_the_sweeper_alive() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let config = SessionConfig::default()
            .with_max_age_seconds(10)
            .with_sweep_interval(std::time::Duration::ZERO);
        let store = MemorySessionStore::new(config, clock.clone());
        store.create(SessionInfo::new(1, "a")).await.unwrap();

        clock.advance(Duration::seconds(11));
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        assert_eq!(store.len().await, 0);

        let handle = store.sweeper.lock().unwrap().take().unwrap();
        assert!(!handle.is_finished());
        store.shutdown.send(true).unwrap();
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_stops_the_sweeper() {
        let (_clock, store) = store(100);
        store.shutdown().await;
        assert!(store.sweeper.lock().unwrap().is_none());
        // A second call is a no-op.
        store.shutdown().await;
    }

    #[test]
    fn works_without_a_runtime() {
        let clock = Arc::new(ManualClock::at_unix(T0));
        let store = MemorySessionStore::new(SessionConfig::default(), clock);
        assert!(store.sweeper.lock().unwrap().is_none());
    }
}
