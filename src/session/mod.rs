//! # Sessions
//!
//! A session binds an opaque, cookie-carried identifier to a [`SessionInfo`]
//! record. Two interchangeable backends implement [`SessionStore`]:
//!
//! - [`MemorySessionStore`]: in-process map behind a reader/writer lock, with a
//!   background sweeper that evicts expired records.
//! - [`KvSessionStore`]: records serialized as JSON in a TTL-capable
//!   [`KvStore`](crate::kv::KvStore) under the `session:` prefix; expiry is
//!   native to the backend.
//!
//! ## Expiry
//!
//! `expires_at = now + max_age` on create and on every refresh. A record is
//! readable through [`SessionStore::verify`] only while `now < expires_at`;
//! the first verify at or past that instant evicts it and reports
//! [`AuthError::Expired`]. Refresh always recomputes from the clock at the
//! moment of the call, so verify→refresh chains never move expiry backwards.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::AuthError;

pub mod cookie;
pub mod kv;
pub mod memory;

pub use self::kv::KvSessionStore;
pub use self::memory::MemorySessionStore;

/// Random bytes behind every session identifier (256 bits).
pub const SESSION_ID_BYTES: usize = 32;

/// Longest accepted session lifetime (ten years).
pub const MAX_SESSION_AGE_SECONDS: i64 = 10 * 365 * 86_400;

/// Shortest sweep period for the in-process backend.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// An authenticated principal's standing login.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: u64,
    pub username: String,
    pub nickname: String,
    pub avatar: String,
    pub dept_id: u64,
    pub role_ids: BTreeSet<u64>,
    pub perm_codes: BTreeSet<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remote_addr: String,
    pub user_agent: String,
}

impl SessionInfo {
    /// Record for a freshly verified user. Identifier and timestamps are
    /// stamped by the store on create.
    #[must_use]
    pub fn new(user_id: u64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = avatar.into();
        self
    }

    #[must_use]
    pub fn with_dept_id(mut self, dept_id: u64) -> Self {
        self.dept_id = dept_id;
        self
    }

    #[must_use]
    pub fn with_role_ids(mut self, role_ids: impl IntoIterator<Item = u64>) -> Self {
        self.role_ids = role_ids.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_perm_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.perm_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_client(
        mut self,
        remote_addr: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        self.remote_addr = remote_addr.into();
        self.user_agent = user_agent.into();
        self
    }

    /// `true` once `now` has reached the absolute expiry.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Cookie and lifetime settings shared by every session backend.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    cookie_name: String,
    max_age_seconds: i64,
    path: String,
    domain: String,
    secure: bool,
    http_only: bool,
    sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session_id".to_string(),
            max_age_seconds: 86_400,
            path: "/".to_string(),
            domain: String::new(),
            secure: false,
            http_only: true,
            sweep_interval: Duration::from_secs(5 * 60),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Clamped to `1..=MAX_SESSION_AGE_SECONDS`.
    #[must_use]
    pub fn with_max_age_seconds(mut self, seconds: i64) -> Self {
        self.max_age_seconds = seconds.clamp(1, MAX_SESSION_AGE_SECONDS);
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Never shorter than [`MIN_SWEEP_INTERVAL`].
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn max_age_seconds(&self) -> i64 {
        self.max_age_seconds
    }

    #[must_use]
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_age_seconds)
    }

    /// Deadline of a session created or refreshed at `now`.
    ///
    /// # Errors
    /// Returns `AuthError::Config` if the deadline is not representable.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, AuthError> {
        now.checked_add_signed(self.max_age()).ok_or_else(|| {
            AuthError::Config(format!(
                "session max-age of {}s overflows the clock",
                self.max_age_seconds
            ))
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub fn http_only(&self) -> bool {
        self.http_only
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

/// Capability set shared by the in-process and key-value session backends.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session and return its identifier.
    ///
    /// The store assigns `session_id`, `created_at` and `expires_at`; any
    /// values already present in `info` are overwritten.
    async fn create(&self, info: SessionInfo) -> Result<String, AuthError>;

    /// Raw read, does not enforce expiry.
    async fn get(&self, session_id: &str) -> Result<SessionInfo, AuthError>;

    /// Read and enforce `now < expires_at`, evicting the record otherwise.
    async fn verify(&self, session_id: &str) -> Result<SessionInfo, AuthError>;

    /// Slide the expiry to `now + max_age` and return the new deadline.
    async fn refresh(&self, session_id: &str) -> Result<DateTime<Utc>, AuthError>;

    /// Idempotent removal.
    async fn delete(&self, session_id: &str) -> Result<(), AuthError>;

    /// Remove every session of `user_id`, returning how many were removed.
    async fn delete_all_by_user_id(&self, user_id: u64) -> Result<usize, AuthError>;

    /// Set one entry of the session's extension map.
    async fn set_data(&self, session_id: &str, key: &str, value: Value) -> Result<(), AuthError>;

    /// Evict expired records, returning how many were removed.
    async fn cleanup_expired(&self) -> Result<usize, AuthError>;

    fn config(&self) -> &SessionConfig;

    /// `Set-Cookie` value carrying `session_id`.
    ///
    /// # Errors
    /// Returns `AuthError::Config` if the configured attributes cannot form a
    /// valid header value.
    fn set_cookie(&self, session_id: &str) -> Result<HeaderValue, AuthError> {
        cookie::session_cookie(self.config(), session_id)
    }

    /// Session identifier presented in the request's `Cookie` headers.
    fn get_cookie(&self, headers: &HeaderMap) -> Option<String> {
        cookie::read_session_cookie(self.config(), headers)
    }

    /// `Set-Cookie` value that removes the session cookie.
    ///
    /// # Errors
    /// Same as [`SessionStore::set_cookie`].
    fn clear_cookie(&self) -> Result<HeaderValue, AuthError> {
        cookie::clear_session_cookie(self.config())
    }
}

/// Generate a 256-bit identifier from the OS randomness source, hex encoded.
///
/// # Errors
/// Returns `AuthError::Backend` if the randomness source fails.
pub fn generate_session_id() -> Result<String, AuthError> {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::Backend(format!("randomness source: {err}")))?;
    Ok(HEXLOWER.encode(&bytes))
}

/// Log-safe prefix of an identifier.
pub(crate) fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn session_ids_are_hex_and_distinct() {
        let ids: HashSet<String> = (0..256).map(|_| generate_session_id().unwrap()).collect();
        assert_eq!(ids.len(), 256);
        for id in &ids {
            assert_eq!(id.len(), SESSION_ID_BYTES * 2);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.cookie_name(), "session_id");
        assert_eq!(config.max_age_seconds(), 86_400);
        assert_eq!(config.path(), "/");
        assert_eq!(config.domain(), "");
        assert!(!config.secure());
        assert!(config.http_only());
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
    }

    #[test]
    fn max_age_is_at_least_one_second() {
        let config = SessionConfig::new().with_max_age_seconds(-5);
        assert_eq!(config.max_age_seconds(), 1);
    }

    #[test]
    fn max_age_has_a_ceiling() {
        let config = SessionConfig::new().with_max_age_seconds(10_000_000_000_000_000);
        assert_eq!(config.max_age_seconds(), MAX_SESSION_AGE_SECONDS);

        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let expires_at = config.expiry_from(now).unwrap();
        assert_eq!((expires_at - now).num_seconds(), MAX_SESSION_AGE_SECONDS);
    }

    #[test]
    fn expiry_past_the_calendar_is_a_config_error() {
        let config = SessionConfig::new().with_max_age_seconds(60);
        assert!(matches!(
            config.expiry_from(DateTime::<Utc>::MAX_UTC),
            Err(AuthError::Config(_))
        ));
    }

    #[test]
    fn sweep_interval_is_never_zero() {
        let config = SessionConfig::new().with_sweep_interval(Duration::ZERO);
        assert_eq!(config.sweep_interval(), MIN_SWEEP_INTERVAL);
    }

    #[test]
    fn short_id_never_splits_characters() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("é€"), "é€");
    }

    #[test]
    fn info_round_trips_through_json() {
        let info = SessionInfo::new(7, "alice")
            .with_role_ids([1, 3])
            .with_perm_codes(["system:user:list"]);
        let json = serde_json::to_vec(&info).unwrap();
        let back: SessionInfo = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, info);
    }
}
