//! Single-use step-up tokens.
//!
//! A token authorizes exactly one sensitive action. [`OnceTokenStore::verify`]
//! consumes the record with an atomic fetch-and-delete before looking at its
//! expiry, so two concurrent verifications can never both succeed, and a
//! token that is present but already past its deadline is burned and reported
//! as [`AuthError::Expired`].

use data_encoding::HEXLOWER;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::{clock::Clock, error::AuthError, kv::KvStore, session::short_id};

/// Random bytes in the token suffix (128 bits, 32 hex characters).
const TOKEN_RANDOM_BYTES: usize = 16;

#[derive(Clone, Debug)]
pub struct OnceTokenConfig {
    ttl: Duration,
    prefix: String,
}

impl Default for OnceTokenConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            prefix: "once_token:".to_string(),
        }
    }
}

impl OnceTokenConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero falls back to one second.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.max(Duration::from_secs(1));
        self
    }

    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Permission to perform one sensitive action. Timestamps are unix seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub user_id: u64,
    pub username: String,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TokenInfo {
    /// Valid while `now <= expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        now_unix > self.expires_at
    }
}

pub struct OnceTokenStore {
    kv: Arc<dyn KvStore>,
    config: OnceTokenConfig,
    clock: Arc<dyn Clock>,
}

impl OnceTokenStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>, config: OnceTokenConfig, clock: Arc<dyn Clock>) -> Self {
        Self { kv, config, clock }
    }

    #[must_use]
    pub fn config(&self) -> &OnceTokenConfig {
        &self.config
    }

    fn key(&self, token_id: &str) -> String {
        format!("{}{token_id}", self.config.prefix)
    }

    /// `YYYYmmddHHMMSS-<32 hex>`: sortable prefix, random suffix.
    fn token_id(&self) -> Result<String, AuthError> {
        let mut bytes = [0u8; TOKEN_RANDOM_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| AuthError::Backend(format!("randomness source: {err}")))?;
        Ok(format!(
            "{}-{}",
            self.clock.now().format("%Y%m%d%H%M%S"),
            HEXLOWER.encode(&bytes)
        ))
    }

    /// Mint a token for `user_id` that expires after the configured TTL.
    ///
    /// # Errors
    /// Returns `AuthError::Backend` on randomness, serialization, or store failure.
    #[instrument(skip(self, username, metadata))]
    pub async fn generate(
        &self,
        user_id: u64,
        username: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<TokenInfo, AuthError> {
        let token_id = self.token_id()?;
        let now = self.clock.unix();
        let ttl_seconds = i64::try_from(self.config.ttl.as_secs()).unwrap_or(i64::MAX);
        let info = TokenInfo {
            token_id,
            user_id,
            username: username.to_string(),
            created_at: now,
            expires_at: now.saturating_add(ttl_seconds),
            metadata,
        };

        let payload = serde_json::to_vec(&info)?;
        self.kv
            .set_ex(&self.key(&info.token_id), payload, self.config.ttl)
            .await?;
        debug!("Once-token {} issued", short_id(&info.token_id));
        Ok(info)
    }

    /// Read a token without consuming it.
    ///
    /// # Errors
    /// `AuthError::NotFound` if absent, `AuthError::Backend` on store failure.
    pub async fn peek(&self, token_id: &str) -> Result<TokenInfo, AuthError> {
        let bytes = self
            .kv
            .get(&self.key(token_id))
            .await?
            .ok_or(AuthError::NotFound)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Consume a token.
    ///
    /// The record is deleted before its expiry is checked; a token whose
    /// deadline has passed is still burned and reported as expired.
    ///
    /// # Errors
    /// `AuthError::NotFound` if absent or already consumed,
    /// `AuthError::Expired` if consumed past its deadline,
    /// `AuthError::Backend` on store failure.
    #[instrument(skip_all)]
    pub async fn verify(&self, token_id: &str) -> Result<TokenInfo, AuthError> {
        let bytes = self
            .kv
            .take(&self.key(token_id))
            .await?
            .ok_or(AuthError::NotFound)?;

        let info: TokenInfo = serde_json::from_slice(&bytes).map_err(|err| {
            warn!("Once-token {} consumed but unreadable", short_id(token_id));
            AuthError::from(err)
        })?;

        if info.is_expired_at(self.clock.unix()) {
            debug!("Once-token {} expired", short_id(token_id));
            return Err(AuthError::Expired);
        }
        debug!("Once-token {} consumed", short_id(token_id));
        Ok(info)
    }

    /// Revoke a token. Idempotent.
    ///
    /// # Errors
    /// `AuthError::Backend` on store failure.
    pub async fn delete(&self, token_id: &str) -> Result<(), AuthError> {
        self.kv.delete(&self.key(token_id)).await?;
        Ok(())
    }

    /// Revoke every live token issued to `user_id`, returning how many were removed.
    ///
    /// # Errors
    /// `AuthError::Backend` on store failure.
    #[instrument(skip(self))]
    pub async fn batch_delete(&self, user_id: u64) -> Result<usize, AuthError> {
        let mut removed = 0;
        for key in self.kv.scan_prefix(&self.config.prefix).await? {
            let Some(bytes) = self.kv.get(&key).await? else {
                continue;
            };
            let Ok(info) = serde_json::from_slice::<TokenInfo>(&bytes) else {
                continue;
            };
            if info.user_id == user_id && self.kv.delete(&key).await? {
                removed += 1;
            }
        }
        debug!("Removed {removed} once-tokens");
        Ok(removed)
    }
}
