//! Self-contained bearer credentials for the public-site audience.
//!
//! Only the HMAC family (HS256/384/512) is accepted; any other algorithm in
//! the header is rejected before the signature is checked. Expiry is checked
//! against the injected clock with no leeway. There is no revocation list,
//! so a credential stays valid until its `exp`.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::{clock::Clock, error::AuthError};

/// Identity claims carried by a bearer credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserClaims {
    pub user_id: u64,
    pub username: String,
    pub email: String,
    /// 0 guest, 1 member, 2 administrator.
    pub role: u8,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BearerConfig {
    issuer: Option<String>,
    ttl: Duration,
}

impl Default for BearerConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl BearerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require (and stamp) this `iss` claim.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[derive(Clone)]
pub struct BearerValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    config: BearerConfig,
    clock: Arc<dyn Clock>,
}

impl BearerValidator {
    #[must_use]
    pub fn new(secret: &SecretString, config: BearerConfig, clock: Arc<dyn Clock>) -> Self {
        let key = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        // `exp` is checked against the injected clock after decoding.
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);
        if let Some(issuer) = config.issuer() {
            validation.set_issuer(&[issuer]);
        }

        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
            config,
            clock,
        }
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    /// `AuthError::Expired` past `exp`, `AuthError::InvalidCredential` for any
    /// malformed, mis-signed, or wrong-algorithm credential.
    pub fn validate(&self, token: &str) -> Result<UserClaims, AuthError> {
        let data = decode::<UserClaims>(token, &self.decoding, &self.validation).map_err(|err| {
            let reason = match err.kind() {
                ErrorKind::InvalidAlgorithm => "unexpected signing method",
                ErrorKind::InvalidSignature => "invalid signature",
                ErrorKind::InvalidIssuer => "invalid issuer",
                ErrorKind::MissingRequiredClaim(_) => "missing claim",
                _ => "malformed token",
            };
            debug!("Bearer credential rejected: {err}");
            AuthError::InvalidCredential(reason.to_string())
        })?;

        if self.clock.unix() > data.claims.exp {
            return Err(AuthError::Expired);
        }
        Ok(data.claims)
    }

    /// Sign an HS256 credential valid for the configured TTL.
    ///
    /// # Errors
    /// Returns `AuthError::Config` if signing fails.
    pub fn issue(
        &self,
        user_id: u64,
        username: &str,
        email: &str,
        role: u8,
    ) -> Result<String, AuthError> {
        let now = self.clock.unix();
        let ttl = i64::try_from(self.config.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = UserClaims {
            user_id,
            username: username.to_string(),
            email: email.to_string(),
            role,
            iat: now,
            exp: now.saturating_add(ttl),
            iss: self.config.issuer.clone(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AuthError::Config(format!("signing bearer credential: {err}")))
    }
}

/// Credential from an `Authorization: Bearer <token>` header.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.trim().strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
