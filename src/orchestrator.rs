//! # Authentication orchestrator
//!
//! [`Authenticator`] composes the session store, the once-token store, the
//! TOTP engine and the bearer validator into the two policies used by the
//! request layer:
//!
//! - **Standard**: a valid session (admin audience, expiry slides on every
//!   success) or a valid bearer credential (public audience).
//! - **Step-up**: an already authenticated identity plus either a once-token
//!   issued to that same user, consumed on use, or, when TOTP is enabled and
//!   the presented value is exactly six digits, a current TOTP code.
//!
//! ## Step-up state machine
//!
//! `UNAUTHENTICATED → SESSION_VALID → STEP_UP_PENDING → AUTHORIZED`. The
//! authorized state covers one action only; nothing records an elevated
//! state, so the next sensitive action needs a fresh token or code.
//!
//! Token ownership is checked with a non-destructive read first. A token
//! presented by the wrong user is left intact and reported as
//! [`AuthError::IdentityMismatch`].

use axum::http::HeaderValue;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::{
    bearer::BearerValidator,
    clock::Clock,
    error::AuthError,
    identity::{Identity, StepUpGrant, StepUpMethod},
    once_token::{OnceTokenStore, TokenInfo},
    permission::{has_any_role, is_super_admin, DenyAll, PermissionChecker},
    session::{SessionInfo, SessionStore},
    totp::{TotpConfig, TotpEngine, TotpWindow, TOTP_DIGITS},
};

/// Result of a successful login.
#[derive(Debug)]
pub struct LoginOutcome {
    pub session: SessionInfo,
    pub cookie: HeaderValue,
}

/// Records removed by a forced global logout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Revocation {
    pub sessions: usize,
    pub once_tokens: usize,
}

/// Public TOTP parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TotpStatus {
    pub enabled: bool,
    pub current_time: i64,
    pub time_step: u64,
    pub window_size: u32,
}

/// Current TOTP code and the step it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TotpCode {
    pub token: String,
    pub time_step: u64,
    #[serde(flatten)]
    pub window: TotpWindow,
}

pub struct Authenticator {
    sessions: Arc<dyn SessionStore>,
    tokens: OnceTokenStore,
    totp: Option<TotpEngine>,
    totp_config: TotpConfig,
    bearer: BearerValidator,
    permissions: Arc<dyn PermissionChecker>,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    /// Compose the stores. TOTP starts disabled and every permission check
    /// is denied until a checker is supplied.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        tokens: OnceTokenStore,
        bearer: BearerValidator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            tokens,
            totp: None,
            totp_config: TotpConfig::default(),
            bearer,
            permissions: Arc::new(DenyAll),
            clock,
        }
    }

    #[must_use]
    pub fn with_totp(mut self, engine: TotpEngine) -> Self {
        self.totp_config = engine.config().clone();
        self.totp = Some(engine);
        self
    }

    #[must_use]
    pub fn with_permissions(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.permissions = checker;
        self
    }

    #[must_use]
    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    #[must_use]
    pub fn tokens(&self) -> &OnceTokenStore {
        &self.tokens
    }

    #[must_use]
    pub fn bearer(&self) -> &BearerValidator {
        &self.bearer
    }

    #[must_use]
    pub fn totp(&self) -> Option<&TotpEngine> {
        self.totp.as_ref()
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Open a session for an already verified user.
    ///
    /// Single-session mode: every other session of the user is removed first.
    ///
    /// # Errors
    /// Propagates store failures and cookie rendering errors.
    #[instrument(skip_all, fields(user_id = info.user_id))]
    pub async fn login(&self, info: SessionInfo) -> Result<LoginOutcome, AuthError> {
        let user_id = info.user_id;
        let replaced = self.sessions.delete_all_by_user_id(user_id).await?;
        if replaced > 0 {
            debug!("Replaced {replaced} existing sessions");
        }
        let session_id = self.sessions.create(info).await?;
        let session = self.sessions.get(&session_id).await?;
        let cookie = self.sessions.set_cookie(&session_id)?;
        info!("User logged in");
        Ok(LoginOutcome { session, cookie })
    }

    /// Standard policy, admin audience: verify the session and slide its expiry.
    ///
    /// # Errors
    /// `NotFound` or `Expired` for unusable sessions, `Backend` on store failure.
    #[instrument(skip_all)]
    pub async fn authenticate_session(&self, session_id: &str) -> Result<Identity, AuthError> {
        let mut info = self.sessions.verify(session_id).await?;
        info.expires_at = self.sessions.refresh(session_id).await?;
        Ok(Identity::from_session(&info))
    }

    /// Standard policy, public audience.
    ///
    /// # Errors
    /// `InvalidCredential` or `Expired` for unusable credentials.
    pub fn authenticate_bearer(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.bearer.validate(token)?;
        Ok(Identity::from_claims(&claims))
    }

    /// Step-up policy. `presented` is the raw `once_token` parameter.
    ///
    /// # Errors
    /// - `StepUpRequired` when nothing was presented
    /// - `InvalidCredential` for a rejected TOTP code
    /// - `IdentityMismatch` for a token issued to another user (not consumed)
    /// - `NotFound` / `Expired` for unusable tokens
    /// - `Backend` on store failure; a token whose delete was issued stays consumed
    #[instrument(skip_all, fields(user_id = identity.user_id))]
    pub async fn step_up(
        &self,
        identity: &Identity,
        presented: Option<&str>,
    ) -> Result<StepUpGrant, AuthError> {
        let value = presented
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::StepUpRequired)?;

        if let Some(engine) = &self.totp {
            if looks_like_totp(value) {
                return if engine.verify_at(value, self.clock.unix()) {
                    debug!("Step-up satisfied by TOTP");
                    Ok(StepUpGrant {
                        user_id: identity.user_id,
                        method: StepUpMethod::Totp,
                    })
                } else {
                    Err(AuthError::InvalidCredential(
                        "totp code rejected".to_string(),
                    ))
                };
            }
        }

        self.check_token_owner(identity, value).await?;
        let token = self.tokens.verify(value).await?;
        if token.user_id != identity.user_id {
            // Only reachable if the record changed between peek and take.
            warn!("Once-token owner changed during verification");
            return Err(AuthError::IdentityMismatch);
        }
        debug!("Step-up satisfied by once-token");
        Ok(StepUpGrant {
            user_id: identity.user_id,
            method: StepUpMethod::OnceToken(token),
        })
    }

    /// Confirm that `token_id` was issued to the authenticated user without
    /// consuming it.
    ///
    /// # Errors
    /// `IdentityMismatch` on a different owner, `NotFound` if absent.
    pub async fn check_token_owner(
        &self,
        identity: &Identity,
        token_id: &str,
    ) -> Result<TokenInfo, AuthError> {
        let token = self.tokens.peek(token_id).await?;
        if token.user_id == identity.user_id {
            Ok(token)
        } else {
            warn!(
                token_owner = token.user_id,
                "Once-token presented by another user"
            );
            Err(AuthError::IdentityMismatch)
        }
    }

    /// Super-admins pass; everyone else is asked of the permission checker.
    ///
    /// # Errors
    /// `Forbidden` when the checker denies `code`.
    pub async fn authorize(&self, identity: &Identity, code: &str) -> Result<(), AuthError> {
        if is_super_admin(&identity.role_ids) {
            return Ok(());
        }
        if self
            .permissions
            .check_permission(identity.user_id, code)
            .await
        {
            Ok(())
        } else {
            debug!(user_id = identity.user_id, code, "Permission denied");
            Err(AuthError::Forbidden)
        }
    }

    /// # Errors
    /// `Forbidden` unless the identity holds one of `allowed` (or is super-admin).
    pub fn require_role(&self, identity: &Identity, allowed: &[u64]) -> Result<(), AuthError> {
        if has_any_role(&identity.role_ids, allowed) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Issue a once-token bound to the authenticated user.
    ///
    /// # Errors
    /// `Backend` on store failure.
    pub async fn mint_once_token(
        &self,
        identity: &Identity,
        metadata: Option<Map<String, Value>>,
    ) -> Result<TokenInfo, AuthError> {
        self.tokens
            .generate(identity.user_id, &identity.username, metadata)
            .await
    }

    /// End the caller's session, revoke their outstanding once-tokens and
    /// return the clearing cookie.
    ///
    /// # Errors
    /// `Backend` on store failure.
    #[instrument(skip_all, fields(user_id = identity.user_id))]
    pub async fn logout(&self, identity: &Identity) -> Result<HeaderValue, AuthError> {
        if let Some(session_id) = identity.session_id() {
            self.sessions.delete(session_id).await?;
        }
        let revoked = self.tokens.batch_delete(identity.user_id).await?;
        info!(once_tokens = revoked, "User logged out");
        self.sessions.clear_cookie()
    }

    /// Forced global logout: every session and once-token of `user_id`.
    ///
    /// # Errors
    /// `Backend` on store failure.
    #[instrument(skip(self))]
    pub async fn revoke_user(&self, user_id: u64) -> Result<Revocation, AuthError> {
        let sessions = self.sessions.delete_all_by_user_id(user_id).await?;
        let once_tokens = self.tokens.batch_delete(user_id).await?;
        info!(sessions, once_tokens, "User revoked");
        Ok(Revocation {
            sessions,
            once_tokens,
        })
    }

    #[must_use]
    pub fn totp_status(&self) -> TotpStatus {
        TotpStatus {
            enabled: self.totp.is_some(),
            current_time: self.clock.unix(),
            time_step: self.totp_config.time_step(),
            window_size: self.totp_config.window_size(),
        }
    }

    /// Current code, `None` when TOTP is disabled.
    #[must_use]
    pub fn current_totp(&self) -> Option<TotpCode> {
        let engine = self.totp.as_ref()?;
        let now = self.clock.unix();
        Some(TotpCode {
            token: engine.generate_at(now),
            time_step: engine.config().time_step(),
            window: engine.window(now),
        })
    }
}

fn looks_like_totp(value: &str) -> bool {
    value.len() == TOTP_DIGITS && value.bytes().all(|b| b.is_ascii_digit())
}
