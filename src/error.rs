//! Error taxonomy shared by the stores, the engines, and the orchestrator.
//!
//! Store-level kinds (`NotFound`, `Expired`, `Backend`) are kept distinct so
//! that callers can log them differently even though they collapse into a
//! single "not authenticated" outcome at the HTTP edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Identifier unknown to the store.
    #[error("not found")]
    NotFound,
    /// Identifier known but past its validity window; the record was evicted.
    #[error("expired")]
    Expired,
    /// I/O, timeout, or serialization failure in the underlying store.
    #[error("store backend failure: {0}")]
    Backend(String),
    /// Malformed or mis-signed bearer credential, or a TOTP code that does not verify.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),
    /// Once-token issued to a different user than the authenticated one.
    #[error("token owner does not match the authenticated user")]
    IdentityMismatch,
    /// A step-up protected action was requested without a once-token or TOTP code.
    #[error("step-up confirmation required")]
    StepUpRequired,
    /// The permission collaborator denied access.
    #[error("forbidden")]
    Forbidden,
    /// Rejected configuration at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Terminal kinds that mean "the presented identifier is not usable".
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::NotFound | Self::Expired)
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(format!("serialization: {err}"))
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(format!("redis: {err}"))
    }
}

/// The only outcomes a client ever sees. Internal detail stays in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    RequireLogin,
    RequireStepUp,
    Forbidden,
    ServiceUnavailable,
}

#[derive(Serialize)]
struct RejectionBody {
    code: u16,
    message: &'static str,
}

impl Rejection {
    /// Outcome of a failed session or bearer check.
    #[must_use]
    pub fn for_login(err: &AuthError) -> Self {
        match err {
            AuthError::Backend(_) | AuthError::Config(_) => {
                error!("Authentication unavailable: {err}");
                Self::ServiceUnavailable
            }
            AuthError::Forbidden | AuthError::IdentityMismatch => {
                warn!("Authentication refused: {err}");
                Self::Forbidden
            }
            AuthError::StepUpRequired => Self::RequireStepUp,
            AuthError::NotFound | AuthError::Expired | AuthError::InvalidCredential(_) => {
                warn!("Authentication rejected: {err}");
                Self::RequireLogin
            }
        }
    }

    /// Outcome of a failed once-token or TOTP check.
    #[must_use]
    pub fn for_step_up(err: &AuthError) -> Self {
        match err {
            AuthError::Backend(_) | AuthError::Config(_) => {
                error!("Step-up unavailable: {err}");
                Self::ServiceUnavailable
            }
            AuthError::Forbidden | AuthError::IdentityMismatch => {
                warn!("Step-up refused: {err}");
                Self::Forbidden
            }
            AuthError::NotFound
            | AuthError::Expired
            | AuthError::InvalidCredential(_)
            | AuthError::StepUpRequired => {
                warn!("Step-up rejected: {err}");
                Self::RequireStepUp
            }
        }
    }

    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::RequireLogin | Self::RequireStepUp => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::RequireLogin => "login required",
            Self::RequireStepUp => "step-up confirmation required",
            Self::Forbidden => "forbidden",
            Self::ServiceUnavailable => "service unavailable",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = RejectionBody {
            code: status.as_u16(),
            message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}
