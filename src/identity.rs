//! Request-scoped identity.
//!
//! Middleware resolves the caller once and stores an [`Identity`] (and, after
//! step-up, a [`StepUpGrant`]) in the request extensions. Handlers read them
//! through the [`CurrentUser`] and [`StepUp`] extractors.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, Extensions},
};
use std::collections::BTreeSet;

use crate::{bearer::UserClaims, error::Rejection, once_token::TokenInfo, session::SessionInfo};

/// How the caller was authenticated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthSource {
    Session { session_id: String },
    Bearer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: u64,
    pub username: String,
    pub email: String,
    /// Coarse role from a bearer credential.
    pub role: Option<u8>,
    pub role_ids: BTreeSet<u64>,
    pub perm_codes: BTreeSet<String>,
    pub source: AuthSource,
}

impl Identity {
    #[must_use]
    pub fn from_session(info: &SessionInfo) -> Self {
        Self {
            user_id: info.user_id,
            username: info.username.clone(),
            email: String::new(),
            role: None,
            role_ids: info.role_ids.clone(),
            perm_codes: info.perm_codes.clone(),
            source: AuthSource::Session {
                session_id: info.session_id.clone(),
            },
        }
    }

    #[must_use]
    pub fn from_claims(claims: &UserClaims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username.clone(),
            email: claims.email.clone(),
            role: Some(claims.role),
            role_ids: BTreeSet::new(),
            perm_codes: BTreeSet::new(),
            source: AuthSource::Bearer,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match &self.source {
            AuthSource::Session { session_id } => Some(session_id),
            AuthSource::Bearer => None,
        }
    }
}

/// What satisfied the step-up requirement for this request.
#[derive(Clone, Debug, PartialEq)]
pub enum StepUpMethod {
    OnceToken(TokenInfo),
    Totp,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepUpGrant {
    pub user_id: u64,
    pub method: StepUpMethod,
}

/// Authenticated user id, if the request carries an identity.
#[must_use]
pub fn current_user_id(extensions: &Extensions) -> Option<u64> {
    extensions.get::<Identity>().map(|identity| identity.user_id)
}

/// Role ids of the current identity, empty when unauthenticated.
#[must_use]
pub fn current_role_ids(extensions: &Extensions) -> BTreeSet<u64> {
    extensions
        .get::<Identity>()
        .map(|identity| identity.role_ids.clone())
        .unwrap_or_default()
}

pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(Self)
            .ok_or(Rejection::RequireLogin)
    }
}

pub struct StepUp(pub StepUpGrant);

#[async_trait]
impl<S> FromRequestParts<S> for StepUp
where
    S: Send + Sync,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<StepUpGrant>()
            .cloned()
            .map(Self)
            .ok_or(Rejection::RequireStepUp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborator_accessors() {
        let mut extensions = Extensions::new();
        assert_eq!(current_user_id(&extensions), None);
        assert!(current_role_ids(&extensions).is_empty());

        let mut info = SessionInfo::new(42, "admin").with_role_ids([1, 4]);
        info.session_id = "abc".to_string();
        extensions.insert(Identity::from_session(&info));

        assert_eq!(current_user_id(&extensions), Some(42));
        assert_eq!(current_role_ids(&extensions), BTreeSet::from([1, 4]));
    }

    #[test]
    fn identity_sources() {
        let mut info = SessionInfo::new(1, "a");
        info.session_id = "sid".to_string();
        assert_eq!(Identity::from_session(&info).session_id(), Some("sid"));

        let claims = UserClaims {
            user_id: 2,
            username: "b".to_string(),
            email: "b@example.com".to_string(),
            role: 1,
            iat: 0,
            exp: 1,
            iss: None,
        };
        let identity = Identity::from_claims(&claims);
        assert_eq!(identity.session_id(), None);
        assert_eq!(identity.role, Some(1));
        assert_eq!(identity.email, "b@example.com");
    }

    #[tokio::test]
    async fn extractors_reject_without_extensions() {
        let (mut parts, ()) = axum::http::Request::new(()).into_parts();
        assert!(matches!(
            CurrentUser::from_request_parts(&mut parts, &()).await,
            Err(Rejection::RequireLogin)
        ));
        assert!(matches!(
            StepUp::from_request_parts(&mut parts, &()).await,
            Err(Rejection::RequireStepUp)
        ));
    }
}
