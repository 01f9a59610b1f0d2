//! Request guards.
//!
//! Each guard resolves one policy through the [`Authenticator`] and either
//! stores the result in the request extensions or short-circuits with a
//! [`Rejection`].

use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use super::SharedAuth;
use crate::{
    bearer::extract_bearer_token,
    error::{AuthError, Rejection},
    identity::Identity,
};

/// Query parameter carrying a once-token or TOTP code.
pub const STEP_UP_PARAM: &str = "once_token";

/// Standard policy, admin audience.
///
/// On a missing or dead session the cookie is cleared along with the 401.
pub async fn require_session(
    State(auth): State<SharedAuth>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(session_id) = auth.sessions().get_cookie(request.headers()) else {
        debug!("No session cookie");
        return Rejection::RequireLogin.into_response();
    };

    match auth.authenticate_session(&session_id).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            let rejection = Rejection::for_login(&err);
            let mut response = rejection.into_response();
            if rejection == Rejection::RequireLogin {
                if let Ok(cookie) = auth.sessions().clear_cookie() {
                    response.headers_mut().append(SET_COOKIE, cookie);
                }
            }
            response
        }
    }
}

/// Standard policy, public audience.
pub async fn require_bearer(
    State(auth): State<SharedAuth>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(request.headers()) else {
        return Rejection::RequireLogin.into_response();
    };

    match auth.authenticate_bearer(&token) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => Rejection::for_login(&err).into_response(),
    }
}

/// Step-up policy. Must run inside [`require_session`] or [`require_bearer`].
pub async fn require_step_up(
    State(auth): State<SharedAuth>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(identity) = request.extensions().get::<Identity>().cloned() else {
        return Rejection::RequireLogin.into_response();
    };

    let presented = step_up_value(request.uri().query());
    match auth.step_up(&identity, presented.as_deref()).await {
        Ok(grant) => {
            request.extensions_mut().insert(grant);
            next.run(request).await
        }
        Err(err) => Rejection::for_step_up(&err).into_response(),
    }
}

/// State for [`require_permission`]: the authenticator and the required code.
#[derive(Clone)]
pub struct PermissionGate {
    auth: SharedAuth,
    code: &'static str,
}

impl PermissionGate {
    #[must_use]
    pub fn new(auth: SharedAuth, code: &'static str) -> Self {
        Self { auth, code }
    }
}

pub async fn require_permission(
    State(gate): State<PermissionGate>,
    request: Request,
    next: Next,
) -> Response {
    let Some(identity) = request.extensions().get::<Identity>() else {
        return Rejection::RequireLogin.into_response();
    };

    let decision = gate.auth.authorize(identity, gate.code).await;
    match decision {
        Ok(()) => next.run(request).await,
        Err(AuthError::Forbidden) => Rejection::Forbidden.into_response(),
        Err(err) => Rejection::for_login(&err).into_response(),
    }
}

fn step_up_value(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == STEP_UP_PARAM)
        .map(|(_, value)| value.into_owned())
}
