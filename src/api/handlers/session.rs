use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

use crate::{
    api::SharedAuth,
    error::Rejection,
    identity::{CurrentUser, StepUp, StepUpMethod},
    orchestrator::Revocation,
};

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: u64,
    pub username: String,
    pub role_ids: BTreeSet<u64>,
    pub perm_codes: BTreeSet<String>,
}

pub async fn session(CurrentUser(identity): CurrentUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        user_id: identity.user_id,
        username: identity.username,
        role_ids: identity.role_ids,
        perm_codes: identity.perm_codes,
    })
}

/// End the caller's session. Answers 204 with the clearing cookie.
pub async fn logout(
    State(auth): State<SharedAuth>,
    CurrentUser(identity): CurrentUser,
) -> Response {
    match auth.logout(&identity).await {
        Ok(cookie) => (StatusCode::NO_CONTENT, [(SET_COOKIE, cookie)]).into_response(),
        Err(err) => Rejection::for_login(&err).into_response(),
    }
}

/// Forced global logout of `user_id`.
pub async fn revoke_user(
    State(auth): State<SharedAuth>,
    Path(user_id): Path<u64>,
    CurrentUser(identity): CurrentUser,
    StepUp(grant): StepUp,
) -> Result<Json<Revocation>, Rejection> {
    let method = match grant.method {
        StepUpMethod::OnceToken(_) => "once_token",
        StepUpMethod::Totp => "totp",
    };
    let revocation = auth
        .revoke_user(user_id)
        .await
        .map_err(|err| Rejection::for_login(&err))?;
    info!(
        actor = identity.user_id,
        target = user_id,
        method,
        "Forced logout"
    );
    Ok(Json(revocation))
}
