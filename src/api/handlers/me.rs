use axum::response::Json;
use serde::Serialize;

use crate::identity::CurrentUser;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: u64,
    pub username: String,
    pub email: String,
    pub role: Option<u8>,
}

/// Public-audience profile resolved from the bearer credential.
pub async fn me(CurrentUser(identity): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: identity.user_id,
        username: identity.username,
        email: identity.email,
        role: identity.role,
    })
}
