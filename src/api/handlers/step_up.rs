use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{api::SharedAuth, error::Rejection, identity::CurrentUser};

#[derive(Debug, Default, Deserialize)]
pub struct OnceTokenRequest {
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct OnceTokenResponse {
    pub token_id: String,
    pub expires_at: i64,
    pub expires_in: i64,
}

/// Mint a once-token for the next sensitive action. The body is optional.
pub async fn once_token(
    State(auth): State<SharedAuth>,
    CurrentUser(identity): CurrentUser,
    body: Option<Json<OnceTokenRequest>>,
) -> Result<Json<OnceTokenResponse>, Rejection> {
    let metadata = body.and_then(|Json(request)| request.metadata);
    let token = auth
        .mint_once_token(&identity, metadata)
        .await
        .map_err(|err| Rejection::for_login(&err))?;

    Ok(Json(OnceTokenResponse {
        expires_in: token.expires_at - token.created_at,
        token_id: token.token_id,
        expires_at: token.expires_at,
    }))
}
