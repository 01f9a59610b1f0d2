use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

use crate::{api::SharedAuth, identity::CurrentUser, orchestrator::TotpStatus};

pub async fn status(State(auth): State<SharedAuth>) -> Json<TotpStatus> {
    Json(auth.totp_status())
}

/// Current code for the logged-in operator; 400 when TOTP is disabled.
pub async fn token(State(auth): State<SharedAuth>, CurrentUser(_): CurrentUser) -> Response {
    match auth.current_totp() {
        Some(code) => Json(code).into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 400, "message": "totp is not enabled"})),
        )
            .into_response(),
    }
}
