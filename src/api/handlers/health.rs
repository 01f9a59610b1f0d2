use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Json},
};
use serde_json::json;

use crate::api::SharedAuth;

// axum handler for health
pub async fn health(State(auth): State<SharedAuth>) -> impl IntoResponse {
    let body = Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok",
        "totp_enabled": auth.totp().is_some(),
    }));

    let mut headers = HeaderMap::new();
    headers.insert(
        "X-App",
        HeaderValue::from_static(concat!(
            env!("CARGO_PKG_NAME"),
            ":",
            env!("CARGO_PKG_VERSION")
        )),
    );

    (headers, body)
}
