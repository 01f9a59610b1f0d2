//! `Set-Cookie` rendering and `Cookie` parsing for the session identifier.

use axum::http::{header::COOKIE, HeaderMap, HeaderValue};

use super::SessionConfig;
use crate::error::AuthError;

/// Max-age used when clearing; rendered as `Max-Age=0`.
const CLEAR_MAX_AGE: i64 = -1;

/// Build the cookie that carries `session_id` for the configured max-age.
///
/// # Errors
/// Returns `AuthError::Config` if the attributes contain characters that are
/// not valid in a header value.
pub fn session_cookie(config: &SessionConfig, session_id: &str) -> Result<HeaderValue, AuthError> {
    render(config, session_id, config.max_age_seconds())
}

/// Build the cookie that removes the session, same attributes, empty value.
///
/// # Errors
/// Same as [`session_cookie`].
pub fn clear_session_cookie(config: &SessionConfig) -> Result<HeaderValue, AuthError> {
    render(config, "", CLEAR_MAX_AGE)
}

fn render(config: &SessionConfig, value: &str, max_age: i64) -> Result<HeaderValue, AuthError> {
    let mut cookie = format!("{}={value}; Path={}", config.cookie_name(), config.path());
    if !config.domain().is_empty() {
        cookie.push_str("; Domain=");
        cookie.push_str(config.domain());
    }
    if config.http_only() {
        cookie.push_str("; HttpOnly");
    }
    cookie.push_str("; SameSite=Lax");
    cookie.push_str(&format!("; Max-Age={}", max_age.max(0)));
    if config.secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|err| AuthError::Config(format!("invalid session cookie: {err}")))
}

/// Session identifier from the request cookies, if present and non-empty.
#[must_use]
pub fn read_session_cookie(config: &SessionConfig, headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == config.cookie_name() {
                let val = val.trim();
                if !val.is_empty() {
                    return Some(val.to_string());
                }
            }
        }
    }
    None
}
