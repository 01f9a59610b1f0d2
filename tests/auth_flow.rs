use anyhow::Result;
use authcore::{
    api,
    bearer::{BearerConfig, BearerValidator},
    clock::ManualClock,
    error::AuthError,
    kv::MemoryKv,
    once_token::{OnceTokenConfig, OnceTokenStore},
    orchestrator::Authenticator,
    permission::StaticPermissions,
    session::{MemorySessionStore, SessionConfig, SessionInfo, SessionStore},
    totp::{TotpConfig, TotpEngine},
};
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        HeaderMap, Request, StatusCode,
    },
    Router,
};
use chrono::Duration;
use secrecy::SecretString;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

const T0: i64 = 1_700_000_000;
const ADMIN: u64 = 42;
const EDITOR: u64 = 7;

struct Harness {
    clock: Arc<ManualClock>,
    auth: Arc<Authenticator>,
    app: Router,
}

fn harness(totp: bool, permissions: Option<StaticPermissions>) -> Harness {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let kv = Arc::new(MemoryKv::new(clock.clone()));
    let sessions = Arc::new(MemorySessionStore::new(
        SessionConfig::default(),
        clock.clone(),
    ));
    let tokens = OnceTokenStore::new(kv, OnceTokenConfig::default(), clock.clone());
    let bearer = BearerValidator::new(
        &SecretString::from("integration-bearer-secret".to_string()),
        BearerConfig::default(),
        clock.clone(),
    );

    let mut auth = Authenticator::new(sessions, tokens, bearer, clock.clone());
    if totp {
        let engine = TotpEngine::new(
            &SecretString::from("integration-totp-secret".to_string()),
            TotpConfig::new().with_enabled(true),
        )
        .expect("valid totp config");
        auth = auth.with_totp(engine);
    }
    if let Some(permissions) = permissions {
        auth = auth.with_permissions(Arc::new(permissions));
    }

    let auth = Arc::new(auth);
    let app = api::router(auth.clone());
    Harness { clock, auth, app }
}

async fn login(auth: &Authenticator, user_id: u64, role_ids: &[u64]) -> String {
    auth.login(
        SessionInfo::new(user_id, format!("user{user_id}"))
            .with_role_ids(role_ids.iter().copied())
            .with_perm_codes(["content:article:edit"]),
    )
    .await
    .expect("login")
    .session
    .session_id
}

fn request(method: &str, uri: &str, session: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(session) = session {
        builder = builder.header(COOKIE, format!("session_id={session}"));
    }
    Ok(builder.body(Body::empty())?)
}

async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, HeaderMap, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body)?
    };
    Ok((status, headers, json))
}

#[tokio::test]
async fn end_to_end_session_and_once_token() -> Result<()> {
    let clock = Arc::new(ManualClock::at_unix(T0));
    let kv = Arc::new(MemoryKv::new(clock.clone()));
    let sessions = MemorySessionStore::new(
        SessionConfig::default().with_max_age_seconds(86_400),
        clock.clone(),
    );
    let tokens = OnceTokenStore::new(kv, OnceTokenConfig::default(), clock.clone());

    let session_id = sessions
        .create(SessionInfo::new(ADMIN, "admin").with_role_ids([1, 3]))
        .await?;
    let cookie = sessions.set_cookie(&session_id)?;
    assert!(cookie.to_str()?.starts_with(&format!("session_id={session_id}")));

    clock.advance(Duration::seconds(10));
    let info = sessions.verify(&session_id).await?;
    assert_eq!(info.user_id, ADMIN);
    assert_eq!(info.role_ids.iter().copied().collect::<Vec<_>>(), vec![1, 3]);

    let token = tokens.generate(ADMIN, "admin", None).await?;
    let verified = tokens.verify(&token.token_id).await?;
    assert_eq!(verified.user_id, ADMIN);
    assert_eq!(
        tokens.verify(&token.token_id).await,
        Err(AuthError::NotFound)
    );

    sessions.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn health_carries_request_id() -> Result<()> {
    let h = harness(false, None);
    let (status, headers, body) = send(&h.app, request("GET", "/health", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "authcore");
    assert_eq!(body["status"], "ok");
    assert!(headers.contains_key("x-request-id"));
    assert!(headers.contains_key("x-app"));
    Ok(())
}

#[tokio::test]
async fn session_route_requires_login() -> Result<()> {
    let h = harness(false, None);

    let (status, _, body) = send(&h.app, request("GET", "/v1/auth/session", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);
    assert_eq!(body["message"], "login required");

    let (status, headers, _) = send(
        &h.app,
        request("GET", "/v1/auth/session", Some("unknown-session"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let cleared = headers
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(cleared.starts_with("session_id=;"));
    assert!(cleared.contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn session_slides_and_expires() -> Result<()> {
    let h = harness(false, None);
    let session = login(&h.auth, ADMIN, &[1]).await;

    h.clock.advance(Duration::seconds(86_399));
    let (status, _, body) =
        send(&h.app, request("GET", "/v1/auth/session", Some(&session))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], ADMIN);
    assert_eq!(body["role_ids"], serde_json::json!([1]));
    assert_eq!(body["perm_codes"], serde_json::json!(["content:article:edit"]));

    // Refreshed at T0+86399, so still valid one full max-age later minus a second.
    h.clock.advance(Duration::seconds(86_399));
    let (status, _, _) =
        send(&h.app, request("GET", "/v1/auth/session", Some(&session))?).await?;
    assert_eq!(status, StatusCode::OK);

    h.clock.advance(Duration::seconds(86_400));
    let (status, headers, _) =
        send(&h.app, request("GET", "/v1/auth/session", Some(&session))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(headers.contains_key(SET_COOKIE));
    Ok(())
}

#[tokio::test]
async fn revoke_requires_step_up_and_consumes_token() -> Result<()> {
    let h = harness(false, None);
    let admin = login(&h.auth, ADMIN, &[1]).await;
    let editor = login(&h.auth, EDITOR, &[2]).await;
    let uri = format!("/v1/auth/users/{EDITOR}/sessions");

    let (status, _, body) = send(&h.app, request("DELETE", &uri, Some(&admin))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "step-up confirmation required");

    let (status, _, minted) =
        send(&h.app, request("POST", "/v1/auth/once-token", Some(&admin))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(minted["expires_in"], 300);
    let token_id = minted["token_id"].as_str().unwrap_or_default().to_string();
    assert!(!token_id.is_empty());

    let confirmed = format!("{uri}?once_token={token_id}");
    let (status, _, body) = send(&h.app, request("DELETE", &confirmed, Some(&admin))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"], 1);
    assert_eq!(body["once_tokens"], 0);

    let (status, _, _) =
        send(&h.app, request("GET", "/v1/auth/session", Some(&editor))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(&h.app, request("DELETE", &confirmed, Some(&admin))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn once_token_metadata_is_kept() -> Result<()> {
    let h = harness(false, None);
    let admin = login(&h.auth, ADMIN, &[1]).await;

    let request = Request::builder()
        .method("POST")
        .uri("/v1/auth/once-token")
        .header(COOKIE, format!("session_id={admin}"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"metadata":{"action":"delete-user"}}"#))?;
    let (status, _, minted) = send(&h.app, request).await?;
    assert_eq!(status, StatusCode::OK);

    let token_id = minted["token_id"].as_str().unwrap_or_default();
    let info = h.auth.tokens().peek(token_id).await?;
    assert_eq!(
        info.metadata.and_then(|m| m.get("action").cloned()),
        Some(Value::from("delete-user"))
    );
    Ok(())
}

#[tokio::test]
async fn forbidden_caller_keeps_token() -> Result<()> {
    let h = harness(false, None);
    let editor = login(&h.auth, EDITOR, &[2]).await;
    let token = h
        .auth
        .tokens()
        .generate(EDITOR, "user7", None)
        .await?;

    let uri = format!("/v1/auth/users/{ADMIN}/sessions?once_token={}", token.token_id);
    let (status, _, body) = send(&h.app, request("DELETE", &uri, Some(&editor))?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 403);
    assert!(h.auth.tokens().peek(&token.token_id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn permission_checker_grants_non_admins() -> Result<()> {
    let h = harness(
        false,
        Some(StaticPermissions::new().grant(EDITOR, api::PERM_USER_LOGOUT)),
    );
    let editor = login(&h.auth, EDITOR, &[2]).await;
    let token = h.auth.tokens().generate(EDITOR, "user7", None).await?;

    let uri = format!("/v1/auth/users/{ADMIN}/sessions?once_token={}", token.token_id);
    let (status, _, body) = send(&h.app, request("DELETE", &uri, Some(&editor))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"], 0);
    Ok(())
}

#[tokio::test]
async fn token_of_another_user_is_not_burned() -> Result<()> {
    let h = harness(false, None);
    let admin = login(&h.auth, ADMIN, &[1]).await;
    let foreign = h.auth.tokens().generate(EDITOR, "user7", None).await?;

    let uri = format!(
        "/v1/auth/users/{EDITOR}/sessions?once_token={}",
        foreign.token_id
    );
    let (status, _, _) = send(&h.app, request("DELETE", &uri, Some(&admin))?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(h.auth.tokens().peek(&foreign.token_id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn totp_code_satisfies_step_up() -> Result<()> {
    let h = harness(true, None);
    let admin = login(&h.auth, ADMIN, &[1]).await;

    let (status, _, totp_status) =
        send(&h.app, request("GET", "/v1/auth/totp/status", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(totp_status["enabled"], true);
    assert_eq!(totp_status["time_step"], 30);
    assert_eq!(totp_status["window_size"], 1);
    assert_eq!(totp_status["current_time"], T0);

    let (status, _, code) =
        send(&h.app, request("GET", "/v1/auth/totp/token", Some(&admin))?).await?;
    assert_eq!(status, StatusCode::OK);
    let token = code["token"].as_str().unwrap_or_default().to_string();
    assert_eq!(token.len(), 6);
    assert!(code["window_start"].as_i64().unwrap_or_default() <= T0);

    let uri = format!("/v1/auth/users/{EDITOR}/sessions?once_token={token}");
    let (status, _, _) = send(&h.app, request("DELETE", &uri, Some(&admin))?).await?;
    assert_eq!(status, StatusCode::OK);

    // Codes are not consumed; the window still bounds them.
    h.clock.advance(Duration::seconds(120));
    let (status, _, _) = send(&h.app, request("DELETE", &uri, Some(&admin))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn totp_token_is_unavailable_when_disabled() -> Result<()> {
    let h = harness(false, None);
    let admin = login(&h.auth, ADMIN, &[1]).await;

    let (status, _, body) =
        send(&h.app, request("GET", "/v1/auth/totp/token", Some(&admin))?).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 400);

    let (_, _, totp_status) =
        send(&h.app, request("GET", "/v1/auth/totp/status", None)?).await?;
    assert_eq!(totp_status["enabled"], false);
    Ok(())
}

#[tokio::test]
async fn bearer_audience() -> Result<()> {
    let h = harness(false, None);

    let (status, _, _) = send(&h.app, request("GET", "/v1/auth/me", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = h.auth.bearer().issue(9, "reader", "reader@example.com", 1)?;
    let me = Request::builder()
        .method("GET")
        .uri("/v1/auth/me")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?;
    let (status, _, body) = send(&h.app, me).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], 9);
    assert_eq!(body["email"], "reader@example.com");
    assert_eq!(body["role"], 1);

    h.clock.advance(Duration::seconds(86_401));
    let expired = Request::builder()
        .method("GET")
        .uri("/v1/auth/me")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?;
    let (status, _, _) = send(&h.app, expired).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn logout_clears_cookie_and_tokens() -> Result<()> {
    let h = harness(false, None);
    let admin = login(&h.auth, ADMIN, &[1]).await;
    let pending = h.auth.tokens().generate(ADMIN, "user42", None).await?;

    let (status, headers, _) =
        send(&h.app, request("POST", "/v1/auth/logout", Some(&admin))?).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let cleared = headers
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(cleared.contains("Max-Age=0"));

    assert_eq!(
        h.auth.tokens().peek(&pending.token_id).await,
        Err(AuthError::NotFound)
    );
    let (status, _, _) =
        send(&h.app, request("GET", "/v1/auth/session", Some(&admin))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}
