//! HTTP surface over the [`Authenticator`].
//!
//! Credential verification (password, e-mail code) happens in the surrounding
//! application, which opens sessions through [`Authenticator::login`]. This
//! router only exposes what the request layer needs around an existing login.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use crate::orchestrator::Authenticator;

pub mod handlers;
pub mod middleware;

use self::handlers::{health, me, session, step_up, totp};
use self::middleware::{
    require_bearer, require_permission, require_session, require_step_up, PermissionGate,
};

/// Permission guarding forced logout of another user.
pub const PERM_USER_LOGOUT: &str = "system:user:logout";

pub type SharedAuth = Arc<Authenticator>;

/// Build the router with every route and layer wired.
#[must_use]
pub fn router(auth: SharedAuth) -> Router {
    let admin = Router::new()
        .route("/v1/auth/session", get(session::session))
        .route("/v1/auth/logout", post(session::logout))
        .route("/v1/auth/once-token", post(step_up::once_token))
        .route("/v1/auth/totp/token", get(totp::token))
        .route_layer(from_fn_with_state(auth.clone(), require_session));

    // Layers run outermost-last: session, then permission, then step-up, so a
    // forbidden caller never burns a once-token.
    let sensitive = Router::new()
        .route(
            "/v1/auth/users/:user_id/sessions",
            delete(session::revoke_user),
        )
        .route_layer(from_fn_with_state(auth.clone(), require_step_up))
        .route_layer(from_fn_with_state(
            PermissionGate::new(auth.clone(), PERM_USER_LOGOUT),
            require_permission,
        ))
        .route_layer(from_fn_with_state(auth.clone(), require_session));

    let public = Router::new()
        .route("/v1/auth/me", get(me::me))
        .route_layer(from_fn_with_state(auth.clone(), require_bearer));

    Router::new()
        .route("/health", get(health::health))
        .route("/v1/auth/totp/status", get(totp::status))
        .merge(admin)
        .merge(sensitive)
        .merge(public)
        .with_state(auth)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span)),
        )
}

/// Serve until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve<F>(port: u16, auth: SharedAuth, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(auth);

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    // Headers stay out of the span; they carry session cookies and bearer tokens.
    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
