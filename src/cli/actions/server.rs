use crate::{
    api,
    bearer::BearerValidator,
    cli::{
        commands::{auth, store},
        telemetry,
    },
    clock::{Clock, SystemClock},
    kv::{KvStore, MemoryKv, RedisKv},
    once_token::OnceTokenStore,
    orchestrator::Authenticator,
    secrets::Secrets,
    session::{KvSessionStore, MemorySessionStore, SessionConfig, SessionStore},
    totp::TotpEngine,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub store: store::Options,
    pub session: SessionConfig,
    pub auth: auth::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the stores cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let (authenticator, memory_sessions) = build(&args).await?;

    let result = api::serve(args.port, authenticator, shutdown_signal()).await;

    if let Some(store) = memory_sessions {
        store.shutdown().await;
    }
    telemetry::shutdown_tracer();

    result
}

/// Wire clock, stores and engines into an [`Authenticator`].
///
/// The in-process session store is returned separately so its sweeper can be
/// stopped on shutdown.
/// # Errors
/// Returns an error for rejected secrets or an unreachable backend.
pub async fn build(args: &Args) -> Result<(Arc<Authenticator>, Option<Arc<MemorySessionStore>>)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let secrets = Secrets::new(args.auth.jwt_secret.clone(), args.auth.totp_secret.clone())
        .context("Invalid credential configuration")?;

    let (kv, sessions, memory_sessions): (
        Arc<dyn KvStore>,
        Arc<dyn SessionStore>,
        Option<Arc<MemorySessionStore>>,
    ) = match &args.store.backend {
        store::Backend::Memory => {
            let sessions = Arc::new(MemorySessionStore::new(
                args.session.clone(),
                clock.clone(),
            ));
            (
                Arc::new(MemoryKv::new(clock.clone())),
                sessions.clone(),
                Some(sessions),
            )
        }
        store::Backend::Redis { url } => {
            let kv: Arc<dyn KvStore> = Arc::new(
                RedisKv::connect(url, args.store.timeout)
                    .await
                    .with_context(|| format!("Failed to connect to {}", redact_url(url)))?,
            );
            let sessions = Arc::new(KvSessionStore::new(
                kv.clone(),
                args.session.clone(),
                clock.clone(),
            ));
            (kv, sessions, None)
        }
    };

    let tokens = OnceTokenStore::new(kv, args.auth.once_token.clone(), clock.clone());
    let bearer = BearerValidator::new(secrets.signing(), args.auth.bearer.clone(), clock.clone());

    let mut authenticator = Authenticator::new(sessions, tokens, bearer, clock);
    if args.auth.totp.enabled() {
        let secret = secrets
            .totp()
            .context("TOTP is enabled but no TOTP secret is configured")?;
        let engine = TotpEngine::new(secret, args.auth.totp.clone())
            .context("Invalid TOTP configuration")?;
        authenticator = authenticator.with_totp(engine);
    }

    Ok((Arc::new(authenticator), memory_sessions))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn log_startup_args(args: &Args) {
    let backend = match &args.store.backend {
        store::Backend::Memory => "memory".to_string(),
        store::Backend::Redis { url } => format!("redis ({})", redact_url(url)),
    };
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("store", backend),
        ("store_timeout", format!("{:?}", args.store.timeout)),
        ("cookie_name", args.session.cookie_name().to_string()),
        ("session_max_age", format!("{}s", args.session.max_age_seconds())),
        ("cookie_secure", args.session.secure().to_string()),
        (
            "once_token_ttl",
            format!("{}s", args.auth.once_token.ttl().as_secs()),
        ),
        ("totp_enabled", args.auth.totp.enabled().to_string()),
        ("totp_time_step", format!("{}s", args.auth.totp.time_step())),
        ("totp_window", args.auth.totp.window_size().to_string()),
        (
            "jwt_issuer",
            args.auth
                .bearer
                .issuer()
                .unwrap_or("none")
                .to_string(),
        ),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}
