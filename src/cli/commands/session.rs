use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

use crate::session::{SessionConfig, MAX_SESSION_AGE_SECONDS};

pub const ARG_COOKIE_NAME: &str = "cookie-name";
pub const ARG_COOKIE_PATH: &str = "cookie-path";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_COOKIE_HTTP_ONLY: &str = "cookie-http-only";
pub const ARG_SESSION_MAX_AGE: &str = "session-max-age-seconds";
pub const ARG_SESSION_SWEEP: &str = "session-sweep-seconds";

/// Build the session configuration from matches.
///
/// # Errors
/// Returns an error if the cookie name is blank.
pub fn parse(matches: &ArgMatches) -> Result<SessionConfig> {
    let mut config = SessionConfig::new();

    if let Some(name) = matches.get_one::<String>(ARG_COOKIE_NAME) {
        if name.trim().is_empty() {
            anyhow::bail!("--{ARG_COOKIE_NAME} must not be empty");
        }
        config = config.with_cookie_name(name.trim());
    }
    if let Some(path) = matches.get_one::<String>(ARG_COOKIE_PATH) {
        config = config.with_path(path.as_str());
    }
    if let Some(domain) = matches.get_one::<String>(ARG_COOKIE_DOMAIN) {
        config = config.with_domain(domain.as_str());
    }
    if let Some(seconds) = matches.get_one::<i64>(ARG_SESSION_MAX_AGE) {
        config = config.with_max_age_seconds(*seconds);
    }
    if let Some(seconds) = matches.get_one::<u64>(ARG_SESSION_SWEEP) {
        config = config.with_sweep_interval(Duration::from_secs(*seconds));
    }

    Ok(config
        .with_secure(matches.get_flag(ARG_COOKIE_SECURE))
        .with_http_only(
            matches
                .get_one::<bool>(ARG_COOKIE_HTTP_ONLY)
                .copied()
                .unwrap_or(true),
        ))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COOKIE_NAME)
                .long(ARG_COOKIE_NAME)
                .help("Session cookie name")
                .env("AUTHCORE_COOKIE_NAME")
                .default_value("session_id"),
        )
        .arg(
            Arg::new(ARG_COOKIE_PATH)
                .long(ARG_COOKIE_PATH)
                .help("Session cookie path")
                .env("AUTHCORE_COOKIE_PATH")
                .default_value("/"),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Session cookie domain (empty: host only)")
                .env("AUTHCORE_COOKIE_DOMAIN")
                .default_value(""),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark the session cookie Secure")
                .env("AUTHCORE_COOKIE_SECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_COOKIE_HTTP_ONLY)
                .long(ARG_COOKIE_HTTP_ONLY)
                .help("Mark the session cookie HttpOnly")
                .env("AUTHCORE_COOKIE_HTTP_ONLY")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_SESSION_MAX_AGE)
                .long(ARG_SESSION_MAX_AGE)
                .help("Session lifetime in seconds, renewed on every authenticated request")
                .env("AUTHCORE_SESSION_MAX_AGE_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_SESSION_AGE_SECONDS)),
        )
        .arg(
            Arg::new(ARG_SESSION_SWEEP)
                .long(ARG_SESSION_SWEEP)
                .help("Expired-session sweep interval in seconds (memory store)")
                .env("AUTHCORE_SESSION_SWEEP_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
