use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

use crate::{
    bearer::BearerConfig,
    once_token::OnceTokenConfig,
    totp::{TotpConfig, MAX_TOTP_WINDOW},
};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_BEARER_TTL: &str = "bearer-ttl-seconds";
pub const ARG_ONCE_TOKEN_TTL: &str = "once-token-ttl-seconds";
pub const ARG_TOTP_SECRET: &str = "totp-secret";
pub const ARG_TOTP_ENABLED: &str = "totp-enabled";
pub const ARG_TOTP_TIME_STEP: &str = "totp-time-step";
pub const ARG_TOTP_WINDOW: &str = "totp-window";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";

#[derive(Debug, Clone)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub totp_secret: Option<SecretString>,
    pub bearer: BearerConfig,
    pub once_token: OnceTokenConfig,
    pub totp: TotpConfig,
}

impl Options {
    /// Parse credential arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing, or TOTP is enabled
    /// without a secret.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_JWT_SECRET}"))?;

        let totp_secret = matches
            .get_one::<String>(ARG_TOTP_SECRET)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()));

        let mut bearer = BearerConfig::new().with_ttl(Duration::from_secs(
            matches
                .get_one::<u64>(ARG_BEARER_TTL)
                .copied()
                .unwrap_or(86_400),
        ));
        if let Some(issuer) = matches
            .get_one::<String>(ARG_JWT_ISSUER)
            .filter(|v| !v.trim().is_empty())
        {
            bearer = bearer.with_issuer(issuer.as_str());
        }

        let once_token = OnceTokenConfig::new().with_ttl(Duration::from_secs(
            matches
                .get_one::<u64>(ARG_ONCE_TOKEN_TTL)
                .copied()
                .unwrap_or(300),
        ));

        let enabled = matches.get_flag(ARG_TOTP_ENABLED);
        if enabled && totp_secret.is_none() {
            return Err(anyhow!(
                "--{ARG_TOTP_ENABLED} requires --{ARG_TOTP_SECRET}"
            ));
        }

        let mut totp = TotpConfig::new()
            .with_enabled(enabled)
            .with_time_step(
                matches
                    .get_one::<u64>(ARG_TOTP_TIME_STEP)
                    .copied()
                    .unwrap_or(30),
            )
            .with_window_size(matches.get_one::<u32>(ARG_TOTP_WINDOW).copied().unwrap_or(1));
        if let Some(issuer) = matches.get_one::<String>(ARG_TOTP_ISSUER) {
            totp = totp.with_issuer(issuer.as_str());
        }

        Ok(Self {
            jwt_secret,
            totp_secret,
            bearer,
            once_token,
            totp,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_bearer_args(command);
    let command = with_once_token_args(command);
    with_totp_args(command)
}

fn with_bearer_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret for bearer credentials (at least 16 characters)")
                .env("AUTHCORE_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Required issuer (iss) of bearer credentials")
                .env("AUTHCORE_JWT_ISSUER"),
        )
        .arg(
            Arg::new(ARG_BEARER_TTL)
                .long(ARG_BEARER_TTL)
                .help("Lifetime of issued bearer credentials in seconds")
                .env("AUTHCORE_BEARER_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn with_once_token_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_ONCE_TOKEN_TTL)
            .long(ARG_ONCE_TOKEN_TTL)
            .help("Once-token lifetime in seconds")
            .env("AUTHCORE_ONCE_TOKEN_TTL_SECONDS")
            .default_value("300")
            .value_parser(clap::value_parser!(u64).range(1..)),
    )
}

fn with_totp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOTP_SECRET)
                .long(ARG_TOTP_SECRET)
                .help("Shared TOTP secret (at least 16 characters)")
                .env("AUTHCORE_TOTP_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TOTP_ENABLED)
                .long(ARG_TOTP_ENABLED)
                .help("Accept six-digit TOTP codes as step-up confirmation")
                .env("AUTHCORE_TOTP_ENABLED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_TOTP_TIME_STEP)
                .long(ARG_TOTP_TIME_STEP)
                .help("TOTP time step in seconds")
                .env("AUTHCORE_TOTP_TIME_STEP")
                .default_value("30")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TOTP_WINDOW)
                .long(ARG_TOTP_WINDOW)
                .help("Accepted TOTP steps before and after the current one")
                .env("AUTHCORE_TOTP_WINDOW")
                .default_value("1")
                .value_parser(clap::value_parser!(u32).range(0..=i64::from(MAX_TOTP_WINDOW))),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer shown by authenticator apps")
                .env("AUTHCORE_TOTP_ISSUER")
                .default_value("authcore"),
        )
}
