use anyhow::{anyhow, Result};
use clap::{builder::PossibleValuesParser, Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_STORE: &str = "store";
pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";

/// Where sessions and once-tokens live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Sessions in process, once-tokens in an in-process TTL map.
    Memory,
    /// Both in Redis.
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct Options {
    pub backend: Backend,
    pub timeout: Duration,
}

impl Options {
    /// Parse store arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the redis backend is selected without a URL.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let backend = match matches.get_one::<String>(ARG_STORE).map(String::as_str) {
            Some("redis") => Backend::Redis {
                url: matches
                    .get_one::<String>(ARG_REDIS_URL)
                    .cloned()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| anyhow!("missing required argument: --{ARG_REDIS_URL}"))?,
            },
            _ => Backend::Memory,
        };

        let timeout_ms = matches
            .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
            .copied()
            .unwrap_or(2000);

        Ok(Self {
            backend,
            timeout: Duration::from_millis(timeout_ms),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_STORE)
                .long(ARG_STORE)
                .help("Session and once-token backend")
                .env("AUTHCORE_STORE")
                .default_value("memory")
                .value_parser(PossibleValuesParser::new(["memory", "redis"])),
        )
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis connection URL, example: redis://127.0.0.1:6379/0")
                .env("AUTHCORE_REDIS_URL"),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Per-operation store timeout in milliseconds")
                .env("AUTHCORE_STORE_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
