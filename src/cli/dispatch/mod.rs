//! Map validated CLI matches to an action.

use crate::cli::actions::{server, totp_secret, Action};
use crate::cli::commands::{self, auth, session, store};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    if let Some(sub) = matches.subcommand_matches(commands::CMD_TOTP_SECRET) {
        let totp = match matches.get_one::<String>(auth::ARG_TOTP_ISSUER) {
            Some(issuer) => crate::totp::TotpConfig::new().with_issuer(issuer.as_str()),
            None => crate::totp::TotpConfig::new(),
        };
        return Ok(Action::TotpSecret(totp_secret::Args {
            account: sub.get_one::<String>(commands::ARG_ACCOUNT).cloned(),
            totp,
        }));
    }

    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    Ok(Action::Server(server::Args {
        port,
        store: store::Options::parse(matches)?,
        session: session::parse(matches)?,
        auth: auth::Options::parse(matches)?,
    }))
}
