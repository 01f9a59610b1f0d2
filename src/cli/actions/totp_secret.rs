use crate::totp::{generate_secret, TotpConfig, TotpEngine};
use anyhow::{Context, Result};
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub account: Option<String>,
    pub totp: TotpConfig,
}

/// Print a fresh shared secret and, with an account, its `otpauth://` URL.
/// # Errors
/// Returns an error if randomness fails or the account name is rejected.
pub fn execute(args: &Args) -> Result<()> {
    let (secret, url) = provision(args)?;
    println!("{secret}");
    if let Some(url) = url {
        println!("{url}");
    }
    Ok(())
}

fn provision(args: &Args) -> Result<(String, Option<String>)> {
    let secret = generate_secret().context("Failed to generate TOTP secret")?;
    let url = match &args.account {
        Some(account) => {
            let engine = TotpEngine::new(&SecretString::from(secret.clone()), args.totp.clone())?;
            Some(
                engine
                    .provisioning_url(account)
                    .context("Failed to build provisioning URL")?,
            )
        }
        None => None,
    };
    Ok((secret, url))
}
