//! Process-wide credential material, loaded once at startup.
//!
//! Values are wrapped in [`SecretString`] and only exposed when an engine is
//! constructed. Nothing here is mutated after construction, so the struct is
//! shared by reference without locking.

use secrecy::{ExposeSecret, SecretString};

use crate::error::AuthError;

const MIN_SIGNING_SECRET_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct Secrets {
    signing: SecretString,
    totp: Option<SecretString>,
}

impl Secrets {
    /// Build the secret set from configuration.
    ///
    /// # Errors
    /// Returns `AuthError::Config` if the bearer signing secret is shorter than
    /// 16 characters.
    pub fn new(signing: SecretString, totp: Option<SecretString>) -> Result<Self, AuthError> {
        if signing.expose_secret().trim().len() < MIN_SIGNING_SECRET_LEN {
            return Err(AuthError::Config(format!(
                "signing secret must be at least {MIN_SIGNING_SECRET_LEN} characters"
            )));
        }
        // An empty TOTP secret is treated as "not configured".
        let totp = totp.filter(|secret| !secret.expose_secret().trim().is_empty());
        Ok(Self { signing, totp })
    }

    #[must_use]
    pub fn signing(&self) -> &SecretString {
        &self.signing
    }

    #[must_use]
    pub fn totp(&self) -> Option<&SecretString> {
        self.totp.as_ref()
    }
}
