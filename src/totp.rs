//! Time-based one-time passwords (RFC 6238, HMAC-SHA1, 6 digits).
//!
//! The engine is stateless: codes are derived from the shared secret and the
//! clock, nothing is stored per verification. The secret's raw bytes are the
//! HMAC key.

use data_encoding::BASE32_NOPAD;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use totp_rs::{Algorithm, TOTP};

use crate::error::AuthError;

pub const TOTP_DIGITS: usize = 6;
/// Widest accepted drift, in time steps either side of the current one.
pub const MAX_TOTP_WINDOW: u32 = 10;
const MIN_SECRET_LEN: usize = 16;
const GENERATED_SECRET_BYTES: usize = 32;

#[derive(Clone, Debug)]
pub struct TotpConfig {
    enabled: bool,
    time_step: u64,
    window_size: u32,
    issuer: String,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time_step: 30,
            window_size: 1,
            issuer: "authcore".to_string(),
        }
    }
}

impl TotpConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_time_step(mut self, seconds: u64) -> Self {
        self.time_step = seconds;
        self
    }

    /// Clamped to [`MAX_TOTP_WINDOW`].
    #[must_use]
    pub fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size.min(MAX_TOTP_WINDOW);
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn time_step(&self) -> u64 {
        self.time_step
    }

    #[must_use]
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

/// Bounds of the time step containing a given instant, in unix seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TotpWindow {
    pub window_start: i64,
    pub window_end: i64,
    pub expires_in: i64,
}

#[derive(Clone, Debug)]
pub struct TotpEngine {
    totp: TOTP,
    config: TotpConfig,
}

impl TotpEngine {
    /// Build an engine over `secret`.
    ///
    /// # Errors
    /// Returns `AuthError::Config` if the trimmed secret is shorter than 16
    /// characters, the time step is zero, or the issuer is not representable
    /// in an `otpauth://` URL.
    pub fn new(secret: &SecretString, config: TotpConfig) -> Result<Self, AuthError> {
        let secret = secret.expose_secret().trim();
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::Config(format!(
                "totp secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        if config.time_step == 0 {
            return Err(AuthError::Config(
                "totp time step must be positive".to_string(),
            ));
        }

        let totp = TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            0,
            config.time_step,
            secret.as_bytes().to_vec(),
            Some(config.issuer.clone()),
            "step-up".to_string(),
        )
        .map_err(|err| AuthError::Config(format!("totp init: {err}")))?;

        Ok(Self { totp, config })
    }

    #[must_use]
    pub fn config(&self) -> &TotpConfig {
        &self.config
    }

    /// Code for the time step containing `at_unix`. Instants before the epoch
    /// use counter zero.
    #[must_use]
    pub fn generate_at(&self, at_unix: i64) -> String {
        self.totp.generate(u64::try_from(at_unix).unwrap_or(0))
    }

    /// Accept `code` if it matches any step within `±window_size` of `at_unix`.
    #[must_use]
    pub fn verify_at(&self, code: &str, at_unix: i64) -> bool {
        let code = code.trim();
        if code.len() != TOTP_DIGITS {
            return false;
        }

        let step = i64::try_from(self.config.time_step).unwrap_or(i64::MAX);
        let window = i64::from(self.config.window_size);
        let mut matched = false;
        for offset in -window..=window {
            let Some(at) = offset
                .checked_mul(step)
                .and_then(|delta| at_unix.checked_add(delta))
            else {
                continue;
            };
            let Ok(at) = u64::try_from(at) else {
                continue;
            };
            // No early return, every candidate is compared.
            matched |= constant_time_eq(code, &self.totp.generate(at));
        }
        matched
    }

    /// Current step bounds and seconds until the code rotates.
    #[must_use]
    pub fn window(&self, at_unix: i64) -> TotpWindow {
        let step = i64::try_from(self.config.time_step).unwrap_or(i64::MAX);
        let window_start = at_unix - at_unix.rem_euclid(step);
        let window_end = window_start.saturating_add(step);
        TotpWindow {
            window_start,
            window_end,
            expires_in: window_end - at_unix,
        }
    }

    /// `otpauth://totp/...` URL for enrolling an authenticator app.
    ///
    /// # Errors
    /// Returns `AuthError::Config` if `account` contains a `:`.
    pub fn provisioning_url(&self, account: &str) -> Result<String, AuthError> {
        if account.contains(':') {
            return Err(AuthError::Config(
                "account name must not contain ':'".to_string(),
            ));
        }
        let mut totp = self.totp.clone();
        totp.account_name = account.to_string();
        Ok(totp.get_url())
    }
}

/// Fresh 32-byte secret, Base32 without padding, for provisioning.
///
/// # Errors
/// Returns `AuthError::Backend` if the randomness source fails.
pub fn generate_secret() -> Result<String, AuthError> {
    let mut bytes = [0u8; GENERATED_SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| AuthError::Backend(format!("randomness source: {err}")))?;
    Ok(BASE32_NOPAD.encode(&bytes))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
