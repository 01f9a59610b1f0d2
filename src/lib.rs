//! # authcore
//!
//! Authentication core for a content-management backend with two audiences:
//! an administrative console authenticated by a server-side session carried
//! in a cookie, and a public site authenticated by self-contained bearer
//! credentials.
//!
//! Sensitive administrative actions additionally require step-up
//! confirmation: either a once-token, minted for the logged-in user and
//! consumed atomically on first use, or a six-digit TOTP code derived from a
//! shared secret.
//!
//! ## Stores
//!
//! Sessions live either in process ([`session::MemorySessionStore`]) or in a
//! TTL-capable key-value backend ([`session::KvSessionStore`] over
//! [`kv::RedisKv`]). Once-tokens always go through a [`kv::KvStore`] so that
//! single use holds across replicas.
//!
//! Every time-dependent component takes a [`clock::Clock`], which keeps expiry
//! deterministic in tests.

pub mod api;
pub mod bearer;
pub mod cli;
pub mod clock;
pub mod error;
pub mod identity;
pub mod kv;
pub mod once_token;
pub mod orchestrator;
pub mod permission;
pub mod secrets;
pub mod session;
pub mod totp;

pub use self::error::{AuthError, Rejection};
pub use self::orchestrator::Authenticator;
