pub mod health;
pub mod me;
pub mod session;
pub mod step_up;
pub mod totp;
