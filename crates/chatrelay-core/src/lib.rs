//! Core infrastructure for the chatrelay pipeline: configuration model and
//! invite rate limiting.

pub mod config;
pub mod rate_limit;

mod prelude;

pub use config::Config;
pub use rate_limit::InviteRateLimiter;

// vim: ts=4
