//! Shared types, adapter traits, and core utilities for the chatrelay pipeline.
//!
//! This crate contains the foundational types that are shared between the
//! notification and export engines and all adapter implementations. The host
//! chat server is consumed exclusively through the traits defined here.

pub mod backend;
pub mod channel;
pub mod error;
pub mod post;
pub mod prelude;
pub mod store_adapter;
pub mod types;
pub mod user;

pub use error::{CrResult, Error};
pub use types::{Clock, SystemClock, Timestamp};

use std::sync::Arc;

/// Localisation lookup supplied by the host: `translate(key, args) -> string`.
pub type TranslateFn = Arc<dyn Fn(&str, &serde_json::Value) -> String + Send + Sync>;

// vim: ts=4
