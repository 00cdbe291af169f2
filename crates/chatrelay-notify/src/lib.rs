//! Notification emails.
//!
//! Two halves: a renderer producing transactional and batched notification
//! emails from templates, and the batching engine that coalesces per-user
//! notifications over a configurable window with view-time suppression.
//!
//! Ingress is a bounded channel; when it is full `add` returns `false` and
//! the caller falls back to an immediate, non-batched email.

pub mod batching;
pub mod markdown;
pub mod renderer;
pub mod service;

mod prelude;

pub use batching::{BatchFlushHandler, BatchedNotification, EmailBatchingService};
pub use renderer::{RenderedEmail, Renderer, TransactionalEvent};
pub use service::{create_verification_token, EmailNotificationService, TOKEN_TYPE_VERIFY_EMAIL};

// vim: ts=4
