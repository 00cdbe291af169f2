//! SMTP mail transport.
//!
//! One operation: send one message. Handles multipart/alternative bodies,
//! inline CID parts, attachments, TLS/STARTTLS/plain connections with
//! PLAIN/LOGIN authentication, and synthetic Message-IDs. The transport
//! never retries; every failure is surfaced to the caller.

pub mod message;
pub mod session;
pub mod transport;

mod prelude;

pub use message::MailMessage;
pub use session::{RawSession, SessionConfig, SessionFactory, SmtpSessionFactory};
pub use transport::{MailTransport, SmtpConfig};

/// Derive a plain-text body by stripping HTML
pub fn html_to_text(html: &str) -> String {
	html2text::from_read(html.as_bytes(), 80)
}

// vim: ts=4
