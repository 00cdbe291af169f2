//! Error types shared by every chatrelay crate.

use std::time::Duration;

pub type CrResult<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	/// Token creation for verification / invite flows failed
	CreateToken(String),
	/// Rate limiter could not be constructed
	RateLimiterSetup(String),
	/// An invite flow was invoked without a configured rate limiter
	NoRateLimiter,
	/// Per-sender invite rate limit hit
	RateLimitExceeded { retry_after: Duration, reset_after: Duration },
	/// Mail could not be handed to the SMTP transport
	SendMail(String),
	/// Validation failure on a message field (reserved for external callers)
	FieldError { field: &'static str, reason: String },
	/// Export backend read/write failure
	ExportIo(String),
	/// SMTP connect / TLS / auth / write failure
	Smtp(String),
	/// Malformed persisted job data or post props
	Decode(String),

	ConfigError(String),
	ValidationError(String),
	NotFound(String),
	Internal(String),

	// externals
	Io(std::io::Error),
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::Io(err)
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Error::CreateToken(msg) => write!(f, "failed to create token: {}", msg),
			Error::RateLimiterSetup(msg) => write!(f, "failed to set up rate limiter: {}", msg),
			Error::NoRateLimiter => write!(f, "no rate limiter configured"),
			Error::RateLimitExceeded { retry_after, .. } => {
				write!(f, "rate limit exceeded, retry after {:?}", retry_after)
			}
			Error::SendMail(msg) => write!(f, "failed to send mail: {}", msg),
			Error::FieldError { field, reason } => {
				write!(f, "invalid field '{}': {}", field, reason)
			}
			Error::ExportIo(msg) => write!(f, "export backend error: {}", msg),
			Error::Smtp(msg) => write!(f, "smtp error: {}", msg),
			Error::Decode(msg) => write!(f, "decode error: {}", msg),
			Error::ConfigError(msg) => write!(f, "configuration error: {}", msg),
			Error::ValidationError(msg) => write!(f, "validation error: {}", msg),
			Error::NotFound(what) => write!(f, "not found: {}", what),
			Error::Internal(msg) => write!(f, "internal error: {}", msg),
			Error::Io(err) => write!(f, "io error: {}", err),
		}
	}
}

impl std::error::Error for Error {}

// vim: ts=4
