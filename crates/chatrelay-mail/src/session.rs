//! Raw SMTP delivery sessions.
//!
//! The export delivery loop streams pre-rendered `.eml` bytes through a
//! session and recycles it after a fixed message count. Sessions come from a
//! factory so tests can substitute an in-memory collector.

use std::time::Duration;

use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{SmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::Address;

use chatrelay_core::config::{GlobalRelayCustomerType, GlobalRelaySettings};

use crate::prelude::*;

const A9_SMTP_SERVER: &str = "feeds.globalrelay.com";
const A10_SMTP_SERVER: &str = "feeds10.globalrelay.com";
const GLOBALRELAY_SMTP_PORT: u16 = 25;
const INBUCKET_SMTP_SERVER: &str = "localhost";
const INBUCKET_SMTP_PORT: u16 = 10025;

/// One open SMTP connection accepting raw RFC-2822 payloads
pub trait RawSession: Send {
	fn send_eml(&mut self, from: &str, to: &str, eml: &[u8]) -> CrResult<()>;
}

pub trait SessionFactory: Send + Sync {
	fn open(&self) -> CrResult<Box<dyn RawSession>>;
}

/// Connection profile resolved from the delivery customer type
#[derive(Debug, Clone)]
pub struct SessionConfig {
	pub server: String,
	pub port: u16,
	pub username: String,
	pub password: String,
	pub enable_auth: bool,
	pub starttls: bool,
	pub timeout: Duration,
}

impl SessionConfig {
	pub fn from_global_relay(settings: &GlobalRelaySettings) -> Self {
		let timeout = Duration::from_secs(settings.smtp_server_timeout);
		match settings.customer_type {
			GlobalRelayCustomerType::A9 => Self {
				server: A9_SMTP_SERVER.into(),
				port: GLOBALRELAY_SMTP_PORT,
				username: settings.smtp_username.clone(),
				password: settings.smtp_password.clone(),
				enable_auth: true,
				starttls: true,
				timeout,
			},
			GlobalRelayCustomerType::A10 => Self {
				server: A10_SMTP_SERVER.into(),
				port: GLOBALRELAY_SMTP_PORT,
				username: settings.smtp_username.clone(),
				password: settings.smtp_password.clone(),
				enable_auth: true,
				starttls: true,
				timeout,
			},
			GlobalRelayCustomerType::Inbucket => Self {
				server: INBUCKET_SMTP_SERVER.into(),
				port: INBUCKET_SMTP_PORT,
				username: String::new(),
				password: String::new(),
				enable_auth: false,
				starttls: false,
				timeout,
			},
			GlobalRelayCustomerType::Custom => Self {
				server: settings.custom_smtp_server_name.clone(),
				port: settings.custom_smtp_port,
				username: settings.smtp_username.clone(),
				password: settings.smtp_password.clone(),
				enable_auth: !settings.smtp_username.is_empty(),
				starttls: false,
				timeout,
			},
		}
	}
}

pub struct SmtpSessionFactory {
	config: SessionConfig,
}

impl SmtpSessionFactory {
	pub fn new(config: SessionConfig) -> Self {
		Self { config }
	}
}

impl SessionFactory for SmtpSessionFactory {
	/// Connect, negotiate STARTTLS, and authenticate once; the returned
	/// session keeps the connection open across `send_eml` calls so the
	/// caller's per-session message cap maps to real SMTP sessions.
	fn open(&self) -> CrResult<Box<dyn RawSession>> {
		let hello_name = ClientId::default();
		debug!("Opening delivery session to {}:{}", self.config.server, self.config.port);
		let mut connection = SmtpConnection::connect(
			(self.config.server.as_str(), self.config.port),
			Some(self.config.timeout),
			&hello_name,
			None,
			None,
		)
		.map_err(|e| {
			Error::Smtp(format!("connect to {}:{} failed: {}", self.config.server, self.config.port, e))
		})?;

		if self.config.starttls {
			let params = TlsParameters::builder(self.config.server.clone())
				.build()
				.map_err(|e| Error::Smtp(format!("tls configuration error: {}", e)))?;
			connection
				.starttls(&params, &hello_name)
				.map_err(|e| Error::Smtp(format!("starttls failed: {}", e)))?;
		}
		if self.config.enable_auth {
			let credentials =
				Credentials::new(self.config.username.clone(), self.config.password.clone());
			connection
				.auth(&[Mechanism::Plain, Mechanism::Login], &credentials)
				.map_err(|e| Error::Smtp(format!("authentication failed: {}", e)))?;
		}

		Ok(Box::new(SmtpSession { connection }))
	}
}

struct SmtpSession {
	connection: SmtpConnection,
}

impl RawSession for SmtpSession {
	fn send_eml(&mut self, from: &str, to: &str, eml: &[u8]) -> CrResult<()> {
		let from: Address = from
			.parse()
			.map_err(|_| Error::Smtp(format!("invalid sender address '{}'", from)))?;
		let to: Address = to
			.parse()
			.map_err(|_| Error::Smtp(format!("invalid delivery address '{}'", to)))?;
		let envelope = Envelope::new(Some(from), vec![to])
			.map_err(|e| Error::Smtp(format!("invalid envelope: {}", e)))?;
		self.connection
			.send(&envelope, eml)
			.map_err(|e| Error::Smtp(format!("delivery failed: {}", e)))?;
		Ok(())
	}
}

impl Drop for SmtpSession {
	fn drop(&mut self) {
		let _ = self.connection.quit();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_profile_a9() {
		let config = SessionConfig::from_global_relay(&GlobalRelaySettings {
			smtp_username: "acct".into(),
			smtp_password: "secret".into(),
			..GlobalRelaySettings::default()
		});
		assert_eq!(config.server, A9_SMTP_SERVER);
		assert_eq!(config.port, 25);
		assert!(config.enable_auth);
		assert!(config.starttls);
	}

	#[test]
	fn test_profile_inbucket_disables_auth() {
		let config = SessionConfig::from_global_relay(&GlobalRelaySettings {
			customer_type: GlobalRelayCustomerType::Inbucket,
			smtp_username: "ignored".into(),
			..GlobalRelaySettings::default()
		});
		assert_eq!(config.server, "localhost");
		assert_eq!(config.port, 10025);
		assert!(!config.enable_auth);
		assert!(!config.starttls);
	}

	#[test]
	fn test_profile_custom() {
		let config = SessionConfig::from_global_relay(&GlobalRelaySettings {
			customer_type: GlobalRelayCustomerType::Custom,
			custom_smtp_server_name: "mail.corp.example".into(),
			custom_smtp_port: 2525,
			..GlobalRelaySettings::default()
		});
		assert_eq!(config.server, "mail.corp.example");
		assert_eq!(config.port, 2525);
		assert!(!config.enable_auth);
	}
}

// vim: ts=4
