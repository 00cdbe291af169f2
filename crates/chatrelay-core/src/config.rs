//! Configuration model.
//!
//! Mirrors the host chat server's settings blocks; only the options the
//! notification and export engines react to are modelled here.

use serde::{Deserialize, Serialize};

/// Default per-user batching interval when the preference is missing or
/// unparsable (15 minutes)
pub const PREFERENCE_EMAIL_INTERVAL_BATCHING_SECONDS: i64 = 900;

/// Default cap on one exported channel sub-batch (250 MiB); overridable for
/// tests through `MessageExportSettings::max_email_bytes`
pub const MAX_EMAIL_BYTES: i64 = 250 * 1024 * 1024;

/// Messages sent over one SMTP session before it is recycled
pub const MAX_EMAILS_PER_CONNECTION: usize = 400;

/// Progress-estimation fallback when the post count query fails
pub const ESTIMATED_POST_COUNT: i64 = 10_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSecurity {
	#[default]
	None,
	Tls,
	Starttls,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailNotificationContents {
	#[default]
	Full,
	Generic,
}

/// Server-level collapsed-reply-threads mode; an explicit user preference
/// overrides `DefaultOn` / `DefaultOff`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollapsedThreads {
	AlwaysOn,
	DefaultOn,
	#[default]
	DefaultOff,
	Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
	pub enable_email_batching: bool,
	/// Capacity of the bounded ingress queue; not changeable without restart
	pub email_batching_buffer_size: usize,
	/// Period of the flush task, seconds
	pub email_batching_interval: u64,
	pub send_email_notifications: bool,
	pub require_email_verification: bool,
	pub email_notification_contents_type: EmailNotificationContents,
	pub feedback_name: String,
	pub feedback_email: String,
	pub reply_to_address: String,
	pub feedback_organization: String,
	pub smtp_server: String,
	pub smtp_port: u16,
	pub smtp_username: String,
	pub smtp_password: String,
	pub connection_security: ConnectionSecurity,
	pub enable_smtp_auth: bool,
	pub skip_server_certificate_verification: bool,
	/// SMTP server timeout, seconds
	pub smtp_server_timeout: u64,
}

impl Default for EmailSettings {
	fn default() -> Self {
		Self {
			enable_email_batching: false,
			email_batching_buffer_size: 256,
			email_batching_interval: 30,
			send_email_notifications: true,
			require_email_verification: false,
			email_notification_contents_type: EmailNotificationContents::Full,
			feedback_name: String::new(),
			feedback_email: String::new(),
			reply_to_address: String::new(),
			feedback_organization: String::new(),
			smtp_server: "localhost".into(),
			smtp_port: 10025,
			smtp_username: String::new(),
			smtp_password: String::new(),
			connection_security: ConnectionSecurity::None,
			enable_smtp_auth: false,
			skip_server_certificate_verification: false,
			smtp_server_timeout: 10,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
	/// Base URL used in every rendered link
	pub site_url: String,
	pub collapsed_threads: CollapsedThreads,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamSettings {
	/// Brand name used in subjects
	pub site_name: String,
}

impl Default for TeamSettings {
	fn default() -> Self {
		Self { site_name: "Chatrelay".into() }
	}
}

/// Export-delivery profile. `A9` / `A10` carry fixed GlobalRelay endpoints;
/// `Inbucket` is the auth-less test harness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GlobalRelayCustomerType {
	#[default]
	A9,
	A10,
	Inbucket,
	Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalRelaySettings {
	pub customer_type: GlobalRelayCustomerType,
	/// The archive inbox every exported message is addressed to
	pub email_address: String,
	pub smtp_username: String,
	pub smtp_password: String,
	/// SMTP server timeout, seconds
	pub smtp_server_timeout: u64,
	pub custom_smtp_server_name: String,
	pub custom_smtp_port: u16,
}

impl Default for GlobalRelaySettings {
	fn default() -> Self {
		Self {
			customer_type: GlobalRelayCustomerType::A9,
			email_address: String::new(),
			smtp_username: String::new(),
			smtp_password: String::new(),
			smtp_server_timeout: 1800,
			custom_smtp_server_name: String::new(),
			custom_smtp_port: 25,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageExportSettings {
	/// `globalrelay` (SMTP delivery) or `globalrelay-zip` (archive only)
	pub export_format: String,
	pub export_dir: String,
	pub batch_size: usize,
	pub channel_batch_size: usize,
	pub channel_history_batch_size: usize,
	/// Sub-batch weight cap; defaults to [`MAX_EMAIL_BYTES`]
	pub max_email_bytes: i64,
	pub global_relay: GlobalRelaySettings,
}

impl Default for MessageExportSettings {
	fn default() -> Self {
		Self {
			export_format: "globalrelay-zip".into(),
			export_dir: String::new(),
			batch_size: 10_000,
			channel_batch_size: 100,
			channel_history_batch_size: 10,
			max_email_bytes: MAX_EMAIL_BYTES,
			global_relay: GlobalRelaySettings::default(),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSettings {
	pub dedicated_export_store: bool,
	pub export_driver_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	pub email: EmailSettings,
	pub service: ServiceSettings,
	pub team: TeamSettings,
	pub message_export: MessageExportSettings,
	pub file: FileSettings,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = Config::default();
		assert!(!config.email.enable_email_batching);
		assert_eq!(config.email.email_batching_buffer_size, 256);
		assert_eq!(config.message_export.max_email_bytes, MAX_EMAIL_BYTES);
		assert_eq!(config.message_export.global_relay.customer_type, GlobalRelayCustomerType::A9);
	}

	#[test]
	fn test_deserialize_partial() {
		let config: Config = serde_json::from_str(
			r#"{
				"email": {
					"enable_email_batching": true,
					"email_batching_interval": 60,
					"connection_security": "starttls"
				},
				"service": { "collapsed_threads": "always_on" }
			}"#,
		)
		.unwrap();
		assert!(config.email.enable_email_batching);
		assert_eq!(config.email.email_batching_interval, 60);
		assert_eq!(config.email.connection_security, ConnectionSecurity::Starttls);
		assert_eq!(config.service.collapsed_threads, CollapsedThreads::AlwaysOn);
		// untouched blocks keep their defaults
		assert_eq!(config.email.smtp_port, 10025);
	}
}

// vim: ts=4
