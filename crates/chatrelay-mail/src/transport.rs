//! SMTP transport using lettre.
//!
//! Builds a full MIME message (multipart/alternative, multipart/related for
//! inline parts, multipart/mixed for attachments) and sends it over one
//! connection configured for TLS, STARTTLS, or plain per config.

use std::time::Duration;

use base64::Engine;
use lettre::address::Envelope;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use lettre::transport::smtp::SmtpTransport;
use lettre::{Address, Transport};
use rand::distr::{Alphanumeric, SampleString};

use chatrelay_core::config::{ConnectionSecurity, EmailSettings};

use crate::message::MailMessage;
use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
	pub server: String,
	pub port: u16,
	pub username: String,
	pub password: String,
	pub connection_security: ConnectionSecurity,
	pub enable_auth: bool,
	pub skip_cert_verification: bool,
	pub timeout: Duration,
	/// EHLO hostname, also used in synthetic Message-IDs
	pub hostname: String,
	pub from_name: String,
	pub from_email: String,
	pub reply_to: Option<String>,
}

impl SmtpConfig {
	pub fn from_email_settings(settings: &EmailSettings, hostname: impl Into<String>) -> Self {
		Self {
			server: settings.smtp_server.clone(),
			port: settings.smtp_port,
			username: settings.smtp_username.clone(),
			password: settings.smtp_password.clone(),
			connection_security: settings.connection_security,
			enable_auth: settings.enable_smtp_auth,
			skip_cert_verification: settings.skip_server_certificate_verification,
			timeout: Duration::from_secs(settings.smtp_server_timeout),
			hostname: hostname.into(),
			from_name: settings.feedback_name.clone(),
			from_email: settings.feedback_email.clone(),
			reply_to: if settings.reply_to_address.is_empty() {
				None
			} else {
				Some(settings.reply_to_address.clone())
			},
		}
	}
}

/// RFC-2047 B-encode a header value when it is not plain ASCII
pub fn encode_header_value(value: &str) -> String {
	if value.is_ascii() {
		value.to_string()
	} else {
		let encoded = base64::engine::general_purpose::STANDARD.encode(value.as_bytes());
		format!("=?utf-8?B?{}?=", encoded)
	}
}

/// Synthetic Message-ID: `<random16-unixts@hostname>`
pub fn generate_message_id(hostname: &str, now: Timestamp) -> String {
	let random = Alphanumeric.sample_string(&mut rand::rng(), 16);
	format!("<{}-{}@{}>", random, now.0 / 1000, hostname)
}

pub struct MailTransport {
	config: SmtpConfig,
}

impl MailTransport {
	pub fn new(config: SmtpConfig) -> Self {
		Self { config }
	}

	/// Send one message. No retries; all failures surface to the caller.
	pub fn send(&self, msg: &MailMessage) -> CrResult<()> {
		let bytes = self.render(msg, chatrelay_types::types::now())?;
		let envelope = self.envelope(msg)?;

		let mailer = self.open()?;
		mailer
			.send_raw(&envelope, &bytes)
			.map_err(|e| Error::SendMail(format!("smtp send to {:?} failed: {}", msg.smtp_to, e)))?;
		debug!("Sent mail to {:?}: {}", msg.smtp_to, msg.subject);
		Ok(())
	}

	fn envelope(&self, msg: &MailMessage) -> CrResult<Envelope> {
		let from: Address = msg
			.from
			.as_deref()
			.unwrap_or(&self.config.from_email)
			.parse()
			.map_err(|_| Error::ValidationError("invalid from address".into()))?;
		let mut rcpt = Vec::with_capacity(msg.smtp_to.len() + msg.cc.len());
		for to in msg.smtp_to.iter().chain(msg.cc.iter()) {
			rcpt.push(
				to.parse()
					.map_err(|_| Error::ValidationError(format!("invalid recipient '{}'", to)))?,
			);
		}
		Envelope::new(Some(from), rcpt)
			.map_err(|e| Error::ValidationError(format!("invalid envelope: {}", e)))
	}

	/// Render the message to RFC-2822 bytes, including extra headers
	pub fn render(&self, msg: &MailMessage, now: Timestamp) -> CrResult<Vec<u8>> {
		let from: Mailbox = match &msg.from {
			Some(address) => address
				.parse()
				.map_err(|_| Error::ValidationError("invalid from mailbox".into()))?,
			None => format!("{} <{}>", self.config.from_name, self.config.from_email)
				.parse()
				.map_err(|_| Error::ValidationError("invalid from mailbox".into()))?,
		};

		let mut builder = Message::builder().from(from).subject(&msg.subject);
		if let Some(date) = msg.date {
			let date = std::time::UNIX_EPOCH + std::time::Duration::from_millis(date.max(0) as u64);
			builder = builder.date(date);
		}

		let mime_to = if msg.mime_to.is_empty() { &msg.smtp_to } else { &msg.mime_to };
		for to in mime_to {
			builder = builder.to(to
				.parse()
				.map_err(|_| Error::ValidationError(format!("invalid To '{}'", to)))?);
		}
		for cc in &msg.cc {
			builder = builder.cc(cc
				.parse()
				.map_err(|_| Error::ValidationError(format!("invalid Cc '{}'", cc)))?);
		}
		let reply_to = msg.reply_to.as_ref().or(self.config.reply_to.as_ref());
		if let Some(reply_to) = reply_to {
			builder = builder.reply_to(
				reply_to
					.parse()
					.map_err(|_| Error::ValidationError("invalid reply-to".into()))?,
			);
		}

		let message_id = msg
			.message_id
			.clone()
			.unwrap_or_else(|| generate_message_id(&self.config.hostname, now));
		builder = builder.message_id(Some(message_id));
		if let Some(in_reply_to) = &msg.in_reply_to {
			builder = builder.in_reply_to(in_reply_to.clone());
		}
		if let Some(references) = &msg.references {
			builder = builder.references(references.clone());
		}

		let email = builder
			.multipart(Self::build_body(msg)?)
			.map_err(|e| Error::ValidationError(format!("failed to build message: {}", e)))?;

		Ok(splice_headers(email.formatted(), &msg.extra_headers))
	}

	fn build_body(msg: &MailMessage) -> CrResult<MultiPart> {
		let text = msg.text_body.clone().unwrap_or_else(|| crate::html_to_text(&msg.html_body));

		let mut alternative = MultiPart::alternative().singlepart(SinglePart::plain(text));
		if msg.embedded.is_empty() {
			alternative = alternative.singlepart(SinglePart::html(msg.html_body.clone()));
		} else {
			let mut related =
				MultiPart::related().singlepart(SinglePart::html(msg.html_body.clone()));
			for (cid, bytes) in &msg.embedded {
				related = related
					.singlepart(Attachment::new_inline(cid.clone()).body(
						bytes.clone(),
						content_type_for(cid)?,
					));
			}
			alternative = alternative.multipart(related);
		}

		if msg.attachments.is_empty() {
			return Ok(alternative);
		}

		let mut mixed = MultiPart::mixed().multipart(alternative);
		for (name, bytes) in &msg.attachments {
			mixed = mixed.singlepart(
				Attachment::new(name.clone()).body(bytes.clone(), content_type_for(name)?),
			);
		}
		Ok(mixed)
	}

	fn open(&self) -> CrResult<SmtpTransport> {
		let tls = match self.config.connection_security {
			ConnectionSecurity::Tls => Tls::Wrapper(self.tls_parameters()?),
			ConnectionSecurity::Starttls => Tls::Required(self.tls_parameters()?),
			ConnectionSecurity::None => Tls::None,
		};

		let mut builder = SmtpTransport::builder_dangerous(&self.config.server)
			.port(self.config.port)
			.timeout(Some(self.config.timeout))
			.hello_name(ClientId::Domain(self.config.hostname.clone()))
			.tls(tls);

		if self.config.enable_auth {
			// PLAIN when offered, LOGIN otherwise; lettre refuses LOGIN on
			// an unencrypted channel
			builder = builder
				.credentials(Credentials::new(
					self.config.username.clone(),
					self.config.password.clone(),
				))
				.authentication(vec![Mechanism::Plain, Mechanism::Login]);
		}

		Ok(builder.build())
	}

	fn tls_parameters(&self) -> CrResult<TlsParameters> {
		let mut builder = TlsParameters::builder(self.config.server.clone());
		if self.config.skip_cert_verification {
			builder = builder.dangerous_accept_invalid_certs(true);
		}
		builder.build().map_err(|e| Error::Smtp(format!("tls configuration error: {}", e)))
	}
}

fn content_type_for(name: &str) -> CrResult<ContentType> {
	let mime = match name.rsplit('.').next() {
		Some("png") => "image/png",
		Some("jpg" | "jpeg") => "image/jpeg",
		Some("gif") => "image/gif",
		Some("txt") => "text/plain",
		Some("pdf") => "application/pdf",
		_ => "application/octet-stream",
	};
	ContentType::parse(mime).map_err(|e| Error::Internal(format!("bad content type: {}", e)))
}

/// Insert extra headers just before the end of the header block.
/// Non-ASCII values are RFC-2047 B-encoded.
fn splice_headers(bytes: Vec<u8>, extras: &[(String, String)]) -> Vec<u8> {
	if extras.is_empty() {
		return bytes;
	}
	let Some(split) = bytes.windows(4).position(|w| w == b"\r\n\r\n") else {
		return bytes;
	};
	let mut out = Vec::with_capacity(bytes.len() + extras.len() * 32);
	out.extend_from_slice(&bytes[..split + 2]);
	for (name, value) in extras {
		out.extend_from_slice(name.as_bytes());
		out.extend_from_slice(b": ");
		out.extend_from_slice(encode_header_value(value).as_bytes());
		out.extend_from_slice(b"\r\n");
	}
	out.extend_from_slice(&bytes[split + 2..]);
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_config() -> SmtpConfig {
		SmtpConfig {
			server: "localhost".into(),
			port: 10025,
			username: String::new(),
			password: String::new(),
			connection_security: ConnectionSecurity::None,
			enable_auth: false,
			skip_cert_verification: false,
			timeout: Duration::from_secs(10),
			hostname: "chat.example.com".into(),
			from_name: "Chatrelay".into(),
			from_email: "noreply@example.com".into(),
			reply_to: None,
		}
	}

	#[test]
	fn test_message_id_shape() {
		let id = generate_message_id("chat.example.com", Timestamp(1_700_000_000_000));
		assert!(id.starts_with('<'));
		assert!(id.ends_with("@chat.example.com>"));
		let inner = &id[1..id.len() - ">@chat.example.com".len() - 1];
		let (random, ts) = inner.split_once('-').unwrap();
		assert_eq!(random.len(), 16);
		assert_eq!(ts, "1700000000");
	}

	#[test]
	fn test_encode_header_value() {
		assert_eq!(encode_header_value("plain"), "plain");
		let encoded = encode_header_value("csatorna – név");
		assert!(encoded.starts_with("=?utf-8?B?"));
		assert!(encoded.ends_with("?="));
	}

	#[test]
	fn test_render_multipart_alternative() {
		let transport = MailTransport::new(test_config());
		let msg = MailMessage::new("user@example.com", "Subject", "<p>Hello <b>you</b></p>");
		let bytes = transport.render(&msg, Timestamp(0)).unwrap();
		let rendered = String::from_utf8_lossy(&bytes);

		assert!(rendered.contains("multipart/alternative"));
		assert!(rendered.contains("text/plain"));
		assert!(rendered.contains("text/html"));
		assert!(rendered.contains("Message-ID:"));
	}

	#[test]
	fn test_render_with_inline_part_uses_related() {
		let transport = MailTransport::new(test_config());
		let msg = MailMessage::new("user@example.com", "S", "<img src=\"cid:user-avatar-0.png\">")
			.embed("user-avatar-0.png", vec![0x89, 0x50, 0x4e, 0x47]);
		let bytes = transport.render(&msg, Timestamp(0)).unwrap();
		let rendered = String::from_utf8_lossy(&bytes);

		assert!(rendered.contains("multipart/related"));
		assert!(rendered.contains("image/png"));
	}

	#[test]
	fn test_render_extra_headers_spliced() {
		let transport = MailTransport::new(test_config());
		let msg = MailMessage::new("user@example.com", "S", "<p>x</p>")
			.header("Auto-Submitted", "auto-generated")
			.header("Precedence", "bulk");
		let bytes = transport.render(&msg, Timestamp(0)).unwrap();
		let rendered = String::from_utf8_lossy(&bytes);

		let headers_end = rendered.find("\r\n\r\n").unwrap();
		let headers = &rendered[..headers_end];
		assert!(headers.contains("Auto-Submitted: auto-generated"));
		assert!(headers.contains("Precedence: bulk"));
	}

	#[test]
	fn test_explicit_message_id_preserved() {
		let transport = MailTransport::new(test_config());
		let msg = MailMessage::new("user@example.com", "S", "<p>x</p>")
			.message_id("<fixed@example.com>");
		let bytes = transport.render(&msg, Timestamp(0)).unwrap();
		assert!(String::from_utf8_lossy(&bytes).contains("<fixed@example.com>"));
	}
}

// vim: ts=4
