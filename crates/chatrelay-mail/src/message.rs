//! Mail message model.

/// One outgoing message. SMTP-RCPT recipients may differ from the MIME `To`
/// header (batch notifications address the user but deliver to the inbox).
#[derive(Debug, Clone, Default)]
pub struct MailMessage {
	/// Overrides the transport's configured sender when set
	pub from: Option<String>,
	/// Fixed `Date` header in epoch milliseconds; defaults to send time
	pub date: Option<i64>,
	/// Envelope recipients (RCPT TO)
	pub smtp_to: Vec<String>,
	/// MIME `To` header; defaults to the envelope recipients when empty
	pub mime_to: Vec<String>,
	pub cc: Vec<String>,
	pub reply_to: Option<String>,
	pub subject: String,
	pub html_body: String,
	/// Derived by stripping the HTML body when absent
	pub text_body: Option<String>,
	/// Inline parts keyed by CID-style name (e.g. `user-avatar-0.png`)
	pub embedded: Vec<(String, Vec<u8>)>,
	/// Attachments by file name
	pub attachments: Vec<(String, Vec<u8>)>,
	pub message_id: Option<String>,
	pub in_reply_to: Option<String>,
	pub references: Option<String>,
	/// Arbitrary extra RFC-5322 headers
	pub extra_headers: Vec<(String, String)>,
}

impl MailMessage {
	pub fn new(to: impl Into<String>, subject: impl Into<String>, html_body: impl Into<String>) -> Self {
		Self {
			smtp_to: vec![to.into()],
			subject: subject.into(),
			html_body: html_body.into(),
			..Default::default()
		}
	}

	pub fn from_address(mut self, address: impl Into<String>) -> Self {
		self.from = Some(address.into());
		self
	}

	pub fn date(mut self, epoch_ms: i64) -> Self {
		self.date = Some(epoch_ms);
		self
	}

	pub fn cc(mut self, address: impl Into<String>) -> Self {
		self.cc.push(address.into());
		self
	}

	pub fn mime_to(mut self, address: impl Into<String>) -> Self {
		self.mime_to.push(address.into());
		self
	}

	pub fn reply_to(mut self, address: impl Into<String>) -> Self {
		self.reply_to = Some(address.into());
		self
	}

	pub fn text_body(mut self, text: impl Into<String>) -> Self {
		self.text_body = Some(text.into());
		self
	}

	pub fn embed(mut self, cid: impl Into<String>, bytes: Vec<u8>) -> Self {
		self.embedded.push((cid.into(), bytes));
		self
	}

	pub fn attach(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
		self.attachments.push((name.into(), bytes));
		self
	}

	pub fn message_id(mut self, id: impl Into<String>) -> Self {
		self.message_id = Some(id.into());
		self
	}

	pub fn in_reply_to(mut self, id: impl Into<String>) -> Self {
		self.in_reply_to = Some(id.into());
		self
	}

	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra_headers.push((name.into(), value.into()));
		self
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_builder_chain() {
		let msg = MailMessage::new("user@example.com", "Hi", "<p>Hi</p>")
			.cc("boss@example.com")
			.reply_to("noreply@example.com")
			.header("X-Test", "1");

		assert_eq!(msg.smtp_to, vec!["user@example.com"]);
		assert_eq!(msg.cc, vec!["boss@example.com"]);
		assert_eq!(msg.reply_to.as_deref(), Some("noreply@example.com"));
		assert_eq!(msg.extra_headers, vec![("X-Test".to_string(), "1".to_string())]);
		assert!(msg.text_body.is_none());
	}
}

// vim: ts=4
