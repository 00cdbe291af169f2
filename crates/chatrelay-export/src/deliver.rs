//! SMTP delivery loop for exported archives.
//!
//! Streams every `.eml` entry of a batch zip through a raw session,
//! recycling the connection after a fixed message count. Any session error
//! aborts the job; partially delivered batches stay on disk, downstream
//! archives are idempotent on message id and content.

use std::io::Read;

use chatrelay_core::config::MAX_EMAILS_PER_CONNECTION;
use chatrelay_mail::SessionFactory;

use crate::prelude::*;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeliveryStats {
	pub messages: usize,
	pub sessions: usize,
}

/// Envelope sender, parsed out of the message's `From` header
fn parse_from_header(eml: &[u8]) -> Option<String> {
	let header_end = eml.windows(4).position(|w| w == b"\r\n\r\n")?;
	let headers = std::str::from_utf8(&eml[..header_end]).ok()?;
	for line in headers.lines() {
		let Some(value) = line.strip_prefix("From:") else {
			continue;
		};
		let value = value.trim();
		// "Name <addr>" or a bare address
		let address = match (value.rfind('<'), value.rfind('>')) {
			(Some(open), Some(close)) if open < close => &value[open + 1..close],
			_ => value,
		};
		return Some(address.to_string());
	}
	None
}

/// Deliver every `.eml` in the zip to the archive inbox, reopening the
/// session after [`MAX_EMAILS_PER_CONNECTION`] messages
pub fn deliver_zip(
	factory: &dyn SessionFactory,
	inbox: &str,
	zip_bytes: &[u8],
) -> CrResult<DeliveryStats> {
	let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes))
		.map_err(|e| Error::ExportIo(format!("failed to open batch zip: {}", e)))?;

	let mut session = factory.open()?;
	let mut stats = DeliveryStats { messages: 0, sessions: 1 };
	let mut on_session = 0;

	for index in 0..archive.len() {
		let mut entry = archive
			.by_index(index)
			.map_err(|e| Error::ExportIo(format!("bad zip entry {}: {}", index, e)))?;
		if !entry.name().ends_with(".eml") {
			continue;
		}

		let mut eml = Vec::with_capacity(entry.size() as usize);
		entry
			.read_to_end(&mut eml)
			.map_err(|e| Error::ExportIo(format!("failed to read {}: {}", entry.name(), e)))?;

		let from = parse_from_header(&eml)
			.ok_or_else(|| Error::Smtp(format!("no From header in {}", entry.name())))?;

		if on_session == MAX_EMAILS_PER_CONNECTION {
			debug!("Recycling delivery session after {} messages", on_session);
			session = factory.open()?;
			stats.sessions += 1;
			on_session = 0;
		}
		session.send_eml(&from, inbox, &eml)?;
		on_session += 1;
		stats.messages += 1;
	}

	info!("Delivered {} messages over {} sessions", stats.messages, stats.sessions);
	Ok(stats)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chatrelay_mail::RawSession;
	use std::sync::{Arc, Mutex};

	#[derive(Default)]
	struct Log {
		opened: usize,
		sent: Vec<(String, String, usize)>,
	}

	struct MockSession {
		log: Arc<Mutex<Log>>,
		session_index: usize,
	}

	impl RawSession for MockSession {
		fn send_eml(&mut self, from: &str, to: &str, _eml: &[u8]) -> CrResult<()> {
			if let Ok(mut log) = self.log.lock() {
				log.sent.push((from.to_string(), to.to_string(), self.session_index));
			}
			Ok(())
		}
	}

	struct MockFactory {
		log: Arc<Mutex<Log>>,
	}

	impl chatrelay_mail::SessionFactory for MockFactory {
		fn open(&self) -> CrResult<Box<dyn RawSession>> {
			let mut log = self.log.lock().map_err(|_| Error::Internal("poisoned".into()))?;
			log.opened += 1;
			Ok(Box::new(MockSession { log: Arc::clone(&self.log), session_index: log.opened }))
		}
	}

	fn zip_with_emls(count: usize) -> Vec<u8> {
		let entries: Vec<(String, Vec<u8>)> = (0..count)
			.map(|i| {
				let eml = format!(
					"From: sender{}@example.com\r\nSubject: x\r\n\r\nbody",
					i
				);
				(format!("channel - (ch1) - {}.eml", i), eml.into_bytes())
			})
			.collect();
		crate::emit::zip_entries(&entries).unwrap()
	}

	#[test]
	fn test_parse_from_header() {
		let eml = b"From: Alice <alice@example.com>\r\nSubject: x\r\n\r\nbody";
		assert_eq!(parse_from_header(eml).as_deref(), Some("alice@example.com"));

		let bare = b"From: bob@example.com\r\n\r\nbody";
		assert_eq!(parse_from_header(bare).as_deref(), Some("bob@example.com"));

		assert_eq!(parse_from_header(b"Subject: x\r\n\r\nbody"), None);
	}

	#[test]
	fn test_session_recycled_after_limit() {
		let log = Arc::new(Mutex::new(Log::default()));
		let factory = MockFactory { log: Arc::clone(&log) };
		let zip = zip_with_emls(401);

		let stats = deliver_zip(&factory, "archive@globalrelay.example", &zip).unwrap();

		assert_eq!(stats, DeliveryStats { messages: 401, sessions: 2 });
		let log = log.lock().unwrap();
		assert_eq!(log.opened, 2);
		// message 401 goes out on the second session
		assert_eq!(log.sent[400].2, 2);
		assert_eq!(log.sent[399].2, 1);
		assert!(log.sent.iter().all(|(_, to, _)| to == "archive@globalrelay.example"));
	}

	#[test]
	fn test_single_session_under_limit() {
		let log = Arc::new(Mutex::new(Log::default()));
		let factory = MockFactory { log: Arc::clone(&log) };
		let zip = zip_with_emls(3);

		let stats = deliver_zip(&factory, "inbox@example.com", &zip).unwrap();
		assert_eq!(stats, DeliveryStats { messages: 3, sessions: 1 });
	}
}

// vim: ts=4
