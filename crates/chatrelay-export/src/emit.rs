//! Export emitter.
//!
//! Packs classified records per channel into size-bounded sub-batches,
//! renders each sub-batch to an `.eml` through the compliance templates,
//! and packs all of them into one zip per export batch.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncReadExt;
use zip::write::SimpleFileOptions;

use chatrelay_mail::{html_to_text, MailMessage, MailTransport};
use chatrelay_templates::{TemplateContainer, TemplateData};
use chatrelay_types::backend::FileAttachmentBackend;
use chatrelay_types::channel::{Channel, ChannelType};

use crate::classify::{PostExport, UpdatedType};
use crate::metadata::{JoinEvent, LeaveEvent};
use crate::prelude::*;

pub const TEMPLATE_EXPORT: &str = "globalrelay_compliance_export";
pub const TEMPLATE_PARTICIPANT_ROW: &str = "globalrelay_compliance_export_participant_row";
pub const TEMPLATE_MESSAGE: &str = "globalrelay_compliance_export_message";

#[derive(Debug, Clone)]
pub struct Participant {
	pub username: String,
	pub user_email: String,
	pub user_type: crate::classify::UserType,
	pub join_time: Timestamp,
	pub leave_time: Timestamp,
	pub messages_sent: i64,
}

/// One size-bounded sub-batch of a channel's records
#[derive(Debug, Clone, Default)]
pub struct ChannelExport {
	pub channel_id: String,
	pub channel_name: String,
	pub display_name: String,
	pub channel_type: ChannelType,
	pub start_time: Timestamp,
	pub end_time: Timestamp,
	pub posts: Vec<PostExport>,
	/// Cumulative weight of the packed records
	pub bytes: i64,
	/// Posts whose attachments alone exceeded the cap
	pub oversized_post_ids: Vec<String>,
	pub num_user_messages: HashMap<String, i64>,
	pub joins: Vec<JoinEvent>,
	pub leaves: Vec<LeaveEvent>,
	pub participants: Vec<Participant>,
}

impl ChannelExport {
	fn for_channel(channel: &Channel, start: Timestamp, end: Timestamp) -> Self {
		Self {
			channel_id: channel.id.clone(),
			channel_name: channel.name.clone(),
			display_name: channel.display_name.clone(),
			channel_type: channel.channel_type,
			start_time: start,
			end_time: end,
			..Self::default()
		}
	}
}

fn attachment_bytes(record: &PostExport) -> i64 {
	record.attachment_creates.iter().map(|f| f.size).sum()
}

/// Pack classified records into per-channel sub-batches bounded by
/// `max_email_bytes`. A post whose attachments alone exceed the cap keeps
/// its place but has the attachment bytes reported as removed instead of
/// counted.
pub fn pack_posts(
	records: Vec<PostExport>,
	channels: &HashMap<String, Channel>,
	start: Timestamp,
	end: Timestamp,
	max_email_bytes: i64,
) -> HashMap<String, Vec<ChannelExport>> {
	let mut all_exports: HashMap<String, Vec<ChannelExport>> = HashMap::new();

	for mut record in records {
		let channel = channels.get(&record.channel_id).cloned().unwrap_or_else(|| Channel {
			id: record.channel_id.clone(),
			..Channel::default()
		});
		let batches = all_exports
			.entry(record.channel_id.clone())
			.or_insert_with(|| vec![ChannelExport::for_channel(&channel, start, end)]);

		let mut weight = record.message.len() as i64;
		let attach_bytes = attachment_bytes(&record);
		if attach_bytes > max_email_bytes {
			warn!(
				"Attachments of post {} exceed the batch cap ({} bytes), reporting as removed",
				record.post_id, attach_bytes
			);
			record.attachments_removed = true;
		} else {
			weight += attach_bytes;
		}

		if batches
			.last()
			.is_some_and(|b| b.bytes + weight > max_email_bytes && !b.posts.is_empty())
		{
			batches.push(ChannelExport::for_channel(&channel, start, end));
		}
		let Some(current) = batches.last_mut() else {
			continue;
		};

		if record.attachments_removed {
			current.oversized_post_ids.push(record.post_id.clone());
		}
		if record.updated_type != UpdatedType::FileDeleted {
			*current.num_user_messages.entry(record.user_id.clone()).or_insert(0) += 1;
		}
		current.bytes += weight;
		current.posts.push(record);
	}

	all_exports
}

/// Derive the participant list from the channel's join events and the
/// batch's per-user message tallies, sorted by username
pub fn compute_participants(batch: &mut ChannelExport) {
	let mut participants: Vec<Participant> = batch
		.joins
		.iter()
		.map(|join| {
			let leave_time = batch
				.leaves
				.iter()
				.filter(|l| l.user_id == join.user_id && l.leave_time >= join.join_time)
				.map(|l| l.leave_time)
				.min()
				.unwrap_or(batch.end_time);
			Participant {
				username: join.username.clone(),
				user_email: join.user_email.clone(),
				user_type: join.user_type,
				join_time: join.join_time,
				leave_time,
				messages_sent: batch.num_user_messages.get(&join.user_id).copied().unwrap_or(0),
			}
		})
		.collect();
	participants.sort_by(|a, b| a.username.cmp(&b.username));
	batch.participants = participants;
}

/// One rendered message row of the export body
struct MessageRow {
	sent_time: Timestamp,
	username: String,
	user_email: String,
	user_type: &'static str,
	message: String,
	updated_type: &'static str,
	preview_post_id: Option<String>,
}

fn is_plain_message(row: &MessageRow) -> bool {
	row.updated_type.is_empty()
		&& !row.message.starts_with("Uploaded file")
		&& !row.message.starts_with("Deleted file")
}

fn message_rows(batch: &ChannelExport) -> Vec<MessageRow> {
	let mut rows = Vec::new();
	for post in &batch.posts {
		rows.push(MessageRow {
			sent_time: post.sent_time,
			username: post.username.clone(),
			user_email: post.user_email.clone(),
			user_type: post.user_type.as_str(),
			message: post.message.clone(),
			updated_type: post.updated_type.as_str(),
			preview_post_id: post.preview_post_id.clone(),
		});
		for file in &post.attachment_creates {
			let message = if post.attachments_removed {
				format!(
					"Uploaded file {} (id {}) was removed because it was too large to send",
					file.name, file.id
				)
			} else {
				format!("Uploaded file {} (id {})", file.name, file.id)
			};
			rows.push(MessageRow {
				sent_time: post.sent_time,
				username: post.username.clone(),
				user_email: post.user_email.clone(),
				user_type: post.user_type.as_str(),
				message,
				updated_type: "",
				preview_post_id: None,
			});
		}
	}
	// sent time ascending; plain chat messages precede file and update
	// records at the same instant
	rows.sort_by(|a, b| {
		a.sent_time
			.cmp(&b.sent_time)
			.then_with(|| is_plain_message(b).cmp(&is_plain_message(a)))
	});
	rows
}

pub struct Emitter {
	templates: Arc<TemplateContainer>,
	attachments: Arc<dyn FileAttachmentBackend>,
	transport: Arc<MailTransport>,
}

impl Emitter {
	pub fn new(
		templates: Arc<TemplateContainer>,
		attachments: Arc<dyn FileAttachmentBackend>,
		transport: Arc<MailTransport>,
	) -> Self {
		Self { templates, attachments, transport }
	}

	/// Render one sub-batch to a full `.eml` byte buffer.
	/// Attachment read failures are logged, counted, and skipped.
	pub async fn render_eml(
		&self,
		batch: &ChannelExport,
		warning_count: &mut i64,
	) -> CrResult<Vec<u8>> {
		let mut participant_rows = String::new();
		for p in &batch.participants {
			let data = TemplateData::new()
				.with_prop("username", p.username.as_str())
				.with_prop("email", p.user_email.as_str())
				.with_prop("user_type", p.user_type.as_str())
				.with_prop("joined", p.join_time.to_rfc3339())
				.with_prop("left", p.leave_time.to_rfc3339())
				.with_prop("messages_sent", p.messages_sent);
			participant_rows.push_str(&self.templates.render(TEMPLATE_PARTICIPANT_ROW, &data)?);
		}

		let mut rendered_messages = String::new();
		for row in message_rows(batch) {
			let data = TemplateData::new()
				.with_prop("sent_time", row.sent_time.to_rfc3339())
				.with_prop("username", row.username.as_str())
				.with_prop("email", row.user_email.as_str())
				.with_prop("user_type", row.user_type)
				.with_prop("message", row.message.as_str())
				.with_prop("updated_type", row.updated_type)
				.with_prop(
					"preview_post_id",
					row.preview_post_id.as_deref().map(Value::from).unwrap_or(Value::Null),
				);
			match self.templates.render(TEMPLATE_MESSAGE, &data) {
				Ok(rendered) => rendered_messages.push_str(&rendered),
				Err(err) => {
					warn!("Skipping export message row: {}", err);
					*warning_count += 1;
				}
			}
		}

		let data = TemplateData::new()
			.with_prop("channel_name", batch.channel_name.as_str())
			.with_prop("display_name", batch.display_name.as_str())
			.with_prop("channel_type", batch.channel_type.as_str())
			.with_prop("start_time", batch.start_time.to_rfc3339())
			.with_prop("end_time", batch.end_time.to_rfc3339())
			.with_prop("message_count", batch.posts.len() as i64)
			.with_html("participant_rows", participant_rows)
			.with_html("message_rows", rendered_messages);
		let html_body = self.templates.render(TEMPLATE_EXPORT, &data)?;
		let text_body = html_to_text(&html_body);

		let from = batch
			.participants
			.first()
			.map(|p| p.user_email.clone())
			.unwrap_or_else(|| "unknown@localhost".to_string());

		let mut message =
			MailMessage::new(&from, format!("Mattermost Compliance Export: {}", batch.display_name), html_body)
				.text_body(text_body)
				.from_address(from.clone())
				.date(batch.end_time.0)
				.header("Auto-Submitted", "auto-generated")
				.header("Precedence", "bulk")
				.header("Content-Transfer-Encoding", "8bit")
				.header("X-GlobalRelay-MsgType", "Mattermost")
				.header("X-Mattermost-ChannelName", batch.display_name.clone())
				.header("X-Mattermost-ChannelID", batch.channel_id.clone())
				.header("X-Mattermost-ChannelType", batch.channel_type.as_str());
		message.smtp_to = batch.participants.iter().map(|p| p.user_email.clone()).collect();
		if message.smtp_to.is_empty() {
			message.smtp_to.push(from);
		}

		for post in &batch.posts {
			if post.attachments_removed {
				continue;
			}
			for file in &post.attachment_creates {
				match self.read_attachment(&file.path).await {
					Ok(bytes) => message = message.attach(file.name.clone(), bytes),
					Err(err) => {
						warn!("Failed to read attachment {}: {}", file.path, err);
						*warning_count += 1;
					}
				}
			}
		}

		self.transport.render(&message, chatrelay_types::types::now())
	}

	async fn read_attachment(&self, path: &str) -> CrResult<Vec<u8>> {
		let mut reader = self.attachments.reader(path).await?;
		let mut bytes = Vec::new();
		reader
			.read_to_end(&mut bytes)
			.await
			.map_err(|e| Error::ExportIo(format!("failed to read {}: {}", path, e)))?;
		Ok(bytes)
	}
}

/// Zip entry name for one sub-batch
pub fn eml_entry_name(batch: &ChannelExport, batch_index: usize) -> String {
	format!("{} - ({}) - {}.eml", batch.display_name, batch.channel_id, batch_index)
}

/// Pack named `.eml` buffers into one zip archive
pub fn zip_entries(entries: &[(String, Vec<u8>)]) -> CrResult<Vec<u8>> {
	let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
	let options = SimpleFileOptions::default();
	for (name, bytes) in entries {
		writer
			.start_file(name, options)
			.map_err(|e| Error::ExportIo(format!("zip entry '{}': {}", name, e)))?;
		writer.write_all(bytes).map_err(|e| Error::ExportIo(format!("zip write: {}", e)))?;
	}
	let cursor =
		writer.finish().map_err(|e| Error::ExportIo(format!("zip finish: {}", e)))?;
	Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chatrelay_mail::SmtpConfig;
	use chatrelay_types::backend::AttachmentReader;
	use chatrelay_types::post::FileInfo;

	fn record(id: &str, user: &str, message: &str, attachment_size: i64) -> PostExport {
		let mut record = PostExport {
			post_id: id.into(),
			channel_id: "ch1".into(),
			user_id: user.into(),
			user_email: format!("{}@example.com", user),
			username: user.into(),
			message: message.into(),
			sent_time: Timestamp(100),
			update_at: Timestamp(100),
			..PostExport::default()
		};
		if attachment_size > 0 {
			record.attachment_creates.push(FileInfo {
				id: format!("file-{}", id),
				post_id: id.into(),
				path: format!("data/{}.bin", id),
				name: format!("{}.bin", id),
				size: attachment_size,
				delete_at: None,
			});
		}
		record
	}

	fn town_square() -> HashMap<String, Channel> {
		let mut channels = HashMap::new();
		channels.insert(
			"ch1".to_string(),
			Channel {
				id: "ch1".into(),
				name: "town-square".into(),
				display_name: "Town Square".into(),
				channel_type: ChannelType::Public,
				team_id: None,
			},
		);
		channels
	}

	#[test]
	fn test_size_bounded_sub_batching() {
		let records: Vec<PostExport> =
			(0..5).map(|i| record(&format!("p{}", i), "alice", "", 400)).collect();

		let exports =
			pack_posts(records, &town_square(), Timestamp(0), Timestamp(1000), 1024);

		let batches = &exports["ch1"];
		assert_eq!(batches.len(), 3);
		assert_eq!(batches[0].posts.len(), 2);
		assert_eq!(batches[1].posts.len(), 2);
		assert_eq!(batches[2].posts.len(), 1);
	}

	#[test]
	fn test_oversized_attachments_reported_not_counted() {
		let records = vec![record("big", "alice", "hi", 5000), record("ok", "alice", "hi", 100)];

		let exports =
			pack_posts(records, &town_square(), Timestamp(0), Timestamp(1000), 1024);

		let batches = &exports["ch1"];
		assert_eq!(batches.len(), 1);
		assert_eq!(batches[0].oversized_post_ids, vec!["big"]);
		assert!(batches[0].posts[0].attachments_removed);
		// only the messages and the small attachment count
		assert_eq!(batches[0].bytes, 2 + 2 + 100);
	}

	#[test]
	fn test_participants_sorted_with_tallies() {
		let mut batch = ChannelExport {
			end_time: Timestamp(1000),
			..ChannelExport::default()
		};
		for (user, join) in [("zed", 10), ("amy", 20)] {
			batch.joins.push(JoinEvent {
				user_id: user.into(),
				username: user.into(),
				user_email: format!("{}@example.com", user),
				user_type: crate::classify::UserType::User,
				join_time: Timestamp(join),
			});
		}
		batch.num_user_messages.insert("zed".into(), 3);

		compute_participants(&mut batch);

		assert_eq!(batch.participants.len(), 2);
		assert_eq!(batch.participants[0].username, "amy");
		assert_eq!(batch.participants[0].messages_sent, 0);
		assert_eq!(batch.participants[0].leave_time, Timestamp(1000));
		assert_eq!(batch.participants[1].username, "zed");
		assert_eq!(batch.participants[1].messages_sent, 3);
	}

	#[test]
	fn test_message_rows_tie_break() {
		let mut batch = ChannelExport::default();
		let mut upload = record("p1", "alice", "", 10);
		upload.message = String::new();
		let mut edit = record("p2", "bob", "fixed typo", 0);
		edit.updated_type = UpdatedType::EditedNewMsg;
		let plain = record("p3", "carol", "hello", 0);
		batch.posts = vec![upload, edit, plain];

		let rows = message_rows(&batch);

		// all rows share sent_time 100; the plain chat message sorts first
		assert_eq!(rows[0].username, "carol");
		assert!(rows.iter().any(|r| r.message.starts_with("Uploaded file p1.bin")));
	}

	struct NoAttachments;

	#[async_trait]
	impl FileAttachmentBackend for NoAttachments {
		async fn reader(&self, path: &str) -> CrResult<AttachmentReader> {
			Err(Error::ExportIo(format!("missing {}", path)))
		}
	}

	fn export_templates() -> TemplateContainer {
		let container = TemplateContainer::empty();
		container
			.register(
				TEMPLATE_EXPORT,
				"<h1>{{props.display_name}}</h1><table>{{{html.participant_rows}}}</table>\
				 <table>{{{html.message_rows}}}</table>",
			)
			.unwrap();
		container
			.register(TEMPLATE_PARTICIPANT_ROW, "<tr><td>{{props.username}}</td></tr>")
			.unwrap();
		container
			.register(TEMPLATE_MESSAGE, "<tr><td>{{props.message}}</td></tr>")
			.unwrap();
		container
	}

	#[tokio::test]
	async fn test_render_eml_headers_and_warnings() {
		let transport = Arc::new(MailTransport::new(SmtpConfig {
			server: "localhost".into(),
			port: 10025,
			username: String::new(),
			password: String::new(),
			connection_security: chatrelay_core::config::ConnectionSecurity::None,
			enable_auth: false,
			skip_cert_verification: false,
			timeout: std::time::Duration::from_secs(10),
			hostname: "chat.example.com".into(),
			from_name: "Chatrelay".into(),
			from_email: "noreply@example.com".into(),
			reply_to: None,
		}));
		let emitter =
			Emitter::new(Arc::new(export_templates()), Arc::new(NoAttachments), transport);

		let records = vec![record("p1", "alice", "hello", 10)];
		let mut exports =
			pack_posts(records, &town_square(), Timestamp(0), Timestamp(1000), 1024);
		let batch = &mut exports.get_mut("ch1").unwrap()[0];
		batch.joins.push(JoinEvent {
			user_id: "alice".into(),
			username: "alice".into(),
			user_email: "alice@example.com".into(),
			user_type: crate::classify::UserType::User,
			join_time: Timestamp(10),
		});
		compute_participants(batch);

		let mut warnings = 0;
		let eml = emitter.render_eml(batch, &mut warnings).await.unwrap();
		let rendered = String::from_utf8_lossy(&eml);

		assert!(rendered.contains("X-GlobalRelay-MsgType: Mattermost"));
		assert!(rendered.contains("X-Mattermost-ChannelID: ch1"));
		assert!(rendered.contains("X-Mattermost-ChannelType: public"));
		assert!(rendered.contains("Subject: Mattermost Compliance Export: Town Square"));
		assert!(rendered.contains("From: alice@example.com"));
		// attachment backend failed, batch still rendered
		assert_eq!(warnings, 1);
	}

	#[test]
	fn test_zip_round_trip() {
		let entries = vec![
			("Town Square - (ch1) - 0.eml".to_string(), b"first".to_vec()),
			("Town Square - (ch1) - 1.eml".to_string(), b"second".to_vec()),
		];
		let bytes = zip_entries(&entries).unwrap();

		let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
		assert_eq!(archive.len(), 2);
		let mut body = String::new();
		std::io::Read::read_to_string(&mut archive.by_index(0).unwrap(), &mut body).unwrap();
		assert_eq!(body, "first");
	}
}

// vim: ts=4
