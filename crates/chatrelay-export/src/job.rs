//! Export job state and driver.
//!
//! `JobData` is the durable handoff: the persisted fields round-trip through
//! a string map so the host's job table can suspend and resume an export at
//! any batch boundary. The driver consumes posts by cursor, one batch per
//! iteration, and each completed batch is a safe resume point.

use std::collections::HashMap;
use std::sync::Arc;

use chatrelay_core::config::{Config, ESTIMATED_POST_COUNT};
use chatrelay_mail::SessionFactory;
use chatrelay_types::backend::ExportBackend;
use chatrelay_types::store_adapter::{Cursor, PostCountOptions, StoreAdapter};

use crate::classify::export_records;
use crate::emit::{compute_participants, eml_entry_name, pack_posts, zip_entries, Emitter};
use crate::metadata::{self, ChannelMetadataCache, PostAuthor};
use crate::prelude::*;

pub const EXPORT_TYPE_GLOBALRELAY_ZIP: &str = "globalrelay-zip";
pub const EXPORT_TYPE_GLOBALRELAY: &str = "globalrelay";

/// Default export path component when `export_dir` is unset
const COMPLIANCE_EXPORT_PATH: &str = "export";

/// Serialisable export job state. The string-map fields persist across
/// restarts; the remaining fields are re-derived when a job is claimed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobData {
	pub export_type: String,
	pub export_dir: String,
	pub batch_start_time: Timestamp,
	pub batch_start_id: String,
	pub job_start_time: Timestamp,
	pub job_end_time: Timestamp,
	pub job_start_id: String,
	pub batch_size: usize,
	pub channel_batch_size: usize,
	pub channel_history_batch_size: usize,
	pub batch_number: i64,
	pub total_posts_expected: i64,
	pub messages_exported: i64,
	pub warning_count: i64,
	pub is_downloadable: bool,

	// transient, re-derived on claim
	pub export_period_start_time: Timestamp,
	pub channel_metadata: ChannelMetadataCache,
	pub cursor: Cursor,
	pub batch_end_time: Timestamp,
	pub batch_path: String,
	pub finished: bool,
}

fn parse_int<T>(map: &HashMap<String, String>, key: &str) -> CrResult<T>
where
	T: std::str::FromStr + Default,
{
	match map.get(key) {
		None => Ok(T::default()),
		Some(value) => value
			.parse()
			.map_err(|_| Error::Decode(format!("malformed value for '{}': {}", key, value))),
	}
}

impl JobData {
	pub fn to_string_map(&self) -> HashMap<String, String> {
		let mut map = HashMap::new();
		map.insert("export_type".into(), self.export_type.clone());
		map.insert("export_dir".into(), self.export_dir.clone());
		map.insert("batch_start_time".into(), self.batch_start_time.0.to_string());
		map.insert("batch_start_id".into(), self.batch_start_id.clone());
		map.insert("job_start_time".into(), self.job_start_time.0.to_string());
		map.insert("job_end_time".into(), self.job_end_time.0.to_string());
		map.insert("job_start_id".into(), self.job_start_id.clone());
		map.insert("batch_size".into(), self.batch_size.to_string());
		map.insert("channel_batch_size".into(), self.channel_batch_size.to_string());
		map.insert(
			"channel_history_batch_size".into(),
			self.channel_history_batch_size.to_string(),
		);
		map.insert("job_batch_number".into(), self.batch_number.to_string());
		map.insert("total_posts_expected".into(), self.total_posts_expected.to_string());
		map.insert("messages_exported".into(), self.messages_exported.to_string());
		map.insert("warning_count".into(), self.warning_count.to_string());
		map.insert("is_downloadable".into(), self.is_downloadable.to_string());
		map
	}

	/// Missing keys default to zero values; malformed integers are a
	/// decode error
	pub fn from_string_map(map: &HashMap<String, String>) -> CrResult<Self> {
		Ok(Self {
			export_type: map.get("export_type").cloned().unwrap_or_default(),
			export_dir: map.get("export_dir").cloned().unwrap_or_default(),
			batch_start_time: Timestamp(parse_int(map, "batch_start_time")?),
			batch_start_id: map.get("batch_start_id").cloned().unwrap_or_default(),
			job_start_time: Timestamp(parse_int(map, "job_start_time")?),
			job_end_time: Timestamp(parse_int(map, "job_end_time")?),
			job_start_id: map.get("job_start_id").cloned().unwrap_or_default(),
			batch_size: parse_int(map, "batch_size")?,
			channel_batch_size: parse_int(map, "channel_batch_size")?,
			channel_history_batch_size: parse_int(map, "channel_history_batch_size")?,
			batch_number: parse_int(map, "job_batch_number")?,
			total_posts_expected: parse_int(map, "total_posts_expected")?,
			messages_exported: parse_int(map, "messages_exported")?,
			warning_count: parse_int(map, "warning_count")?,
			is_downloadable: map.get("is_downloadable").is_some_and(|v| v == "true"),
			..Self::default()
		})
	}
}

pub struct MessageExportJob {
	config: Config,
	data: JobData,
	store: Arc<dyn StoreAdapter>,
	export: Arc<dyn ExportBackend>,
	emitter: Emitter,
	session_factory: Option<Arc<dyn SessionFactory>>,
}

impl MessageExportJob {
	pub fn new(
		config: Config,
		data: JobData,
		store: Arc<dyn StoreAdapter>,
		export: Arc<dyn ExportBackend>,
		emitter: Emitter,
		session_factory: Option<Arc<dyn SessionFactory>>,
	) -> Self {
		Self { config, data, store, export, emitter, session_factory }
	}

	pub fn data(&self) -> &JobData {
		&self.data
	}

	/// Drive the export to completion. `progress` receives
	/// (messages exported, total expected) after every batch; the job state
	/// can be persisted between calls.
	pub async fn run(
		&mut self,
		progress: &mut (dyn FnMut(i64, i64) + Send),
	) -> CrResult<()> {
		self.prepare(progress).await?;

		loop {
			let (posts, next_cursor) =
				self.store.message_export(&self.data.cursor, self.data.batch_size).await?;
			if posts.is_empty() {
				self.data.finished = true;
				info!(
					"Export finished: {} messages, {} warnings",
					self.data.messages_exported, self.data.warning_count
				);
				return Ok(());
			}

			let prev_update_at = self.data.batch_start_time;
			let Some(last) = posts.last() else {
				return Ok(());
			};
			let last_update_at = last.update_at;
			let last_id = last.id.clone();
			self.data.batch_end_time = last_update_at;

			let mut records = Vec::new();
			for post in &posts {
				records.extend(
					export_records(self.store.as_ref(), post, self.data.job_start_time).await?,
				);
			}
			let message_count = records.len() as i64;

			let zip = self.emit_batch(records, prev_update_at, last_update_at).await?;

			self.data.batch_number += 1;
			self.data.batch_path = format!(
				"{}/batch{:03}-{}-{}.zip",
				self.export_dir(),
				self.data.batch_number,
				prev_update_at.0,
				last_update_at.0,
			);
			self.write_or_deliver(&zip).await?;

			self.data.messages_exported += message_count;
			self.data.batch_start_time = last_update_at;
			self.data.batch_start_id = last_id;
			self.data.cursor = next_cursor;
			progress(self.data.messages_exported, self.data.total_posts_expected);
		}
	}

	async fn prepare(
		&mut self,
		progress: &mut (dyn FnMut(i64, i64) + Send),
	) -> CrResult<()> {
		if self.data.export_period_start_time == Timestamp::ZERO {
			self.data.export_period_start_time = if self.data.batch_start_time > Timestamp::ZERO {
				self.data.batch_start_time
			} else {
				self.data.job_start_time
			};
		}
		if self.data.export_dir.is_empty() {
			let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
			self.data.export_dir = format!("{}/{}", COMPLIANCE_EXPORT_PATH, stamp);
		}
		if self.data.export_type.is_empty() {
			self.data.export_type = self.config.message_export.export_format.clone();
		}
		if self.data.batch_size == 0 {
			self.data.batch_size = self.config.message_export.batch_size;
		}
		if self.data.channel_batch_size == 0 {
			self.data.channel_batch_size = self.config.message_export.channel_batch_size;
		}
		if self.data.channel_history_batch_size == 0 {
			self.data.channel_history_batch_size =
				self.config.message_export.channel_history_batch_size;
		}

		if self.data.total_posts_expected == 0 {
			let opts = PostCountOptions {
				since_id: self.data.job_start_id.clone(),
				since: self.data.job_start_time,
				until: self.data.job_end_time,
				exclude_system_posts: true,
			};
			self.data.total_posts_expected = match self.store.analytics_post_count(&opts).await {
				Ok(count) => count,
				Err(err) => {
					warn!("Post count failed, progress will be approximate: {}", err);
					ESTIMATED_POST_COUNT
				}
			};
		}

		if self.data.channel_metadata.is_empty() {
			let exported = self.data.messages_exported;
			let expected = self.data.total_posts_expected;
			// heartbeat after every metadata sub-query so callers see the job
			// is alive before the first batch
			let mut report = |done: usize, total_channels: usize| {
				debug!("Channel metadata {}/{}", done, total_channels);
				progress(exported, expected);
			};
			self.data.channel_metadata = metadata::assemble(
				self.store.as_ref(),
				self.data.export_period_start_time,
				self.data.job_end_time,
				self.data.channel_batch_size,
				self.data.channel_history_batch_size,
				&mut report,
			)
			.await?;
			progress(self.data.messages_exported, self.data.total_posts_expected);
		}

		if self.data.cursor == Cursor::default() {
			self.data.cursor = Cursor {
				last_post_update_at: if self.data.batch_start_time > Timestamp::ZERO {
					self.data.batch_start_time
				} else {
					self.data.job_start_time
				},
				last_post_id: if self.data.batch_start_id.is_empty() {
					self.data.job_start_id.clone()
				} else {
					self.data.batch_start_id.clone()
				},
				until_update_at: self.data.job_end_time,
			};
		}
		Ok(())
	}

	/// Pack, enrich, render, and zip one batch of records
	async fn emit_batch(
		&mut self,
		records: Vec<crate::classify::PostExport>,
		start: Timestamp,
		end: Timestamp,
	) -> CrResult<Vec<u8>> {
		let mut authors_by_channel: HashMap<String, Vec<PostAuthor>> = HashMap::new();
		for record in &records {
			let authors = authors_by_channel.entry(record.channel_id.clone()).or_default();
			if !authors.iter().any(|a| a.user_id == record.user_id) {
				authors.push(PostAuthor {
					user_id: record.user_id.clone(),
					username: record.username.clone(),
					user_email: record.user_email.clone(),
					is_bot: record.user_type == crate::classify::UserType::Bot,
				});
			}
		}

		let mut exports = pack_posts(
			records,
			&self.data.channel_metadata.channels,
			start,
			end,
			self.config.message_export.max_email_bytes,
		);

		// channels without posts still export when their membership history
		// shows activity in the batch window
		for (channel_id, histories) in &self.data.channel_metadata.member_histories {
			if exports.contains_key(channel_id) {
				continue;
			}
			if !metadata::channel_has_activity(histories, start, end) {
				continue;
			}
			if let Some(channel) = self.data.channel_metadata.channels.get(channel_id) {
				exports.insert(
					channel_id.clone(),
					vec![crate::emit::ChannelExport {
						channel_id: channel.id.clone(),
						channel_name: channel.name.clone(),
						display_name: channel.display_name.clone(),
						channel_type: channel.channel_type,
						start_time: start,
						end_time: end,
						..crate::emit::ChannelExport::default()
					}],
				);
			}
		}

		let empty_histories = Vec::new();
		let empty_authors = Vec::new();
		let mut entries = Vec::new();
		let mut channel_ids: Vec<&String> = exports.keys().collect();
		channel_ids.sort();
		let mut warning_count = self.data.warning_count;
		for channel_id in channel_ids {
			let Some(batches) = exports.get(channel_id) else {
				continue;
			};
			let histories = self
				.data
				.channel_metadata
				.member_histories
				.get(channel_id)
				.unwrap_or(&empty_histories);
			let authors = authors_by_channel.get(channel_id).unwrap_or(&empty_authors);
			let (joins, leaves) = metadata::join_leave_events(histories, start, end, authors);

			for (index, batch) in batches.iter().enumerate() {
				let mut batch = batch.clone();
				batch.joins = joins.clone();
				batch.leaves = leaves.clone();
				compute_participants(&mut batch);

				let eml = self.emitter.render_eml(&batch, &mut warning_count).await?;
				entries.push((eml_entry_name(&batch, index), eml));
			}
		}
		self.data.warning_count = warning_count;

		zip_entries(&entries)
	}

	fn export_dir(&self) -> &str {
		if self.data.export_dir.is_empty() {
			COMPLIANCE_EXPORT_PATH
		} else {
			&self.data.export_dir
		}
	}

	async fn write_or_deliver(&mut self, zip: &[u8]) -> CrResult<()> {
		if self.data.export_type == EXPORT_TYPE_GLOBALRELAY_ZIP {
			let written = self.export.write(&self.data.batch_path, &mut &zip[..]).await?;
			info!("Wrote export batch {} ({} bytes)", self.data.batch_path, written);
			return Ok(());
		}

		let factory = self
			.session_factory
			.clone()
			.ok_or_else(|| Error::ConfigError("no delivery session factory configured".into()))?;
		let inbox = self.config.message_export.global_relay.email_address.clone();
		if inbox.is_empty() {
			return Err(Error::ConfigError("GlobalRelay email address not configured".into()));
		}

		let zip = zip.to_vec();
		let stats = tokio::task::spawn_blocking(move || {
			crate::deliver::deliver_zip(factory.as_ref(), &inbox, &zip)
		})
		.await
		.map_err(|e| Error::Internal(format!("delivery task failed: {}", e)))??;
		debug!("Batch delivered over {} sessions", stats.sessions);
		Ok(())
	}
}


// vim: ts=4
