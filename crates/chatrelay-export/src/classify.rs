//! Post classification.
//!
//! Every post read from the cursor is classified into the update taxonomy
//! and expanded into export records: the post itself, an extra creation
//! record for posts deleted inside the job window, and one record per
//! deleted file attachment.

use chatrelay_types::post::{
	FileInfo, Post, PROP_DELETE_BY, PROP_OVERRIDE_USERNAME, PROP_PREVIEWED_POST,
	PROP_WEBHOOK_DISPLAY_NAME,
};
use chatrelay_types::store_adapter::{FileInfoOptions, StoreAdapter};

use crate::prelude::*;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdatedType {
	/// An unmodified creation
	#[default]
	None,
	/// Historical pre-edit snapshot; carries the id of the edited message
	EditedOriginalMsg,
	/// The current revision of an edited message
	EditedNewMsg,
	/// Updated without a message change (reaction, thread activity)
	UpdatedNoMsgChange,
	Deleted,
	FileDeleted,
}

impl UpdatedType {
	pub fn as_str(self) -> &'static str {
		match self {
			UpdatedType::None => "",
			UpdatedType::EditedOriginalMsg => "EditedOriginalMsg",
			UpdatedType::EditedNewMsg => "EditedNewMsg",
			UpdatedType::UpdatedNoMsgChange => "UpdatedNoMsgChange",
			UpdatedType::Deleted => "Deleted",
			UpdatedType::FileDeleted => "FileDeleted",
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UserType {
	#[default]
	User,
	Bot,
}

impl UserType {
	pub fn as_str(self) -> &'static str {
		match self {
			UserType::User => "user",
			UserType::Bot => "bot",
		}
	}
}

/// One classified export record
#[derive(Debug, Clone, Default)]
pub struct PostExport {
	pub post_id: String,
	pub channel_id: String,
	pub team_id: Option<String>,
	pub user_id: String,
	pub user_email: String,
	pub username: String,
	pub user_type: UserType,
	pub sent_time: Timestamp,
	pub update_at: Timestamp,
	pub updated_type: UpdatedType,
	/// Only for [`UpdatedType::EditedOriginalMsg`]
	pub edited_new_msg_id: Option<String>,
	pub message: String,
	/// Post referenced by a permalink preview
	pub preview_post_id: Option<String>,
	pub attachment_creates: Vec<FileInfo>,
	pub attachment_deletes: Vec<FileInfo>,
	/// Attachments exceeded the batch size cap and are reported instead
	/// of attached
	pub attachments_removed: bool,
}

/// Classify one post. The decision order matters: a pre-edit snapshot wins
/// over a deletion, a deletion over an update.
pub fn classify(post: &Post) -> UpdatedType {
	let deleted = post.is_deleted();
	if deleted && post.original_id.as_deref().is_some_and(|id| !id.is_empty()) {
		return UpdatedType::EditedOriginalMsg;
	}
	if deleted && post.has_prop(PROP_DELETE_BY) {
		return UpdatedType::Deleted;
	}
	if post.update_at > post.create_at {
		if post.edit_at.is_some_and(|t| t > Timestamp::ZERO) {
			UpdatedType::EditedNewMsg
		} else {
			UpdatedType::UpdatedNoMsgChange
		}
	} else if deleted {
		// deleted without a deleteBy prop or an originating message
		UpdatedType::UpdatedNoMsgChange
	} else {
		UpdatedType::None
	}
}

/// Display name for the post author; webhooks and integrations can
/// override the account username through props
fn post_username(post: &Post) -> String {
	if let Some(name) = post.prop_str(PROP_OVERRIDE_USERNAME) {
		return name.to_string();
	}
	if let Some(name) = post.prop_str(PROP_WEBHOOK_DISPLAY_NAME) {
		return name.to_string();
	}
	post.username.clone()
}

fn base_record(post: &Post) -> PostExport {
	PostExport {
		post_id: post.id.clone(),
		channel_id: post.channel_id.clone(),
		team_id: post.team_id.clone(),
		user_id: post.user_id.clone(),
		user_email: post.user_email.clone(),
		username: post_username(post),
		user_type: if post.is_bot { UserType::Bot } else { UserType::User },
		sent_time: post.create_at,
		update_at: post.update_at,
		message: post.message.clone(),
		preview_post_id: post.prop_str(PROP_PREVIEWED_POST).map(str::to_string),
		..PostExport::default()
	}
}

/// Expand one post into its export records.
///
/// A deleted post created at-or-after `job_start_time` also yields a
/// creation record first, with its attachments as they existed at create
/// time. A deleted file on a live post yields both the upload records and
/// the file-deletion record.
pub async fn export_records(
	store: &dyn StoreAdapter,
	post: &Post,
	job_start_time: Timestamp,
) -> CrResult<Vec<PostExport>> {
	let updated_type = classify(post);

	let file_infos: Vec<FileInfo> = if post.file_ids.is_empty() {
		Vec::new()
	} else {
		store
			.file_infos_for_post(
				&post.id,
				&FileInfoOptions { include_deleted: true, ..FileInfoOptions::default() },
			)
			.await?
	};

	let mut records = Vec::new();

	if updated_type == UpdatedType::Deleted && post.create_at >= job_start_time {
		// capture the original message before the deletion event, with the
		// upload records as they were even though the files are gone now
		let mut created = base_record(post);
		created.update_at = post.create_at;
		created.attachment_creates = file_infos.clone();
		records.push(created);
	}

	let mut main = base_record(post);
	main.updated_type = updated_type;
	if updated_type == UpdatedType::EditedOriginalMsg {
		main.edited_new_msg_id = post.original_id.clone();
	}

	let mut file_deletes = Vec::new();
	for file in &file_infos {
		if file.is_deleted() {
			let deleted_at = file.delete_at.unwrap_or(post.update_at);
			let mut record = base_record(post);
			record.updated_type = UpdatedType::FileDeleted;
			record.message = format!("delete {}", file.path);
			record.sent_time = deleted_at;
			record.update_at = deleted_at;
			record.attachment_deletes.push(file.clone());
			file_deletes.push(record);

			if !post.is_deleted() {
				// the post survives its attachment; keep the upload records
				main.attachment_creates.push(file.clone());
			}
		} else {
			main.attachment_creates.push(file.clone());
		}
	}

	records.push(main);
	records.extend(file_deletes);
	Ok(records)
}


// vim: ts=4
