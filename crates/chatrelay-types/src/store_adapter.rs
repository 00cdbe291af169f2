//! Host store adapter trait.
//!
//! The chat server's persistence layer is consumed through this single trait;
//! tests substitute recording or fixture implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::channel::{Channel, ChannelMember, ChannelMemberHistory, Team};
use crate::error::CrResult;
use crate::post::{FileInfo, Post};
use crate::types::Timestamp;
use crate::user::{Preference, Token, User};

/// Position within the `(update_at ASC, id ASC)` post iteration order.
///
/// Posts are iterated strictly after `(last_post_update_at, last_post_id)`
/// and at-or-before `until_update_at`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
	pub last_post_update_at: Timestamp,
	pub last_post_id: String,
	pub until_update_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct PostCountOptions {
	pub since_id: String,
	pub since: Timestamp,
	pub until: Timestamp,
	pub exclude_system_posts: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FileInfoOptions {
	pub read_from_master: bool,
	pub include_deleted: bool,
	pub allow_from_cache: bool,
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
	/// Counts posts satisfying a time/id range
	async fn analytics_post_count(&self, opts: &PostCountOptions) -> CrResult<i64>;

	/// Reads up to `limit` posts after the cursor position, returning the
	/// advanced cursor alongside
	async fn message_export(&self, cursor: &Cursor, limit: usize)
		-> CrResult<(Vec<Post>, Cursor)>;

	async fn channels_get_many(&self, ids: &[String]) -> CrResult<Vec<Channel>>;
	async fn channel_get(&self, id: &str) -> CrResult<Channel>;
	async fn channels_get_by_names(&self, team_id: &str, names: &[String])
		-> CrResult<Vec<Channel>>;
	async fn channel_members_for_user(
		&self,
		team_id: &str,
		user_id: &str,
	) -> CrResult<Vec<ChannelMember>>;

	/// Channels with any user activity (join or leave) in the window
	async fn channels_with_activity_during(
		&self,
		start: Timestamp,
		end: Timestamp,
	) -> CrResult<Vec<String>>;

	/// Membership history rows per channel for the window
	async fn users_in_channel_during(
		&self,
		start: Timestamp,
		end: Timestamp,
		channel_ids: &[String],
	) -> CrResult<HashMap<String, Vec<ChannelMemberHistory>>>;

	async fn preference_get(
		&self,
		user_id: &str,
		category: &str,
		name: &str,
	) -> CrResult<Option<Preference>>;

	async fn file_infos_for_post(
		&self,
		post_id: &str,
		opts: &FileInfoOptions,
	) -> CrResult<Vec<FileInfo>>;

	async fn token_save(&self, token: &Token) -> CrResult<()>;
	async fn tokens_get_all_by_type(&self, token_type: &str) -> CrResult<Vec<Token>>;
	async fn token_delete(&self, token: &str) -> CrResult<()>;

	async fn user_get(&self, id: &str) -> CrResult<User>;
	async fn team_get_by_name(&self, name: &str) -> CrResult<Team>;

	/// Raw PNG bytes of the user's profile image
	async fn profile_image(&self, user_id: &str) -> CrResult<Vec<u8>>;
}

// vim: ts=4
