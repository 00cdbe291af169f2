//! Post and file-attachment records as supplied by the host chat server.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Recognised keys in the free-form post props map
pub const PROP_OVERRIDE_USERNAME: &str = "override_username";
pub const PROP_WEBHOOK_DISPLAY_NAME: &str = "webhook_display_name";
pub const PROP_FROM_WEBHOOK: &str = "from_webhook";
pub const PROP_PREVIEWED_POST: &str = "previewed_post";
pub const PROP_DELETE_BY: &str = "deleteBy";

/// A chat post as read from the host store.
///
/// Invariants: `create_at <= update_at`; `delete_at` set implies the post is
/// either deleted or the pre-edit original (distinguished by `original_id`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
	pub id: String,
	pub channel_id: String,
	#[serde(default)]
	pub team_id: Option<String>,
	pub user_id: String,
	pub user_email: String,
	pub username: String,
	#[serde(default)]
	pub is_bot: bool,
	pub create_at: Timestamp,
	pub update_at: Timestamp,
	#[serde(default)]
	pub edit_at: Option<Timestamp>,
	#[serde(default)]
	pub delete_at: Option<Timestamp>,
	#[serde(default)]
	pub original_id: Option<String>,
	#[serde(default)]
	pub root_id: Option<String>,
	pub message: String,
	/// Free-form JSON props; parse failures on recognised keys are non-fatal
	#[serde(default)]
	pub props: serde_json::Value,
	#[serde(default)]
	pub file_ids: Vec<String>,
}

impl Post {
	pub fn is_deleted(&self) -> bool {
		self.delete_at.is_some_and(|t| t > Timestamp::ZERO)
	}

	/// Best-effort string prop lookup; a non-object props value yields None
	pub fn prop_str(&self, key: &str) -> Option<&str> {
		self.props.as_object()?.get(key)?.as_str()
	}

	pub fn has_prop(&self, key: &str) -> bool {
		self.props.as_object().is_some_and(|m| m.contains_key(key))
	}
}

/// File attachment metadata for a post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileInfo {
	pub id: String,
	pub post_id: String,
	pub path: String,
	pub name: String,
	pub size: i64,
	#[serde(default)]
	pub delete_at: Option<Timestamp>,
}

impl FileInfo {
	pub fn is_deleted(&self) -> bool {
		self.delete_at.is_some_and(|t| t > Timestamp::ZERO)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_prop_str() {
		let post = Post {
			props: serde_json::json!({ PROP_OVERRIDE_USERNAME: "webhook-bot" }),
			..Default::default()
		};
		assert_eq!(post.prop_str(PROP_OVERRIDE_USERNAME), Some("webhook-bot"));
		assert_eq!(post.prop_str(PROP_WEBHOOK_DISPLAY_NAME), None);
	}

	#[test]
	fn test_prop_str_non_object_props() {
		let post = Post { props: serde_json::json!("not a map"), ..Default::default() };
		assert_eq!(post.prop_str(PROP_DELETE_BY), None);
		assert!(!post.has_prop(PROP_DELETE_BY));
	}

	#[test]
	fn test_is_deleted() {
		let mut post = Post::default();
		assert!(!post.is_deleted());
		post.delete_at = Some(Timestamp(42));
		assert!(post.is_deleted());
	}
}

// vim: ts=4
