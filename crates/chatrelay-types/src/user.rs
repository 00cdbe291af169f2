//! User, preference, and token records.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

pub const PREFERENCE_CATEGORY_NOTIFICATIONS: &str = "notifications";
pub const PREFERENCE_NAME_EMAIL_INTERVAL: &str = "email_interval";
pub const PREFERENCE_CATEGORY_DISPLAY_SETTINGS: &str = "display_settings";
pub const PREFERENCE_NAME_USE_MILITARY_TIME: &str = "use_military_time";
pub const PREFERENCE_NAME_COLLAPSED_REPLY_THREADS: &str = "collapsed_reply_threads";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
	pub id: String,
	pub username: String,
	#[serde(default)]
	pub nickname: String,
	pub email: String,
	#[serde(default)]
	pub locale: String,
	#[serde(default)]
	pub is_bot: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preference {
	pub user_id: String,
	pub category: String,
	pub name: String,
	pub value: String,
}

/// Opaque one-time token used by verification and invite flows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Token {
	pub token: String,
	pub token_type: String,
	pub create_at: Timestamp,
	#[serde(default)]
	pub extra: String,
}

// vim: ts=4
