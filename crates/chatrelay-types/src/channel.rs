//! Channel, team, and membership records.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
	#[default]
	Public,
	Private,
	Direct,
	Group,
}

impl ChannelType {
	pub fn as_str(self) -> &'static str {
		match self {
			ChannelType::Public => "public",
			ChannelType::Private => "private",
			ChannelType::Direct => "direct",
			ChannelType::Group => "group",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
	pub id: String,
	#[serde(default)]
	pub team_id: Option<String>,
	pub name: String,
	pub display_name: String,
	pub channel_type: ChannelType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Team {
	pub id: String,
	pub name: String,
	pub display_name: String,
}

/// A user's membership in a channel, as seen by the notification engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelMember {
	pub channel_id: String,
	pub user_id: String,
	pub last_viewed_at: Timestamp,
}

/// One row of channel-membership history, as seen by the export engine.
/// `leave_time` is open (None) while the user is still a member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelMemberHistory {
	pub channel_id: String,
	pub user_id: String,
	pub username: String,
	pub user_email: String,
	#[serde(default)]
	pub is_bot: bool,
	pub join_time: Timestamp,
	#[serde(default)]
	pub leave_time: Option<Timestamp>,
	/// Set when the account was deactivated; memberships of users
	/// deactivated before the export window are excluded entirely
	#[serde(default)]
	pub user_deactivated_at: Option<Timestamp>,
}

// vim: ts=4
