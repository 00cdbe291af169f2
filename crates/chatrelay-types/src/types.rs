//! Common types used throughout the chatrelay pipeline.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

// Timestamp //
//***********//
/// Milliseconds since the Unix epoch. The chat domain timestamps everything
/// in milliseconds, including view times and file deletion times.
#[derive(Clone, Copy, Debug, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub const ZERO: Timestamp = Timestamp(0);

	pub fn from_now(seconds: i64) -> Self {
		Timestamp(now().0 + seconds * 1000)
	}

	/// RFC-2822 formatted UTC date, used for the `Date` mail header
	pub fn to_rfc2822(self) -> String {
		chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.0)
			.unwrap_or_default()
			.to_rfc2822()
	}

	/// ISO-8601 UTC instant, used in exported log lines
	pub fn to_rfc3339(self) -> String {
		chrono::DateTime::<chrono::Utc>::from_timestamp_millis(self.0)
			.unwrap_or_default()
			.format("%Y-%m-%dT%H:%M:%SZ")
			.to_string()
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::cmp::PartialEq for Timestamp {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl std::cmp::Eq for Timestamp {}

impl std::cmp::PartialOrd for Timestamp {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl std::cmp::Ord for Timestamp {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.0.cmp(&other.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

pub fn now() -> Timestamp {
	let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
	Timestamp(res.as_millis() as i64)
}

// Clock //
//*******//
/// Injectable time source. Every component that compares timestamps takes a
/// clock so tests can pin "now".
pub trait Clock: Send + Sync {
	fn now(&self) -> Timestamp;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Timestamp {
		now()
	}
}


// vim: ts=4
