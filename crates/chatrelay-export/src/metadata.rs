//! Channel metadata assembly and join/leave computation.
//!
//! Channel and membership-history retrieval is split into fixed-size
//! sub-queries to bound database load; results are cached on the job so
//! later batches do not re-query.

use std::collections::HashMap;

use chatrelay_types::channel::{Channel, ChannelMemberHistory};
use chatrelay_types::store_adapter::StoreAdapter;

use crate::classify::UserType;
use crate::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEvent {
	pub user_id: String,
	pub username: String,
	pub user_email: String,
	pub user_type: UserType,
	pub join_time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveEvent {
	pub user_id: String,
	pub username: String,
	pub user_email: String,
	pub user_type: UserType,
	pub leave_time: Timestamp,
	/// Synthesised at batch end to match an unclosed join
	pub closed_out: bool,
}

/// A post author seen in a channel during the batch; used to inject
/// implicit joins for users without membership-history rows
#[derive(Debug, Clone)]
pub struct PostAuthor {
	pub user_id: String,
	pub username: String,
	pub user_email: String,
	pub is_bot: bool,
}

/// Channels with activity in the export window plus their membership
/// history, cached per job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMetadataCache {
	pub channels: HashMap<String, Channel>,
	pub member_histories: HashMap<String, Vec<ChannelMemberHistory>>,
}

impl ChannelMetadataCache {
	pub fn is_empty(&self) -> bool {
		self.channels.is_empty() && self.member_histories.is_empty()
	}
}

/// Retrieve metadata for every channel with user activity in
/// `[start, end]`, in sub-queries of `channel_batch_size` channels and
/// `history_batch_size` history lookups. `progress` is called after each
/// sub-query with (done, total) channel counts.
pub async fn assemble(
	store: &dyn StoreAdapter,
	start: Timestamp,
	end: Timestamp,
	channel_batch_size: usize,
	history_batch_size: usize,
	progress: &mut (dyn FnMut(usize, usize) + Send),
) -> CrResult<ChannelMetadataCache> {
	let ids = store.channels_with_activity_during(start, end).await?;
	let total = ids.len();
	info!("Assembling metadata for {} channels with activity", total);

	let mut cache = ChannelMetadataCache::default();

	let mut done = 0;
	for chunk in ids.chunks(channel_batch_size.max(1)) {
		for channel in store.channels_get_many(chunk).await? {
			cache.channels.insert(channel.id.clone(), channel);
		}
		done += chunk.len();
		progress(done, total);
	}

	let mut done = 0;
	for chunk in ids.chunks(history_batch_size.max(1)) {
		let histories = store.users_in_channel_during(start, end, chunk).await?;
		for (channel_id, rows) in histories {
			cache.member_histories.entry(channel_id).or_default().extend(rows);
		}
		done += chunk.len();
		progress(done, total);
	}

	Ok(cache)
}

/// True when the membership history shows any join or leave inside the
/// window; post-less channels with such activity are still exported
pub fn channel_has_activity(
	histories: &[ChannelMemberHistory],
	start: Timestamp,
	end: Timestamp,
) -> bool {
	histories.iter().any(|row| {
		(row.join_time >= start && row.join_time <= end)
			|| row.leave_time.is_some_and(|t| t >= start && t <= end)
	})
}

/// Compute join and leave events for one channel over `[start, end]`.
///
/// Every join gets a matching leave: users still joined at the end of the
/// window receive a synthetic close-out leave at `end`.
pub fn join_leave_events(
	histories: &[ChannelMemberHistory],
	start: Timestamp,
	end: Timestamp,
	authors: &[PostAuthor],
) -> (Vec<JoinEvent>, Vec<LeaveEvent>) {
	let mut joins: Vec<JoinEvent> = Vec::new();
	let mut leaves: Vec<LeaveEvent> = Vec::new();

	for row in histories {
		if row.user_deactivated_at.is_some_and(|t| t < start) {
			continue;
		}
		if row.join_time > end {
			continue;
		}
		if row.leave_time.is_some_and(|t| t < start) {
			continue;
		}

		let user_type = if row.is_bot { UserType::Bot } else { UserType::User };
		joins.push(JoinEvent {
			user_id: row.user_id.clone(),
			username: row.username.clone(),
			user_email: row.user_email.clone(),
			user_type,
			join_time: row.join_time,
		});
		if let Some(leave_time) = row.leave_time {
			if leave_time >= start && leave_time <= end {
				leaves.push(LeaveEvent {
					user_id: row.user_id.clone(),
					username: row.username.clone(),
					user_email: row.user_email.clone(),
					user_type,
					leave_time,
					closed_out: false,
				});
			}
		}
	}

	// authors without a membership row joined before history tracking
	for author in authors {
		if joins.iter().any(|j| j.user_id == author.user_id) {
			continue;
		}
		joins.push(JoinEvent {
			user_id: author.user_id.clone(),
			username: author.username.clone(),
			user_email: author.user_email.clone(),
			user_type: if author.is_bot { UserType::Bot } else { UserType::User },
			join_time: start,
		});
	}

	// close-out: every unmatched join gets a synthetic leave at batch end
	let mut synthetic = Vec::new();
	for join in &joins {
		let join_count = joins.iter().filter(|j| j.user_id == join.user_id).count();
		let leave_count = leaves
			.iter()
			.chain(synthetic.iter())
			.filter(|l| l.user_id == join.user_id)
			.count();
		if join_count > leave_count {
			synthetic.push(LeaveEvent {
				user_id: join.user_id.clone(),
				username: join.username.clone(),
				user_email: join.user_email.clone(),
				user_type: join.user_type,
				leave_time: end,
				closed_out: true,
			});
		}
	}
	leaves.extend(synthetic);

	joins.sort_by(|a, b| a.join_time.cmp(&b.join_time).then_with(|| a.user_email.cmp(&b.user_email)));
	leaves.sort_by(|a, b| {
		a.leave_time.cmp(&b.leave_time).then_with(|| a.user_email.cmp(&b.user_email))
	});
	(joins, leaves)
}


// vim: ts=4
