//! Email batching engine.
//!
//! Coalesces per-user notifications over a configurable window. Ingress is a
//! bounded channel drained by a single periodic worker; `pending` is touched
//! only by that worker, so drain-then-process is the whole concurrency
//! contract. A flush emits one email per due user, skips users whose
//! interval has not elapsed, and purges users who already viewed a relevant
//! channel since the batch started.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatrelay_core::config::PREFERENCE_EMAIL_INTERVAL_BATCHING_SECONDS;
use chatrelay_types::post::Post;
use chatrelay_types::store_adapter::StoreAdapter;
use chatrelay_types::types::Clock;
use chatrelay_types::user::{PREFERENCE_CATEGORY_NOTIFICATIONS, PREFERENCE_NAME_EMAIL_INTERVAL};

use crate::prelude::*;

/// One admitted notification, owned by the engine until flushed
#[derive(Debug, Clone)]
pub struct BatchedNotification {
	pub user_id: String,
	pub post: Post,
	pub team_name: String,
}

/// Renders and sends one user's due batch. Injected so tests record calls.
#[async_trait]
pub trait BatchFlushHandler: Send + Sync {
	async fn flush(&self, user_id: &str, notifications: &[BatchedNotification]) -> CrResult<()>;
}

pub struct EmailBatchingService {
	tx: flume::Sender<BatchedNotification>,
	rx: flume::Receiver<BatchedNotification>,
	interval: Duration,
	store: Arc<dyn StoreAdapter>,
	handler: Arc<dyn BatchFlushHandler>,
	clock: Arc<dyn Clock>,
	/// Per-user pending lists in arrival order; only the flush worker
	/// touches this, and never across an await
	pending: Mutex<HashMap<String, Vec<BatchedNotification>>>,
	/// Shutdown signal for the current flush task; the task exits between
	/// ticks, so an in-flight flush always completes
	shutdown: Mutex<Option<tokio::sync::watch::Sender<bool>>>,
}

impl EmailBatchingService {
	/// `buffer_size` is the ingress capacity (`EmailBatchingBufferSize`);
	/// it cannot change without constructing a new service.
	pub fn new(
		buffer_size: usize,
		interval: Duration,
		store: Arc<dyn StoreAdapter>,
		handler: Arc<dyn BatchFlushHandler>,
		clock: Arc<dyn Clock>,
	) -> Self {
		let (tx, rx) = flume::bounded(buffer_size);
		Self {
			tx,
			rx,
			interval,
			store,
			handler,
			clock,
			pending: Mutex::new(HashMap::new()),
			shutdown: Mutex::new(None),
		}
	}

	/// Non-blocking enqueue. `false` means the buffer is full and the caller
	/// must fall back to an immediate, non-batched email.
	pub fn add(&self, user_id: impl Into<String>, post: Post, team_name: impl Into<String>) -> bool {
		let notification = BatchedNotification {
			user_id: user_id.into(),
			post,
			team_name: team_name.into(),
		};
		match self.tx.try_send(notification) {
			Ok(()) => true,
			Err(flume::TrySendError::Full(n)) => {
				debug!("Batching buffer full, rejecting notification for {}", n.user_id);
				false
			}
			Err(flume::TrySendError::Disconnected(_)) => false,
		}
	}

	/// Spawn the periodic flush task, replacing any previous one. The
	/// previous task is signalled and exits after its current flush, so
	/// a batch handed to the flush handler is never re-delivered. Safe to
	/// call repeatedly to pick up a new interval.
	pub fn start(self: &Arc<Self>) {
		let mut shutdown = self.shutdown.lock();
		if let Some(previous) = shutdown.take() {
			let _ = previous.send(true);
		}
		let (tx, mut rx) = tokio::sync::watch::channel(false);
		let service = Arc::clone(self);
		let interval = self.interval;
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			ticker.tick().await;
			loop {
				tokio::select! {
					_ = ticker.tick() => service.flush_step().await,
					_ = rx.changed() => break,
				}
			}
		});
		*shutdown = Some(tx);
		info!("Email batching started, interval {:?}", self.interval);
	}

	/// Signal the flush task to exit; an in-flight flush completes first.
	/// Pending notifications are kept and resume on the next start.
	pub fn stop(&self) {
		if let Some(shutdown) = self.shutdown.lock().take() {
			let _ = shutdown.send(true);
			info!("Email batching stopped");
		}
	}

	/// One flush step: drain the ingress queue into the pending map, then
	/// emit every due user.
	pub async fn flush_step(&self) {
		let snapshot: Vec<(String, Vec<BatchedNotification>)> = {
			let mut pending = self.pending.lock();
			while let Ok(notification) = self.rx.try_recv() {
				pending.entry(notification.user_id.clone()).or_default().push(notification);
			}
			pending.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
		};

		for (user_id, notifications) in snapshot {
			let Some(first) = notifications.first() else {
				debug!("Empty pending list for {}", user_id);
				self.pending.lock().remove(&user_id);
				continue;
			};
			let batch_start = first.post.create_at;

			let interval_ms = self.user_interval_seconds(&user_id).await * 1000;
			if self.clock.now().0 - batch_start.0 <= interval_ms {
				continue;
			}

			match self.user_viewed_since(&user_id, &notifications, batch_start).await {
				Ok(true) => {
					debug!("Purging batch for {}: channels viewed since batch start", user_id);
					self.pending.lock().remove(&user_id);
					continue;
				}
				Ok(false) => {}
				Err(err) => {
					warn!("View-time check failed for {}, retrying next flush: {}", user_id, err);
					continue;
				}
			}

			if let Err(err) = self.handler.flush(&user_id, &notifications).await {
				error!("Failed to send batched notification to {}: {}", user_id, err);
			}
			self.pending.lock().remove(&user_id);
		}
	}

	/// The user's email-interval preference in seconds; missing or
	/// unparsable values fall back to the default (15 minutes)
	async fn user_interval_seconds(&self, user_id: &str) -> i64 {
		let preference = self
			.store
			.preference_get(user_id, PREFERENCE_CATEGORY_NOTIFICATIONS, PREFERENCE_NAME_EMAIL_INTERVAL)
			.await;
		match preference {
			Ok(Some(p)) => p.value.parse().unwrap_or(PREFERENCE_EMAIL_INTERVAL_BATCHING_SECONDS),
			Ok(None) => PREFERENCE_EMAIL_INTERVAL_BATCHING_SECONDS,
			Err(err) => {
				warn!("Interval preference lookup failed for {}: {}", user_id, err);
				PREFERENCE_EMAIL_INTERVAL_BATCHING_SECONDS
			}
		}
	}

	/// True when any membership of the first batched team with activity has
	/// been viewed at-or-after the batch start
	async fn user_viewed_since(
		&self,
		user_id: &str,
		notifications: &[BatchedNotification],
		batch_start: Timestamp,
	) -> CrResult<bool> {
		let mut seen = Vec::new();
		for notification in notifications {
			if seen.contains(&notification.team_name) {
				continue;
			}
			seen.push(notification.team_name.clone());

			let team = self.store.team_get_by_name(&notification.team_name).await?;
			let members = self.store.channel_members_for_user(&team.id, user_id).await?;
			if members.iter().any(|m| m.last_viewed_at >= batch_start) {
				return Ok(true);
			}
		}
		Ok(false)
	}
}


// vim: ts=4
