//! Invite rate limiting.
//!
//! Per-sender limits using the governor crate's GCRA algorithm: a leaky
//! bucket of 20 invites per hour (burst 20) plus a second per-day limiter
//! reserved for daily-cap flows. Every invite emitter consults this before
//! sending.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock as GovernorClock, DefaultClock};
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};

use crate::prelude::*;

const MAX_INVITES_PER_HOUR: u32 = 20;
const INVITE_BURST: u32 = 20;
const MAX_INVITES_PER_DAY: u32 = 1;

type KeyedLimiter = RateLimiter<String, DashMapStateStore<String>, DefaultClock>;

fn nonzero(n: u32) -> NonZeroU32 {
	NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

/// Per-sender invite rate limiter
pub struct InviteRateLimiter {
	per_hour: KeyedLimiter,
	per_day: KeyedLimiter,
	hour_reset: Duration,
	day_reset: Duration,
}

impl InviteRateLimiter {
	pub fn new() -> CrResult<Self> {
		let hourly_quota =
			Quota::per_hour(nonzero(MAX_INVITES_PER_HOUR)).allow_burst(nonzero(INVITE_BURST));

		let daily_quota = Quota::with_period(Duration::from_secs(86_400))
			.ok_or_else(|| Error::RateLimiterSetup("invalid daily quota period".into()))?
			.allow_burst(nonzero(MAX_INVITES_PER_DAY));

		Ok(Self {
			per_hour: RateLimiter::keyed(hourly_quota),
			per_day: RateLimiter::keyed(daily_quota),
			hour_reset: Duration::from_secs(3600),
			day_reset: Duration::from_secs(86_400),
		})
	}

	/// Check the hourly bucket for a sender. Returns
	/// `Error::RateLimitExceeded` with retry/reset hints when limited.
	pub fn check(&self, sender_id: &str) -> CrResult<()> {
		match self.per_hour.check_key(&sender_id.to_string()) {
			Ok(()) => Ok(()),
			Err(not_until) => {
				let retry_after = not_until.wait_time_from(DefaultClock::default().now());
				warn!("Invite rate limit hit for sender {}", sender_id);
				Err(Error::RateLimitExceeded { retry_after, reset_after: self.hour_reset })
			}
		}
	}

	/// Check the per-day bucket (daily-cap flows)
	pub fn check_daily(&self, sender_id: &str) -> CrResult<()> {
		match self.per_day.check_key(&sender_id.to_string()) {
			Ok(()) => Ok(()),
			Err(not_until) => {
				let retry_after = not_until.wait_time_from(DefaultClock::default().now());
				Err(Error::RateLimitExceeded { retry_after, reset_after: self.day_reset })
			}
		}
	}
}


// vim: ts=4
