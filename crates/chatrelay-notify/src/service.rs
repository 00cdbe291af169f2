//! Email notification service: renders events and hands them to the SMTP
//! transport. Implements the batching flush handler and gates invite flows
//! through the per-sender rate limiter.

use std::sync::Arc;

use async_trait::async_trait;

use rand::distr::{Alphanumeric, SampleString};
use serde_json::json;

use chatrelay_core::config::Config;
use chatrelay_core::rate_limit::InviteRateLimiter;
use chatrelay_mail::{MailMessage, MailTransport};
use chatrelay_types::store_adapter::StoreAdapter;
use chatrelay_types::types::now;
use chatrelay_types::user::{Token, User};

use crate::batching::{BatchFlushHandler, BatchedNotification};
use crate::renderer::{RenderedEmail, Renderer, TransactionalEvent};
use crate::prelude::*;

pub const TOKEN_TYPE_VERIFY_EMAIL: &str = "verify_email";
const TOKEN_SIZE: usize = 64;

/// One-time email-verification token; stale tokens for the same user are
/// dropped before the new one is saved
pub async fn create_verification_token(
	store: &dyn StoreAdapter,
	user_id: &str,
	email: &str,
) -> CrResult<Token> {
	for stale in store.tokens_get_all_by_type(TOKEN_TYPE_VERIFY_EMAIL).await? {
		let matches = serde_json::from_str::<serde_json::Value>(&stale.extra)
			.ok()
			.and_then(|v| v.get("user_id").and_then(|u| u.as_str()).map(|u| u == user_id))
			.unwrap_or(false);
		if matches {
			store.token_delete(&stale.token).await?;
		}
	}

	let token = Token {
		token: Alphanumeric.sample_string(&mut rand::rng(), TOKEN_SIZE),
		token_type: TOKEN_TYPE_VERIFY_EMAIL.to_string(),
		create_at: now(),
		extra: json!({ "user_id": user_id, "email": email }).to_string(),
	};
	store.token_save(&token).await.map_err(|e| Error::CreateToken(e.to_string()))?;
	Ok(token)
}

pub struct EmailNotificationService {
	config: Config,
	renderer: Arc<Renderer>,
	transport: Arc<MailTransport>,
	store: Arc<dyn StoreAdapter>,
	invite_limiter: InviteRateLimiter,
}

impl EmailNotificationService {
	pub fn new(
		config: Config,
		renderer: Arc<Renderer>,
		transport: Arc<MailTransport>,
		store: Arc<dyn StoreAdapter>,
	) -> CrResult<Self> {
		Ok(Self {
			config,
			renderer,
			transport,
			store,
			invite_limiter: InviteRateLimiter::new()?,
		})
	}

	async fn deliver(&self, to: &str, email: RenderedEmail) -> CrResult<()> {
		let mut message = MailMessage::new(to, email.subject, email.html_body);
		for (cid, bytes) in email.embedded {
			message = message.embed(cid, bytes);
		}
		let transport = Arc::clone(&self.transport);
		tokio::task::spawn_blocking(move || transport.send(&message))
			.await
			.map_err(|e| Error::Internal(format!("send task failed: {}", e)))?
	}

	/// Send the welcome email. When email verification is required, a
	/// verification token is created and its link embedded in the body.
	pub async fn send_welcome(&self, user: &User) -> CrResult<()> {
		let verify_link = if self.config.email.require_email_verification {
			let token = create_verification_token(self.store.as_ref(), &user.id, &user.email).await?;
			Some(format!(
				"{}/do_verify_email?token={}&email={}",
				self.config.service.site_url, token.token, user.email
			))
		} else {
			None
		};
		self.send_transactional(&user.email, &TransactionalEvent::Welcome { verify_link }).await
	}

	/// Render and send one transactional email
	pub async fn send_transactional(
		&self,
		to: &str,
		event: &TransactionalEvent,
	) -> CrResult<()> {
		let email = self.renderer.render_transactional(event)?;
		self.deliver(to, email).await
	}

	/// Send team invitations, consulting the per-sender rate limit first.
	/// With `error_when_not_sent` a transport failure aborts and propagates;
	/// otherwise it is logged and the remaining invitees are still attempted.
	pub async fn send_invites(
		&self,
		sender_id: &str,
		invitees: &[String],
		event: &TransactionalEvent,
		error_when_not_sent: bool,
	) -> CrResult<()> {
		self.invite_limiter.check(sender_id)?;

		let email = self.renderer.render_transactional(event)?;
		for to in invitees {
			let rendered = RenderedEmail {
				subject: email.subject.clone(),
				html_body: email.html_body.clone(),
				embedded: Vec::new(),
			};
			if let Err(err) = self.deliver(to, rendered).await {
				if error_when_not_sent {
					return Err(err);
				}
				warn!("Failed to send invite to {}: {}", to, err);
			}
		}
		Ok(())
	}
}

#[async_trait]
impl BatchFlushHandler for EmailNotificationService {
	async fn flush(&self, user_id: &str, notifications: &[BatchedNotification]) -> CrResult<()> {
		if !self.config.email.send_email_notifications {
			debug!("Email notifications disabled, dropping batch for {}", user_id);
			return Ok(());
		}

		let user = self.store.user_get(user_id).await?;
		let email = self.renderer.render_batch(self.store.as_ref(), &user, notifications).await?;
		info!("Sending batched notification to {} ({} posts)", user.email, notifications.len());
		self.deliver(&user.email, email).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chatrelay_types::channel::{Channel, ChannelMember, ChannelMemberHistory, Team};
	use chatrelay_types::post::{FileInfo, Post};
	use chatrelay_types::store_adapter::{Cursor, FileInfoOptions, PostCountOptions};
	use chatrelay_types::user::Preference;
	use parking_lot::Mutex;
	use std::collections::HashMap;

	#[derive(Default)]
	struct TokenStore {
		tokens: Mutex<Vec<Token>>,
	}

	#[async_trait]
	impl StoreAdapter for TokenStore {
		async fn analytics_post_count(&self, _opts: &PostCountOptions) -> CrResult<i64> {
			Ok(0)
		}
		async fn message_export(
			&self,
			cursor: &Cursor,
			_limit: usize,
		) -> CrResult<(Vec<Post>, Cursor)> {
			Ok((Vec::new(), cursor.clone()))
		}
		async fn channels_get_many(&self, _ids: &[String]) -> CrResult<Vec<Channel>> {
			Ok(Vec::new())
		}
		async fn channel_get(&self, id: &str) -> CrResult<Channel> {
			Err(Error::NotFound(format!("channel {}", id)))
		}
		async fn channels_get_by_names(
			&self,
			_team_id: &str,
			_names: &[String],
		) -> CrResult<Vec<Channel>> {
			Ok(Vec::new())
		}
		async fn channel_members_for_user(
			&self,
			_team_id: &str,
			_user_id: &str,
		) -> CrResult<Vec<ChannelMember>> {
			Ok(Vec::new())
		}
		async fn channels_with_activity_during(
			&self,
			_start: Timestamp,
			_end: Timestamp,
		) -> CrResult<Vec<String>> {
			Ok(Vec::new())
		}
		async fn users_in_channel_during(
			&self,
			_start: Timestamp,
			_end: Timestamp,
			_channel_ids: &[String],
		) -> CrResult<HashMap<String, Vec<ChannelMemberHistory>>> {
			Ok(HashMap::new())
		}
		async fn preference_get(
			&self,
			_user_id: &str,
			_category: &str,
			_name: &str,
		) -> CrResult<Option<Preference>> {
			Ok(None)
		}
		async fn file_infos_for_post(
			&self,
			_post_id: &str,
			_opts: &FileInfoOptions,
		) -> CrResult<Vec<FileInfo>> {
			Ok(Vec::new())
		}
		async fn token_save(&self, token: &Token) -> CrResult<()> {
			self.tokens.lock().push(token.clone());
			Ok(())
		}
		async fn tokens_get_all_by_type(&self, token_type: &str) -> CrResult<Vec<Token>> {
			Ok(self
				.tokens
				.lock()
				.iter()
				.filter(|t| t.token_type == token_type)
				.cloned()
				.collect())
		}
		async fn token_delete(&self, token: &str) -> CrResult<()> {
			self.tokens.lock().retain(|t| t.token != token);
			Ok(())
		}
		async fn user_get(&self, id: &str) -> CrResult<User> {
			Err(Error::NotFound(format!("user {}", id)))
		}
		async fn team_get_by_name(&self, name: &str) -> CrResult<Team> {
			Err(Error::NotFound(format!("team {}", name)))
		}
		async fn profile_image(&self, id: &str) -> CrResult<Vec<u8>> {
			Err(Error::NotFound(format!("image {}", id)))
		}
	}

	#[tokio::test]
	async fn test_verification_token_replaces_stale() {
		let store = TokenStore::default();

		let first = create_verification_token(&store, "u1", "u1@example.com").await.unwrap();
		assert_eq!(first.token.len(), TOKEN_SIZE);
		assert_eq!(first.token_type, TOKEN_TYPE_VERIFY_EMAIL);

		let other = create_verification_token(&store, "u2", "u2@example.com").await.unwrap();
		let second = create_verification_token(&store, "u1", "u1@example.com").await.unwrap();
		assert_ne!(first.token, second.token);

		// only the latest token per user survives
		let tokens = store.tokens.lock();
		assert_eq!(tokens.len(), 2);
		assert!(tokens.iter().any(|t| t.token == second.token));
		assert!(tokens.iter().any(|t| t.token == other.token));
		assert!(!tokens.iter().any(|t| t.token == first.token));
	}
}

// vim: ts=4
