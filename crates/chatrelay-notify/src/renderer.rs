//! Notification-email renderer.
//!
//! A pure function of (config, translate fn, template container): every
//! transactional event maps to one template and produces a subject and an
//! HTML body. Batched notification rendering additionally consults the store
//! for senders, channels, and profile images.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use chatrelay_core::config::{CollapsedThreads, Config, EmailNotificationContents};
use chatrelay_templates::{TemplateContainer, TemplateData};
use chatrelay_types::channel::{Channel, ChannelType};
use chatrelay_types::store_adapter::StoreAdapter;
use chatrelay_types::user::{
	User, PREFERENCE_CATEGORY_DISPLAY_SETTINGS, PREFERENCE_NAME_COLLAPSED_REPLY_THREADS,
	PREFERENCE_NAME_USE_MILITARY_TIME,
};
use chatrelay_types::TranslateFn;

use crate::batching::BatchedNotification;
use crate::markdown;
use crate::prelude::*;

/// Group-channel titles list the members truncated to this many characters
const GROUP_CHANNEL_TITLE_RUNES: usize = 11;

/// A rendered email ready for the mail transport
#[derive(Debug, Default)]
pub struct RenderedEmail {
	pub subject: String,
	pub html_body: String,
	/// Inline parts by CID name (profile images)
	pub embedded: Vec<(String, Vec<u8>)>,
}

/// Transactional email events. Each maps to one template by name.
#[derive(Debug, Clone)]
pub enum TransactionalEvent {
	Verify { link: String },
	EmailChange { old_email: String, new_email: String },
	EmailChangeVerify { link: String },
	SigninChange { method: String },
	Welcome { verify_link: Option<String> },
	CloudWelcome { workspace_name: String },
	PasswordChange { method: String },
	Reset { link: String },
	MfaChange { activated: bool },
	Invite {
		sender_name: String,
		team_display_name: String,
		link: String,
		/// Operator-supplied HTML, sanitised before rendering
		custom_message: Option<String>,
	},
	GuestInvite {
		sender_name: String,
		team_display_name: String,
		link: String,
		custom_message: Option<String>,
		channel_names: Vec<String>,
	},
	Deactivate,
	LicenseUpForRenewal { renewal_link: String },
	RemoveExpiredLicense { renewal_link: String },
	IpFiltersChanged { changed_by: String },
}

impl TransactionalEvent {
	fn template_name(&self) -> &'static str {
		match self {
			Self::Verify { .. } => "verify_body",
			Self::EmailChange { .. } => "email_change_body",
			Self::EmailChangeVerify { .. } => "email_change_verify_body",
			Self::SigninChange { .. } => "signin_change_body",
			Self::Welcome { .. } => "welcome_body",
			Self::CloudWelcome { .. } => "cloud_welcome_email",
			Self::PasswordChange { .. } => "password_change_body",
			Self::Reset { .. } => "reset_body",
			Self::MfaChange { .. } => "mfa_change_body",
			Self::Invite { .. } | Self::GuestInvite { .. } => "invite_body",
			Self::Deactivate => "deactivate_body",
			Self::LicenseUpForRenewal { .. } => "license_up_for_renewal",
			Self::RemoveExpiredLicense { .. } => "remove_expired_license",
			Self::IpFiltersChanged { .. } => "ip_filters_changed",
		}
	}

	fn subject_key(&self) -> &'static str {
		match self {
			Self::Verify { .. } => "email.verify_subject",
			Self::EmailChange { .. } => "email.email_change_subject",
			Self::EmailChangeVerify { .. } => "email.email_change_verify_subject",
			Self::SigninChange { .. } => "email.signin_change_subject",
			Self::Welcome { .. } => "email.welcome_subject",
			Self::CloudWelcome { .. } => "email.cloud_welcome_subject",
			Self::PasswordChange { .. } => "email.password_change_subject",
			Self::Reset { .. } => "email.reset_subject",
			Self::MfaChange { .. } => "email.mfa_change_subject",
			Self::Invite { .. } | Self::GuestInvite { .. } => "email.invite_subject",
			Self::Deactivate => "email.deactivate_subject",
			Self::LicenseUpForRenewal { .. } => "email.license_up_for_renewal_subject",
			Self::RemoveExpiredLicense { .. } => "email.remove_expired_license_subject",
			Self::IpFiltersChanged { .. } => "email.ip_filters_changed_subject",
		}
	}
}

pub struct Renderer {
	config: Config,
	templates: Arc<TemplateContainer>,
	translate: TranslateFn,
}

impl Renderer {
	pub fn new(config: Config, templates: Arc<TemplateContainer>, translate: TranslateFn) -> Self {
		Self { config, templates, translate }
	}

	fn base_data(&self) -> TemplateData {
		TemplateData::new()
			.with_prop("site_url", self.config.service.site_url.as_str())
			.with_prop("site_name", self.config.team.site_name.as_str())
			.with_prop("organization", self.config.email.feedback_organization.as_str())
	}

	fn subject_args(&self) -> Value {
		json!({ "site_name": self.config.team.site_name })
	}

	/// Render one transactional event to a subject and HTML body
	pub fn render_transactional(&self, event: &TransactionalEvent) -> CrResult<RenderedEmail> {
		let mut data = self.base_data();
		let mut subject_args = self.subject_args();

		match event {
			TransactionalEvent::Verify { link }
			| TransactionalEvent::EmailChangeVerify { link }
			| TransactionalEvent::Reset { link } => {
				data = data.with_prop("link", link.as_str());
			}
			TransactionalEvent::EmailChange { old_email, new_email } => {
				data = data
					.with_prop("old_email", old_email.as_str())
					.with_prop("new_email", new_email.as_str());
			}
			TransactionalEvent::SigninChange { method }
			| TransactionalEvent::PasswordChange { method } => {
				data = data.with_prop("method", method.as_str());
			}
			TransactionalEvent::Welcome { verify_link } => {
				if let Some(link) = verify_link {
					data = data.with_prop("verify_link", link.as_str());
				}
			}
			TransactionalEvent::CloudWelcome { workspace_name } => {
				data = data.with_prop("workspace_name", workspace_name.as_str());
			}
			TransactionalEvent::MfaChange { activated } => {
				data = data.with_prop("activated", *activated);
			}
			TransactionalEvent::Invite { sender_name, team_display_name, link, custom_message } => {
				data = data
					.with_prop("sender_name", sender_name.as_str())
					.with_prop("team_display_name", team_display_name.as_str())
					.with_prop("link", link.as_str());
				if let Some(message) = custom_message {
					data = data.with_html("custom_message", markdown::sanitize_ugc(message));
				}
				subject_args = json!({
					"site_name": self.config.team.site_name,
					"sender_name": sender_name,
					"team_display_name": team_display_name,
				});
			}
			TransactionalEvent::GuestInvite {
				sender_name,
				team_display_name,
				link,
				custom_message,
				channel_names,
			} => {
				data = data
					.with_prop("sender_name", sender_name.as_str())
					.with_prop("team_display_name", team_display_name.as_str())
					.with_prop("link", link.as_str())
					.with_prop("guest", true)
					.with_prop("channel_names", channel_names.join(", "));
				if let Some(message) = custom_message {
					data = data.with_html("custom_message", markdown::sanitize_ugc(message));
				}
				subject_args = json!({
					"site_name": self.config.team.site_name,
					"sender_name": sender_name,
					"team_display_name": team_display_name,
				});
			}
			TransactionalEvent::Deactivate => {}
			TransactionalEvent::LicenseUpForRenewal { renewal_link }
			| TransactionalEvent::RemoveExpiredLicense { renewal_link } => {
				data = data.with_prop("renewal_link", renewal_link.as_str());
			}
			TransactionalEvent::IpFiltersChanged { changed_by } => {
				data = data.with_prop("changed_by", changed_by.as_str());
			}
		}

		let subject = (self.translate)(event.subject_key(), &subject_args);
		let html_body = self.templates.render(event.template_name(), &data)?;
		Ok(RenderedEmail { subject, html_body, embedded: Vec::new() })
	}

	/// Render the batched-notification email for one user.
	///
	/// Per-post failures (missing sender, missing channel, render problems)
	/// omit that post and keep the rest of the batch.
	pub async fn render_batch(
		&self,
		store: &dyn StoreAdapter,
		user: &User,
		notifications: &[BatchedNotification],
	) -> CrResult<RenderedEmail> {
		let military_time = self
			.preference_value(store, &user.id, PREFERENCE_NAME_USE_MILITARY_TIME)
			.await
			.is_some_and(|v| v == "true");
		let crt_enabled = resolve_crt(
			self.config.service.collapsed_threads,
			self.preference_value(store, &user.id, PREFERENCE_NAME_COLLAPSED_REPLY_THREADS)
				.await
				.as_deref(),
		);
		let generic = self.config.email.email_notification_contents_type
			== EmailNotificationContents::Generic;

		let mut embedded = Vec::new();
		let mut posts = Vec::with_capacity(notifications.len());

		for (idx, notification) in notifications.iter().enumerate() {
			let post = &notification.post;
			let channel = match store.channel_get(&post.channel_id).await {
				Ok(channel) => channel,
				Err(err) => {
					warn!("Skipping batched post {}: channel lookup failed: {}", post.id, err);
					continue;
				}
			};
			let sender_name = match store.user_get(&post.user_id).await {
				Ok(sender) => {
					if sender.nickname.is_empty() { sender.username } else { sender.nickname }
				}
				Err(err) => {
					debug!("Sender lookup failed for post {}: {}", post.id, err);
					post.username.clone()
				}
			};
			let sender_name = post
				.prop_str(chatrelay_types::post::PROP_OVERRIDE_USERNAME)
				.map_or(sender_name, |s| s.to_string());

			let avatar_cid = match store.profile_image(&post.user_id).await {
				Ok(image) => {
					let cid = format!("user-avatar-{}.png", idx);
					embedded.push((cid.clone(), image));
					Some(cid)
				}
				Err(err) => {
					debug!("No profile image for {}: {}", post.user_id, err);
					None
				}
			};

			let is_thread_reply = post.root_id.as_ref().is_some_and(|r| !r.is_empty());
			// group-channel display names already carry the member list
			let group_members: Vec<String> = if channel.channel_type == ChannelType::Group {
				channel.display_name.split(", ").map(str::to_string).collect()
			} else {
				Vec::new()
			};
			let title = channel_title(
				&channel,
				crt_enabled,
				is_thread_reply,
				&self.translate,
				&group_members,
			);

			let message_html = if generic {
				String::new()
			} else {
				self.process_message(store, post, &notification.team_name).await
			};

			posts.push(json!({
				"sender_name": sender_name,
				"channel_title": title,
				"time": format_post_time(post.create_at, military_time),
				"message_html": message_html,
				"view_url": format!(
					"{}/{}/pl/{}",
					self.config.service.site_url, notification.team_name, post.id
				),
				"avatar_cid": avatar_cid,
			}));
		}

		let data = self
			.base_data()
			.with_prop("count", notifications.len() as i64)
			.with_prop("generic", generic)
			.with_prop("posts", Value::Array(posts));

		let subject = (self.translate)(
			"email.notification_batch_subject",
			&json!({
				"site_name": self.config.team.site_name,
				"count": notifications.len(),
			}),
		);
		let html_body = self.templates.render("messages_notification", &data)?;
		Ok(RenderedEmail { subject, html_body, embedded })
	}

	async fn preference_value(
		&self,
		store: &dyn StoreAdapter,
		user_id: &str,
		name: &str,
	) -> Option<String> {
		store
			.preference_get(user_id, PREFERENCE_CATEGORY_DISPLAY_SETTINGS, name)
			.await
			.ok()
			.flatten()
			.map(|p| p.value)
	}

	/// Markdown to HTML, then hyperlink `~channel` mentions that resolve to
	/// public channels of the post's team
	async fn process_message(
		&self,
		store: &dyn StoreAdapter,
		post: &chatrelay_types::post::Post,
		team_name: &str,
	) -> String {
		let html = markdown::markdown_to_html(&post.message);
		let mentions = markdown::channel_mentions(&post.message);
		if mentions.is_empty() {
			return html;
		}

		let channels = match store.team_get_by_name(team_name).await {
			Ok(team) => match store.channels_get_by_names(&team.id, &mentions).await {
				Ok(channels) => channels
					.into_iter()
					.filter(|c| c.channel_type == ChannelType::Public)
					.map(|c| (c.name, c.display_name))
					.collect::<HashMap<_, _>>(),
				Err(err) => {
					debug!("Channel mention lookup failed: {}", err);
					return html;
				}
			},
			Err(err) => {
				debug!("Team lookup failed for '{}': {}", team_name, err);
				return html;
			}
		};

		markdown::link_channel_mentions(
			&html,
			&self.config.service.site_url,
			team_name,
			&channels,
		)
	}

}

/// CRT precedence: explicit user preference overrides the server default
pub fn resolve_crt(mode: CollapsedThreads, preference: Option<&str>) -> bool {
	match mode {
		CollapsedThreads::Disabled => false,
		CollapsedThreads::AlwaysOn => true,
		CollapsedThreads::DefaultOn | CollapsedThreads::DefaultOff => match preference {
			Some("on") => true,
			Some("off") => false,
			_ => mode == CollapsedThreads::DefaultOn,
		},
	}
}

/// Channel title shown above each batched post
pub fn channel_title(
	channel: &Channel,
	crt_enabled: bool,
	is_thread_reply: bool,
	translate: &TranslateFn,
	group_members: &[String],
) -> String {
	match channel.channel_type {
		ChannelType::Group => {
			let joined = group_members.join(", ");
			if joined.chars().count() > GROUP_CHANNEL_TITLE_RUNES {
				let truncated: String = joined.chars().take(GROUP_CHANNEL_TITLE_RUNES).collect();
				format!("{}...", truncated)
			} else {
				joined
			}
		}
		ChannelType::Direct if crt_enabled && is_thread_reply => {
			translate("email.batch.reply_in_dm", &json!({}))
		}
		_ if crt_enabled && is_thread_reply => translate(
			"email.batch.replies_in_channel",
			&json!({ "channel": channel.display_name }),
		),
		_ => channel.display_name.clone(),
	}
}

/// Post clock time as shown in the batch body: `14:30` with the
/// military-time preference, `2:30 PM` without (no leading zero)
fn format_post_time(at: Timestamp, military_time: bool) -> String {
	let time = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(at.0).unwrap_or_default();
	if military_time {
		time.format("%H:%M").to_string()
	} else {
		time.format("%-I:%M %p").to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn echo_translate() -> TranslateFn {
		Arc::new(|key: &str, _args: &Value| key.to_string())
	}

	fn renderer_with(templates: TemplateContainer) -> Renderer {
		let mut config = Config::default();
		config.service.site_url = "https://chat.example.com".into();
		Renderer::new(config, Arc::new(templates), echo_translate())
	}

	#[test]
	fn test_render_verify() {
		let templates = TemplateContainer::empty();
		templates.register("verify_body", "<a href=\"{{props.link}}\">verify</a>").unwrap();

		let renderer = renderer_with(templates);
		let email = renderer
			.render_transactional(&TransactionalEvent::Verify {
				link: "https://chat.example.com/verify?t=abc".into(),
			})
			.unwrap();

		assert_eq!(email.subject, "email.verify_subject");
		assert!(email.html_body.contains("verify?t=abc"));
	}

	#[test]
	fn test_invite_custom_message_sanitised() {
		let templates = TemplateContainer::empty();
		templates.register("invite_body", "{{{html.custom_message}}}").unwrap();

		let renderer = renderer_with(templates);
		let email = renderer
			.render_transactional(&TransactionalEvent::Invite {
				sender_name: "alice".into(),
				team_display_name: "Acme".into(),
				link: "https://chat.example.com/signup".into(),
				custom_message: Some("<p>join us</p><script>alert(1)</script>".into()),
			})
			.unwrap();

		assert!(email.html_body.contains("<p>join us</p>"));
		assert!(!email.html_body.contains("script"));
	}

	#[test]
	fn test_missing_template_is_error() {
		let renderer = renderer_with(TemplateContainer::empty());
		let err = renderer.render_transactional(&TransactionalEvent::Deactivate).unwrap_err();
		assert!(matches!(err, Error::ConfigError(_)));
	}

	#[test]
	fn test_resolve_crt() {
		use CollapsedThreads::*;
		assert!(!resolve_crt(Disabled, Some("on")));
		assert!(resolve_crt(AlwaysOn, Some("off")));
		assert!(resolve_crt(DefaultOff, Some("on")));
		assert!(!resolve_crt(DefaultOn, Some("off")));
		assert!(resolve_crt(DefaultOn, None));
		assert!(!resolve_crt(DefaultOff, None));
	}

	#[test]
	fn test_group_channel_title_truncated() {
		let channel = Channel {
			channel_type: ChannelType::Group,
			display_name: "alice, bob, carol".into(),
			..Channel::default()
		};
		let members =
			vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
		let title = channel_title(&channel, false, false, &echo_translate(), &members);
		assert_eq!(title, "alice, bob,...");
	}

	#[test]
	fn test_thread_reply_titles() {
		let translate = echo_translate();
		let dm = Channel { channel_type: ChannelType::Direct, ..Channel::default() };
		assert_eq!(channel_title(&dm, true, true, &translate, &[]), "email.batch.reply_in_dm");

		let channel = Channel {
			channel_type: ChannelType::Public,
			display_name: "Town Square".into(),
			..Channel::default()
		};
		assert_eq!(
			channel_title(&channel, true, true, &translate, &[]),
			"email.batch.replies_in_channel"
		);
		assert_eq!(channel_title(&channel, false, true, &translate, &[]), "Town Square");
	}

	#[test]
	fn test_format_post_time() {
		// 2018-04-25 18:30 UTC
		let at = Timestamp(1_524_681_000_000);
		assert_eq!(format_post_time(at, true), "18:30");
		// 12-hour rendering carries no leading zero on the hour
		assert_eq!(format_post_time(at, false), "6:30 PM");

		let morning = Timestamp(9 * 3600 * 1000 + 5 * 60 * 1000);
		assert_eq!(format_post_time(morning, true), "09:05");
		assert_eq!(format_post_time(morning, false), "9:05 AM");
	}
}

// vim: ts=4
