//! Post message processing: markdown to HTML, channel-mention hyperlinks,
//! and whitelist sanitising of operator-supplied invite messages.

use std::collections::HashMap;

use pulldown_cmark::{html, Options, Parser};

/// Convert a post message (markdown) to HTML
pub fn markdown_to_html(message: &str) -> String {
	let mut options = Options::empty();
	options.insert(Options::ENABLE_STRIKETHROUGH);
	options.insert(Options::ENABLE_TABLES);
	let parser = Parser::new_ext(message, options);
	let mut out = String::new();
	html::push_html(&mut out, parser);
	out
}

/// Sanitise operator-supplied HTML with a UGC whitelist
pub fn sanitize_ugc(fragment: &str) -> String {
	ammonia::clean(fragment)
}

/// Collect `~channel-name` mentions from a message.
/// A mention starts at the beginning of the text or after whitespace and is
/// made of lowercase alphanumerics, dashes, and underscores.
pub fn channel_mentions(message: &str) -> Vec<String> {
	let mut names = Vec::new();
	let bytes = message.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'~' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
			let start = i + 1;
			let mut end = start;
			while end < bytes.len()
				&& (bytes[end].is_ascii_lowercase()
					|| bytes[end].is_ascii_digit()
					|| bytes[end] == b'-'
					|| bytes[end] == b'_')
			{
				end += 1;
			}
			if end > start {
				let name = &message[start..end];
				if !names.iter().any(|n| n == name) {
					names.push(name.to_string());
				}
			}
			i = end;
		} else {
			i += 1;
		}
	}
	names
}

/// Replace `~channel-name` mentions in rendered HTML with anchors pointing at
/// the channel's landing URL. Only channels present in `channels` (resolved
/// public channels of the team) are linked; unknown mentions stay as text.
pub fn link_channel_mentions(
	html: &str,
	site_url: &str,
	team_name: &str,
	channels: &HashMap<String, String>,
) -> String {
	let mut out = html.to_string();
	for (name, display_name) in channels {
		let mention = format!("~{}", name);
		let anchor = format!(
			"<a href=\"{}/landing#/{}/channels/{}\">~{}</a>",
			site_url, team_name, name, display_name
		);
		out = out.replace(&mention, &anchor);
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_markdown_basic() {
		let html = markdown_to_html("hello **world**");
		assert_eq!(html.trim(), "<p>hello <strong>world</strong></p>");
	}

	#[test]
	fn test_sanitize_strips_script() {
		let clean = sanitize_ugc("<p>welcome</p><script>alert(1)</script>");
		assert!(clean.contains("<p>welcome</p>"));
		assert!(!clean.contains("script"));
	}

	#[test]
	fn test_channel_mentions() {
		let names = channel_mentions("see ~town-square and ~dev_ops, not mid~word");
		assert_eq!(names, vec!["town-square", "dev_ops"]);
	}

	#[test]
	fn test_mentions_deduplicated() {
		let names = channel_mentions("~general again ~general");
		assert_eq!(names, vec!["general"]);
	}

	#[test]
	fn test_link_known_mentions_only() {
		let mut channels = HashMap::new();
		channels.insert("town-square".to_string(), "Town Square".to_string());

		let html = markdown_to_html("go to ~town-square or ~secret");
		let linked = link_channel_mentions(&html, "https://chat.example.com", "acme", &channels);

		assert!(linked.contains(
			"<a href=\"https://chat.example.com/landing#/acme/channels/town-square\">~Town Square</a>"
		));
		assert!(linked.contains("~secret"));
		assert!(!linked.contains("channels/secret"));
	}
}

// vim: ts=4
