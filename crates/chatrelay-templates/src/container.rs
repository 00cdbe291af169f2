//! Template container: a named set of parsed HTML templates behind a
//! read/write lock so the watcher can swap the whole set atomically.

use handlebars::Handlebars;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::prelude::*;

/// Data handed to a template: a free-form map of props (escaped on output)
/// and a map of pre-escaped HTML fragments (templates inject these with
/// triple braces).
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateData {
	pub props: Map<String, Value>,
	pub html: Map<String, Value>,
}

impl TemplateData {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_prop(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.props.insert(key.into(), value.into());
		self
	}

	/// Insert a fragment that is already safe HTML
	pub fn with_html(mut self, key: &str, fragment: impl Into<String>) -> Self {
		self.html.insert(key.into(), Value::String(fragment.into()));
		self
	}
}

pub struct TemplateContainer {
	registry: RwLock<Handlebars<'static>>,
	dir: PathBuf,
}

impl TemplateContainer {
	/// Parse every `*.html` under `dir`; the logical name is the file stem
	pub fn load(dir: impl AsRef<Path>) -> CrResult<Self> {
		let dir = dir.as_ref().to_path_buf();
		let registry = Self::parse_dir(&dir)?;
		Ok(Self { registry: RwLock::new(registry), dir })
	}

	/// Empty container for tests and hosts that register templates manually
	pub fn empty() -> Self {
		Self { registry: RwLock::new(Handlebars::new()), dir: PathBuf::new() }
	}

	pub fn register(&self, name: &str, source: &str) -> CrResult<()> {
		self.registry
			.write()
			.register_template_string(name, source)
			.map_err(|e| Error::ValidationError(format!("bad template '{}': {}", name, e)))
	}

	fn parse_dir(dir: &Path) -> CrResult<Handlebars<'static>> {
		let mut registry = Handlebars::new();

		for entry in std::fs::read_dir(dir)? {
			let entry = entry?;
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some("html") {
				continue;
			}
			let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
				continue;
			};
			let source = std::fs::read_to_string(&path)?;
			registry.register_template_string(name, &source).map_err(|e| {
				Error::ValidationError(format!("failed to parse template {:?}: {}", path, e))
			})?;
			debug!("Parsed template {}", name);
		}

		Ok(registry)
	}

	/// Re-parse the directory and swap the template set atomically.
	/// On parse failure the previous set stays in place.
	pub fn reload(&self) -> CrResult<()> {
		let fresh = Self::parse_dir(&self.dir)?;
		*self.registry.write() = fresh;
		info!("Reloaded templates from {:?}", self.dir);
		Ok(())
	}

	pub fn has_template(&self, name: &str) -> bool {
		self.registry.read().has_template(name)
	}

	pub fn render(&self, name: &str, data: &TemplateData) -> CrResult<String> {
		let registry = self.registry.read();
		if !registry.has_template(name) {
			return Err(Error::ConfigError(format!("template not found: {}", name)));
		}
		registry
			.render(name, data)
			.map_err(|e| Error::ValidationError(format!("failed to render '{}': {}", name, e)))
	}

	pub fn render_to(
		&self,
		writer: &mut dyn std::io::Write,
		name: &str,
		data: &TemplateData,
	) -> CrResult<()> {
		let registry = self.registry.read();
		if !registry.has_template(name) {
			return Err(Error::ConfigError(format!("template not found: {}", name)));
		}
		registry
			.render_to_write(name, data, writer)
			.map_err(|e| Error::ValidationError(format!("failed to render '{}': {}", name, e)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_render_props_escaped() {
		let container = TemplateContainer::empty();
		container.register("greeting", "<p>Hello {{props.name}}</p>").unwrap();

		let data = TemplateData::new().with_prop("name", "<b>Alice</b>");
		let out = container.render("greeting", &data).unwrap();
		assert_eq!(out, "<p>Hello &lt;b&gt;Alice&lt;/b&gt;</p>");
	}

	#[test]
	fn test_render_html_fragment_raw() {
		let container = TemplateContainer::empty();
		container.register("body", "<div>{{{html.message}}}</div>").unwrap();

		let data = TemplateData::new().with_html("message", "<p>already safe</p>");
		let out = container.render("body", &data).unwrap();
		assert_eq!(out, "<div><p>already safe</p></div>");
	}

	#[test]
	fn test_missing_template() {
		let container = TemplateContainer::empty();
		let err = container.render("nope", &TemplateData::new()).unwrap_err();
		assert!(matches!(err, Error::ConfigError(_)));
	}

	#[test]
	fn test_render_to_writer() {
		let container = TemplateContainer::empty();
		container.register("t", "x={{props.x}}").unwrap();

		let mut buf = Vec::new();
		let data = TemplateData::new().with_prop("x", 7);
		container.render_to(&mut buf, "t", &data).unwrap();
		assert_eq!(String::from_utf8(buf).unwrap(), "x=7");
	}

	#[test]
	fn test_load_from_directory() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("welcome_body.html"), "Hi {{props.name}}").unwrap();
		std::fs::write(dir.path().join("ignored.txt"), "not a template").unwrap();

		let container = TemplateContainer::load(dir.path()).unwrap();
		assert!(container.has_template("welcome_body"));
		assert!(!container.has_template("ignored"));

		let out = container
			.render("welcome_body", &TemplateData::new().with_prop("name", "Bob"))
			.unwrap();
		assert_eq!(out, "Hi Bob");
	}

	#[test]
	fn test_reload_picks_up_changes() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("t.html"), "v1").unwrap();

		let container = TemplateContainer::load(dir.path()).unwrap();
		assert_eq!(container.render("t", &TemplateData::new()).unwrap(), "v1");

		std::fs::write(dir.path().join("t.html"), "v2").unwrap();
		container.reload().unwrap();
		assert_eq!(container.render("t", &TemplateData::new()).unwrap(), "v2");
	}
}

// vim: ts=4
