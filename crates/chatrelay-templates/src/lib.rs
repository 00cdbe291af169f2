//! Named HTML template container.
//!
//! Holds a set of templates loaded from `*.html` files in a directory; the
//! logical template name is the file stem. Rendering goes through Handlebars
//! with strict mode off (missing optional props render empty). An optional
//! watcher task re-parses the directory atomically when files change and
//! surfaces failures on an error stream the caller must consume.

pub mod container;
pub mod watcher;

mod prelude;

pub use container::{TemplateContainer, TemplateData};
pub use watcher::spawn_watcher;

// vim: ts=4
