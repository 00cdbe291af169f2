//! Directory watcher for template reloading.
//!
//! Polls the template directory and reloads the container when any `*.html`
//! file changes. Failures are pushed onto a bounded error stream; the caller
//! must consume that stream or the watcher blocks on the next failure.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::container::TemplateContainer;
use crate::prelude::*;

/// Snapshot of `*.html` mtimes under a directory
fn scan(dir: &Path) -> std::io::Result<BTreeMap<PathBuf, SystemTime>> {
	let mut seen = BTreeMap::new();
	for entry in std::fs::read_dir(dir)? {
		let entry = entry?;
		let path = entry.path();
		if path.extension().and_then(|e| e.to_str()) != Some("html") {
			continue;
		}
		let mtime = entry.metadata()?.modified()?;
		seen.insert(path, mtime);
	}
	Ok(seen)
}

/// Spawn a watcher task over `dir` that reloads `container` on change.
///
/// Returns the error stream. The task stops when the receiver is dropped.
pub fn spawn_watcher(
	container: Arc<TemplateContainer>,
	dir: impl Into<PathBuf>,
	poll_interval: Duration,
) -> flume::Receiver<Error> {
	let (tx, rx) = flume::bounded::<Error>(1);
	let dir = dir.into();

	tokio::spawn(async move {
		let mut last = scan(&dir).unwrap_or_default();
		let mut ticker = tokio::time::interval(poll_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		loop {
			ticker.tick().await;

			let current = match scan(&dir) {
				Ok(current) => current,
				Err(e) => {
					warn!("Template watcher scan failed: {}", e);
					if tx.send_async(Error::Io(e)).await.is_err() {
						break;
					}
					continue;
				}
			};

			if current != last {
				debug!("Template directory changed, reloading");
				if let Err(e) = container.reload() {
					error!("Template reload failed: {}", e);
					if tx.send_async(e).await.is_err() {
						break;
					}
				}
				last = current;
			}

			if tx.is_disconnected() {
				break;
			}
		}
	});

	rx
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::container::TemplateData;

	#[tokio::test]
	async fn test_watcher_reloads_on_change() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("t.html"), "first").unwrap();

		let container = Arc::new(TemplateContainer::load(dir.path()).unwrap());
		let errors =
			spawn_watcher(container.clone(), dir.path(), Duration::from_millis(20));

		std::fs::write(dir.path().join("t.html"), "second").unwrap();

		let mut reloaded = false;
		for _ in 0..50 {
			tokio::time::sleep(Duration::from_millis(20)).await;
			if container.render("t", &TemplateData::new()).unwrap() == "second" {
				reloaded = true;
				break;
			}
		}
		assert!(reloaded, "watcher never picked up the change");
		drop(errors);
	}

	#[tokio::test]
	async fn test_watcher_surfaces_parse_errors() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("t.html"), "ok {{props.x}}").unwrap();

		let container = Arc::new(TemplateContainer::load(dir.path()).unwrap());
		let errors =
			spawn_watcher(container.clone(), dir.path(), Duration::from_millis(20));

		// unbalanced braces -> parse failure on reload
		std::fs::write(dir.path().join("t.html"), "{{#if}}").unwrap();

		let err = tokio::time::timeout(Duration::from_secs(5), errors.recv_async())
			.await
			.unwrap()
			.unwrap();
		assert!(matches!(err, Error::ValidationError(_)));

		// the previous template set stays in place
		let out = container
			.render("t", &TemplateData::new().with_prop("x", 1))
			.unwrap();
		assert_eq!(out, "ok 1");
	}
}

// vim: ts=4
