//! Filesystem storage adapters for the export engine.
//!
//! `FsAttachmentBackend` resolves attachment paths relative to the host's
//! file store root. `FsExportBackend` writes finished batch archives under
//! the export root, going through a temp file so a crash never leaves a
//! half-written zip at the final path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::{
	fs::{create_dir_all, remove_file, rename, File},
	io::{AsyncRead, AsyncWriteExt},
};

use chatrelay::backend::{AttachmentReader, ExportBackend, FileAttachmentBackend};
use chatrelay::prelude::*;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn tmp_file_path(final_path: &Path) -> PathBuf {
	let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
	let mut name = std::ffi::OsString::from("tmp-");
	if let Some(file_name) = final_path.file_name() {
		name.push(file_name);
	}
	name.push(format!(".{}.{}", std::process::id(), n));
	final_path.with_file_name(name)
}

#[derive(Debug)]
pub struct FsAttachmentBackend {
	base_dir: Box<Path>,
}

impl FsAttachmentBackend {
	pub fn new(base_dir: Box<Path>) -> Self {
		Self { base_dir }
	}
}

#[async_trait]
impl FileAttachmentBackend for FsAttachmentBackend {
	async fn reader(&self, path: &str) -> CrResult<AttachmentReader> {
		let full = self.base_dir.join(path);
		let file = File::open(&full)
			.await
			.map_err(|_| Error::NotFound(full.to_string_lossy().into_owned()))?;
		Ok(Box::new(file))
	}
}

#[derive(Debug)]
pub struct FsExportBackend {
	base_dir: Box<Path>,
}

impl FsExportBackend {
	pub async fn new(base_dir: Box<Path>) -> CrResult<Self> {
		create_dir_all(&base_dir).await?;
		Ok(Self { base_dir })
	}
}

#[async_trait]
impl ExportBackend for FsExportBackend {
	/// Writes the stream to a temp file, then renames it into place
	async fn write(
		&self,
		path: &str,
		reader: &mut (dyn AsyncRead + Send + Unpin),
	) -> CrResult<u64> {
		let final_path = self.base_dir.join(path);
		if let Some(parent) = final_path.parent() {
			create_dir_all(parent).await?;
		}

		let tmp_path = tmp_file_path(&final_path);
		let mut file = File::create(&tmp_path).await?;

		let res = async {
			let written = tokio::io::copy(reader, &mut file).await?;
			file.sync_all().await?;
			rename(&tmp_path, &final_path).await?;
			Ok::<u64, Error>(written)
		}
		.await;

		match res {
			Ok(written) => {
				info!("Wrote export archive {:?} ({} bytes)", final_path, written);
				Ok(written)
			}
			Err(err) => {
				warn!("Export write failed, removing tmpfile {:?}", tmp_path);
				remove_file(&tmp_path).await.ok();
				Err(err)
			}
		}
	}
}

// vim: ts=4
