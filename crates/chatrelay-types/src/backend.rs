//! Storage backend traits consumed by the export engine.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::CrResult;

pub type AttachmentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Read-side backend for post file attachments
#[async_trait]
pub trait FileAttachmentBackend: Send + Sync {
	async fn reader(&self, path: &str) -> CrResult<AttachmentReader>;
}

/// Write-side backend for finished export archives
#[async_trait]
pub trait ExportBackend: Send + Sync {
	/// Writes the stream to `path`, returns the number of bytes written
	async fn write(
		&self,
		path: &str,
		reader: &mut (dyn AsyncRead + Send + Unpin),
	) -> CrResult<u64>;
}

// vim: ts=4
