use chatrelay::backend::{ExportBackend, FileAttachmentBackend};
use chatrelay_export_adapter_fs::{FsAttachmentBackend, FsExportBackend};
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn test_export_write_creates_nested_dirs() {
	let dir = tempfile::tempdir().unwrap();
	let backend = FsExportBackend::new(dir.path().into()).await.unwrap();

	let zip = b"PK\x05\x06fake-archive";
	let written =
		backend.write("export/20260801-120000/batch001-0-500.zip", &mut &zip[..]).await.unwrap();

	assert_eq!(written, zip.len() as u64);
	let on_disk =
		std::fs::read(dir.path().join("export/20260801-120000/batch001-0-500.zip")).unwrap();
	assert_eq!(on_disk, zip);
}

#[tokio::test]
async fn test_export_write_leaves_no_tmpfile() {
	let dir = tempfile::tempdir().unwrap();
	let backend = FsExportBackend::new(dir.path().into()).await.unwrap();

	backend.write("batch.zip", &mut &b"data"[..]).await.unwrap();

	let names: Vec<String> = std::fs::read_dir(dir.path())
		.unwrap()
		.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
		.collect();
	assert_eq!(names, vec!["batch.zip"]);
}

#[tokio::test]
async fn test_attachment_reader_round_trip() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::create_dir_all(dir.path().join("data")).unwrap();
	std::fs::write(dir.path().join("data/file1.bin"), b"attachment-bytes").unwrap();

	let backend = FsAttachmentBackend::new(dir.path().into());
	let mut reader = backend.reader("data/file1.bin").await.unwrap();
	let mut bytes = Vec::new();
	reader.read_to_end(&mut bytes).await.unwrap();

	assert_eq!(bytes, b"attachment-bytes");
}

#[tokio::test]
async fn test_attachment_reader_missing_file() {
	let dir = tempfile::tempdir().unwrap();
	let backend = FsAttachmentBackend::new(dir.path().into());

	let err = backend.reader("nope.bin").await.map(|_| ()).unwrap_err();
	assert!(matches!(err, chatrelay::error::Error::NotFound(_)));
}

// vim: ts=4
