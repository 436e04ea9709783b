use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use migrator_core::{AttachmentLinker, ChildItem, FileRef, RawError, RawErrorKind, WorkUnit};
use migrator_engine::{AttachmentDownloader, RetryExecutor, RetrySettings, SourceFetcher};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingSource {
    requested: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl SourceFetcher for RecordingSource {
    async fn ping(&self) -> Result<(), RawError> {
        Ok(())
    }

    async fn list_work_units(&self, _node_id: u64) -> Result<Vec<WorkUnit>, RawError> {
        Ok(Vec::new())
    }

    async fn list_children(&self, _unit: &WorkUnit) -> Result<Vec<ChildItem>, RawError> {
        Ok(Vec::new())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64, RawError> {
        self.requested.lock().unwrap().push(url.to_string());
        if url.ends_with("/missing") {
            return Err(RawError::new(RawErrorKind::Status(404), "not found"));
        }
        std::fs::write(dest, url.as_bytes()).map_err(|e| RawError::new(RawErrorKind::Io, e.to_string()))?;
        Ok(url.len() as u64)
    }
}

fn retry() -> RetryExecutor {
    RetryExecutor::new(RetrySettings {
        max_attempts: 2,
        backoff_multiplier: Duration::ZERO,
        base_delay: Duration::ZERO,
        ..RetrySettings::default()
    })
}

#[tokio::test]
async fn duplicates_invalid_and_failed_files_are_accounted_for() {
    let temp = TempDir::new().unwrap();
    let downloader = AttachmentDownloader::new(
        AttachmentLinker::new(temp.path().join("attachments")),
        Duration::ZERO,
        false,
    );
    let source = RecordingSource::default();
    let files = vec![
        FileRef::new(1, "a.png", "https://forum.example/files/1"),
        FileRef::new(1, "a.png", "https://forum.example/files/1"),
        FileRef::new(2, "evil.sh", "file:///etc/passwd"),
        FileRef::new(3, "gone.txt", "https://forum.example/files/missing"),
        FileRef::new(4, "../../escape.txt", "https://forum.example/files/4"),
    ];

    let report = downloader
        .download_all(&files, &source, &retry(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.downloaded, 2);
    assert_eq!(report.invalid, 1);
    assert_eq!(report.failed, 1);
    let available: Vec<u64> = report.available.iter().map(|f| f.id).collect();
    assert_eq!(available, vec![1, 4]);
    assert!(temp
        .path()
        .join("attachments/txt/attachment_4_escape.txt")
        .is_file());
    assert_eq!(source.requested.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn existing_files_are_not_fetched_again() {
    let temp = TempDir::new().unwrap();
    let linker = AttachmentLinker::new(temp.path().join("attachments"));
    let file = FileRef::new(9, "doc.pdf", "https://forum.example/files/9");
    let local = linker.local_path(&file);
    std::fs::create_dir_all(local.parent().unwrap()).unwrap();
    std::fs::write(&local, b"cached").unwrap();

    let downloader = AttachmentDownloader::new(linker, Duration::ZERO, false);
    let source = RecordingSource::default();
    let report = downloader
        .download_all(&[file], &source, &retry(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.already_present, 1);
    assert!(source.requested.lock().unwrap().is_empty());
    assert_eq!(std::fs::read(&local).unwrap(), b"cached");
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_the_pacing_delay_stops_the_batch() {
    let temp = TempDir::new().unwrap();
    let downloader = AttachmentDownloader::new(
        AttachmentLinker::new(temp.path().join("attachments")),
        Duration::from_secs(30),
        false,
    );
    let source = RecordingSource::default();
    let files = vec![
        FileRef::new(1, "a.png", "https://forum.example/files/1"),
        FileRef::new(2, "b.png", "https://forum.example/files/2"),
    ];
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let result = downloader
        .download_all(&files, &source, &retry(), &cancel)
        .await;

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(source.requested.lock().unwrap().len(), 1);
}
