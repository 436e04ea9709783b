use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use migrate_logging::{migrate_debug, migrate_info, migrate_warn};
use migrator_core::{validate_path, AttachmentLinker, FileRef, RawError};
use tokio_util::sync::CancellationToken;

use crate::retry::{pause, RetryExecutor};
use crate::source::SourceFetcher;
use crate::ExecError;

/// What happened to one thread's attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub downloaded: usize,
    pub already_present: usize,
    /// Dry-run only: files that would have been fetched.
    pub planned: usize,
    pub failed: usize,
    pub invalid: usize,
    /// Files whose links may be rewritten: on disk, or planned in dry-run.
    pub available: Vec<FileRef>,
}

/// Fetches attachments into the sandbox, one file at a time.
///
/// Only cancellation escapes as an error; every per-file problem is logged,
/// counted and skipped.
#[derive(Debug, Clone)]
pub struct AttachmentDownloader {
    linker: AttachmentLinker,
    delay: Duration,
    dry_run: bool,
}

impl AttachmentDownloader {
    pub fn new(linker: AttachmentLinker, delay: Duration, dry_run: bool) -> Self {
        Self {
            linker,
            delay,
            dry_run,
        }
    }

    pub fn linker(&self) -> &AttachmentLinker {
        &self.linker
    }

    pub async fn download_all(
        &self,
        files: &[FileRef],
        source: &dyn SourceFetcher,
        retry: &RetryExecutor,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport, ExecError> {
        let mut report = DownloadReport::default();
        let mut seen = HashSet::new();

        for file in files {
            if !seen.insert(file.id) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            if let Err(err) = file.validate() {
                migrate_warn!("Skipping attachment: {err}");
                report.invalid += 1;
                continue;
            }

            let local = self.linker.local_path(file);
            if let Err(err) = validate_path(&local, self.linker.sandbox_root()) {
                migrate_warn!("Skipping attachment {}: {err}", file.id);
                report.failed += 1;
                continue;
            }

            if self.dry_run {
                migrate_info!("[dry-run] would download {} to {}", file.url, local.display());
                report.planned += 1;
                report.available.push(file.clone());
                continue;
            }

            if local.exists() {
                migrate_debug!("Attachment {} already at {}", file.id, local.display());
                report.already_present += 1;
                report.available.push(file.clone());
                continue;
            }

            if let Some(parent) = local.parent() {
                if let Err(err) = fs::create_dir_all(parent) {
                    migrate_warn!("Cannot create {}: {err}", parent.display());
                    report.failed += 1;
                    continue;
                }
            }

            let label = format!("download attachment {}", file.id);
            let result = retry
                .execute(
                    &label,
                    || source.download(&file.url, &local),
                    |err: &RawError| source.classify(err),
                    cancel,
                )
                .await;
            match result {
                Ok(bytes) => {
                    migrate_info!("Downloaded {} ({bytes} bytes)", local.display());
                    report.downloaded += 1;
                    report.available.push(file.clone());
                }
                Err(ExecError::Cancelled) => return Err(ExecError::Cancelled),
                Err(ExecError::Failed(err)) => {
                    migrate_warn!("Attachment {} not downloaded: {err}", file.id);
                    report.failed += 1;
                }
            }

            pause(self.delay, cancel).await?;
        }

        Ok(report)
    }
}
