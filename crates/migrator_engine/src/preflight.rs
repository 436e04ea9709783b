use std::path::{Path, PathBuf};

use migrate_logging::migrate_info;
use migrator_core::RawError;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::persist::ensure_output_dir;
use crate::publish::DestinationPublisher;
use crate::retry::RetryExecutor;
use crate::source::SourceFetcher;
use crate::{ClassifiedError, ExecError};

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("cancelled during pre-flight checks")]
    Cancelled,
    #[error("source API check failed: {0}")]
    Source(ClassifiedError),
    #[error("destination check failed: {0}")]
    Destination(ClassifiedError),
    #[error("attachment directory {path}: {message}")]
    Sandbox { path: PathBuf, message: String },
}

fn split(err: ExecError, wrap: fn(ClassifiedError) -> PreflightError) -> PreflightError {
    match err {
        ExecError::Cancelled => PreflightError::Cancelled,
        ExecError::Failed(err) => wrap(err),
    }
}

/// Checks both APIs and the attachment directory before any unit runs.
///
/// Dry runs skip the destination check and only validate the directory path
/// without creating it.
pub async fn run_preflight(
    source: &dyn SourceFetcher,
    publisher: &dyn DestinationPublisher,
    retry: &RetryExecutor,
    category_id: &str,
    sandbox_root: &Path,
    cancel: &CancellationToken,
) -> Result<(), PreflightError> {
    migrate_info!("Running pre-flight checks...");
    if retry.is_dry_run() {
        migrate_info!("Dry-run mode: nothing will be published or written");
    }

    retry
        .execute("check source API", || source.ping(), |err: &RawError| source.classify(err), cancel)
        .await
        .map_err(|err| split(err, PreflightError::Source))?;
    migrate_info!("Source API access verified");

    if !retry.is_dry_run() {
        retry
            .execute(
                "check destination category",
                || publisher.verify_target(category_id),
                |err: &RawError| publisher.classify(err),
                cancel,
            )
            .await
            .map_err(|err| split(err, PreflightError::Destination))?;
        migrate_info!("Destination access verified");
    }

    check_sandbox(sandbox_root, retry.is_dry_run())?;
    migrate_info!("All pre-flight checks passed");
    Ok(())
}

fn check_sandbox(root: &Path, dry_run: bool) -> Result<(), PreflightError> {
    let sandbox_error = |message: String| PreflightError::Sandbox {
        path: root.to_path_buf(),
        message,
    };
    if root.as_os_str().is_empty() {
        return Err(sandbox_error("path is empty".into()));
    }
    if dry_run {
        if root.exists() && !root.is_dir() {
            return Err(sandbox_error("path exists and is not a directory".into()));
        }
        return Ok(());
    }
    ensure_output_dir(root).map_err(|err| sandbox_error(err.to_string()))
}
