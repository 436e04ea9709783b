use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use migrate_logging::{migrate_debug, migrate_info, migrate_warn};
use migrator_core::{ProgressState, ThreadId, WorkUnit};
use thiserror::Error;

use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to encode progress state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to persist progress to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: PersistError,
    },
}

/// Durable progress record, checkpointed after every state change.
///
/// Loading never fails: a missing or unreadable file starts empty, and a
/// corrupt one also starts empty after a copy is saved as `<file>.corrupt`.
#[derive(Debug)]
pub struct ProgressLedger {
    state: ProgressState,
    writer: AtomicFileWriter,
    dry_run: bool,
}

impl ProgressLedger {
    pub fn open(path: impl Into<PathBuf>, dry_run: bool) -> Self {
        let path = path.into();
        let state = load_state(&path);
        Self {
            state,
            writer: AtomicFileWriter::new(path),
            dry_run,
        }
    }

    pub fn path(&self) -> &Path {
        self.writer.target()
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn mark_completed(&mut self, id: ThreadId) -> Result<(), LedgerError> {
        if self.state.mark_completed(id) {
            self.checkpoint()?;
        }
        Ok(())
    }

    pub fn mark_failed(&mut self, id: ThreadId) -> Result<(), LedgerError> {
        if self.state.mark_failed(id) {
            self.checkpoint()?;
        }
        Ok(())
    }

    pub fn filter_pending(&self, candidates: Vec<WorkUnit>) -> Vec<WorkUnit> {
        self.state.filter_pending(candidates)
    }

    /// Seeds the last processed id in memory; the sets stay as they are.
    /// Written out with the next checkpoint.
    pub fn set_resume_from(&mut self, id: ThreadId) {
        migrate_info!("Resuming from thread {id}");
        self.state.set_resume_from(id);
    }

    fn checkpoint(&mut self) -> Result<(), LedgerError> {
        self.state.touch(Utc::now().timestamp());
        if self.dry_run {
            migrate_debug!("[dry-run] skipping progress write to {}", self.path().display());
            return Ok(());
        }
        let encoded = serde_json::to_vec_pretty(&self.state)?;
        self.writer
            .write(&encoded)
            .map_err(|source| LedgerError::Persist {
                path: self.path().to_path_buf(),
                source,
            })
    }
}

fn load_state(path: &Path) -> ProgressState {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            migrate_info!("No progress file at {}, starting fresh", path.display());
            return ProgressState::new();
        }
        Err(err) => {
            migrate_warn!(
                "Cannot read progress file {}: {err}; starting with empty progress",
                path.display()
            );
            return ProgressState::new();
        }
    };

    match serde_json::from_slice::<ProgressState>(&raw) {
        Ok(mut state) => {
            state.normalize();
            migrate_info!(
                "Loaded progress from {}: {} completed, {} failed, last thread {}",
                path.display(),
                state.completed().len(),
                state.failed().len(),
                state.last_thread_id()
            );
            state
        }
        Err(err) => {
            migrate_warn!(
                "Progress file {} is corrupt ({err}); starting with empty progress",
                path.display()
            );
            preserve_corrupt_copy(path);
            ProgressState::new()
        }
    }
}

/// The first checkpoint replaces the corrupt file, so keep a copy beside it.
fn preserve_corrupt_copy(path: &Path) {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".corrupt");
    let backup = PathBuf::from(backup);
    match fs::copy(path, &backup) {
        Ok(_) => migrate_warn!("Corrupt progress file kept at {}", backup.display()),
        Err(err) => migrate_warn!("Could not keep a copy of the corrupt progress file: {err}"),
    }
}
