use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory {path} missing or not writable: {message}")]
    Directory { path: PathBuf, message: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure `dir` exists and accepts new files; create it if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    let directory_error = |message: String| PersistError::Directory {
        path: dir.to_path_buf(),
        message,
    };
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| directory_error(e.to_string()))?;
        if !meta.is_dir() {
            return Err(directory_error("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| directory_error(e.to_string()))?;
    }
    // Writability probe; the temp file is removed on drop.
    NamedTempFile::new_in(dir).map_err(|e| directory_error(e.to_string()))?;
    Ok(())
}

/// Replaces a file in one step: write a sibling temp file, fsync, rename over.
///
/// Readers see either the previous contents or the new ones, never a mix.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    target: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn parent_dir(&self) -> PathBuf {
        match self.target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    pub fn write(&self, content: &[u8]) -> Result<(), PersistError> {
        let dir = self.parent_dir();
        if !dir.is_dir() {
            fs::create_dir_all(&dir)?;
        }

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.target).map_err(|e| PersistError::Io(e.error))?;
        Ok(())
    }
}
