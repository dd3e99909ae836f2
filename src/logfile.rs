//! Append-only log files shared by the transcript and the diagnostic log.

use crate::error::LoadError;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A freshly created log file. Every write is flushed before returning.
#[derive(Debug)]
pub(crate) struct LogFile {
    path: PathBuf,
    file: File,
}

impl LogFile {
    /// Create `path`. Its folder must exist and the file itself must not.
    pub fn create(path: &Path) -> Result<Self, LoadError> {
        if let Some(folder) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !folder.is_dir() {
                return Err(LoadError::MissingFolder(folder.to_path_buf()));
            }
        }
        if path.exists() {
            return Err(LoadError::LogExists(path.to_path_buf()));
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| LoadError::CreateLog {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_str(&mut self, s: &str) -> io::Result<()> {
        self.file.write_all(s.as_bytes())?;
        self.file.flush()
    }
}
