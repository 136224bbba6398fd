//! File-based failure counter storage.
//!
//! Persists counters as TOML so a restarted client resumes its failure
//! history.
//!
//! # File Location
//!
//! - Linux/macOS: `~/.config/circle-link/failures.toml`
//! - Windows: `%APPDATA%\circle-link\failures.toml`
//!
//! # File Format
//!
//! ```toml
//! consecutive_failures = 2
//! reconnect_attempts = 1
//! ```

use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

use super::FailureStore;
use crate::error::{CircleLinkError, Result};
use crate::models::FailureCounters;

/// TOML-file failure store.
///
/// Reads the file once at construction and keeps an in-memory copy; every
/// update rewrites the file through a temp file and rename while holding the
/// lock, so concurrent updates never interleave.
#[derive(Debug)]
pub struct FileFailureStore {
    file_path: PathBuf,
    cache: Mutex<FailureCounters>,
}

impl FileFailureStore {
    /// Default counters file path.
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("circle-link").join("failures.toml")
        } else if let Some(home_dir) = dirs::home_dir() {
            home_dir.join(".circle-link").join("failures.toml")
        } else {
            PathBuf::from(".circle-link").join("failures.toml")
        }
    }

    /// Open the store at the default location.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_path())
    }

    /// Open the store at a custom location, loading existing counters.
    pub fn with_path(file_path: impl Into<PathBuf>) -> Result<Self> {
        let file_path = file_path.into();
        let counters = read_counters(&file_path)?;
        log::debug!(
            "[circle-link] Loaded failure counters from {}: {:?}",
            file_path.display(),
            counters
        );
        Ok(Self {
            file_path,
            cache: Mutex::new(counters),
        })
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    fn save_to_disk(&self, counters: &FailureCounters) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    CircleLinkError::StorageError(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let contents = toml::to_string(counters).map_err(|e| {
            CircleLinkError::StorageError(format!("Failed to serialize failure counters: {}", e))
        })?;

        let tmp_path = self.file_path.with_extension("toml.tmp");
        fs::write(&tmp_path, contents).map_err(|e| {
            CircleLinkError::StorageError(format!("Failed to write {}: {}", tmp_path.display(), e))
        })?;
        fs::rename(&tmp_path, &self.file_path).map_err(|e| {
            CircleLinkError::StorageError(format!(
                "Failed to move {} into place: {}",
                tmp_path.display(),
                e
            ))
        })
    }
}

fn read_counters(path: &Path) -> Result<FailureCounters> {
    if !path.exists() {
        return Ok(FailureCounters::default());
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        CircleLinkError::StorageError(format!("Cannot read {}: {}", path.display(), e))
    })?;

    if contents.trim().is_empty() {
        return Ok(FailureCounters::default());
    }

    toml::from_str(&contents).map_err(|e| {
        CircleLinkError::StorageError(format!(
            "Corrupted failure counters file {}: {}. Delete it to start fresh.",
            path.display(),
            e.message()
        ))
    })
}

impl FailureStore for FileFailureStore {
    fn load(&self) -> Result<FailureCounters> {
        Ok(*self.cache.lock())
    }

    fn update(&self, f: &mut dyn FnMut(&mut FailureCounters)) -> Result<FailureCounters> {
        let mut guard = self.cache.lock();
        f(&mut guard);
        let counters = *guard;
        // The in-memory value stays authoritative even if the write fails.
        self.save_to_disk(&counters)?;
        Ok(counters)
    }
}
