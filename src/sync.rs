//! Staging directory reconciliation.
//!
//! Files dropped into the staging directory (for example by a document
//! picker or file-sharing service) are moved into the user scripts
//! directory. The destination copy is replaced, never merged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::fsutil::{self, PathLocks};

/// Entries in the staging directory that are never moved
pub const SYNC_EXCLUSIONS: &[&str] = &["com.google.iid-keypair.plist", "Inbox"];

/// Failure moving a single staging entry
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Failed to remove existing {path}: {source}")]
    RemoveDestination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove staged {path}: {source}")]
    RemoveSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of one sync pass
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Entry names that now live in the destination
    pub moved: Vec<String>,
    /// Entries that failed at some step
    pub failed: Vec<(String, SyncError)>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.moved.is_empty() && self.failed.is_empty()
    }
}

/// Move every entry of `source` into `destination`.
///
/// Each entry is handled on its own: a failure is recorded and the pass
/// continues with the next entry.
pub fn sync_directory(source: &Path, destination: &Path, locks: &PathLocks) -> SyncReport {
    let mut report = SyncReport::default();

    let entries = match fs::read_dir(source) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = ?source, "Staging directory does not exist");
            return report;
        }
        Err(e) => {
            warn!(path = ?source, error = %e, "Failed to read staging directory");
            return report;
        }
    };

    if let Err(e) = fs::create_dir_all(destination) {
        warn!(path = ?destination, error = %e, "Failed to create sync destination");
    }

    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .filter(|name| !name.starts_with('.') && !SYNC_EXCLUSIONS.contains(&name.as_str()))
        .collect();
    names.sort();

    for name in names {
        let from = source.join(&name);
        let to = destination.join(&name);
        match locks.with_lock(&to, || move_entry(&from, &to)) {
            Ok(()) => {
                info!(file = %name, "Synced staged script");
                report.moved.push(name);
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to sync staged entry");
                report.failed.push((name, e));
            }
        }
    }

    report
}

fn move_entry(from: &Path, to: &Path) -> Result<(), SyncError> {
    fsutil::remove_entry(to).map_err(|source| SyncError::RemoveDestination {
        path: to.to_path_buf(),
        source,
    })?;
    fsutil::copy_entry(from, to).map_err(|source| SyncError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })?;
    fsutil::remove_entry(from).map_err(|source| SyncError::RemoveSource {
        path: from.to_path_buf(),
        source,
    })
}
