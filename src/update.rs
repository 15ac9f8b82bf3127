//! Remote script updates.
//!
//! For every script with an `@updateURL` the small probe file is fetched and
//! its header compared against the local version. When the probe advertises a
//! strictly newer version the full body is downloaded from `@downloadURL` and
//! atomically written over the script's file.
//!
//! Scripts are processed concurrently. [`UpdateChecker::check_and_apply`]
//! yields one [`UpdateOutcome`] per script as each finishes; the stream ends
//! once every script has been handled. Dropping the stream abandons pending
//! fetches, while a write that already started still completes atomically.

use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::fetch::{FetchError, ScriptFetcher};
use crate::fsutil::{self, PathLocks};
use crate::layout::ScriptLayout;
use crate::metadata;
use crate::script::Script;
use crate::version::is_newer;

/// Errors updating one script
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Write task failed: {0}")]
    Task(String),
}

/// Why a script was not considered for update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoUpdateUrl,
    NoDownloadUrl,
    MissingVersion,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUpdateUrl => write!(f, "no update URL"),
            Self::NoDownloadUrl => write!(f, "probe has no download URL"),
            Self::MissingVersion => write!(f, "version missing"),
        }
    }
}

/// Result of one script's update attempt
#[derive(Debug)]
pub enum UpdateOutcome {
    Skipped {
        file_name: String,
        reason: SkipReason,
    },
    UpToDate {
        file_name: String,
    },
    Updated {
        file_name: String,
        from: String,
        to: String,
        path: PathBuf,
    },
    Failed {
        file_name: String,
        error: UpdateError,
    },
}

impl UpdateOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            Self::Skipped { file_name, .. }
            | Self::UpToDate { file_name }
            | Self::Updated { file_name, .. }
            | Self::Failed { file_name, .. } => file_name,
        }
    }
}

/// Summary of a complete update cycle
#[derive(Debug, Default)]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub up_to_date: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl UpdateReport {
    pub fn record(&mut self, outcome: &UpdateOutcome) {
        let name = outcome.file_name().to_string();
        match outcome {
            UpdateOutcome::Updated { .. } => self.updated.push(name),
            UpdateOutcome::UpToDate { .. } => self.up_to_date.push(name),
            UpdateOutcome::Skipped { .. } => self.skipped.push(name),
            UpdateOutcome::Failed { error, .. } => self.failed.push((name, error.to_string())),
        }
    }

    pub fn total(&self) -> usize {
        self.updated.len() + self.up_to_date.len() + self.skipped.len() + self.failed.len()
    }
}

/// Fetches probes and applies newer script bodies
pub struct UpdateChecker {
    fetcher: Arc<dyn ScriptFetcher>,
    layout: Arc<ScriptLayout>,
    locks: Arc<PathLocks>,
}

impl UpdateChecker {
    pub fn new(fetcher: Arc<dyn ScriptFetcher>, layout: Arc<ScriptLayout>, locks: Arc<PathLocks>) -> Self {
        Self {
            fetcher,
            layout,
            locks,
        }
    }

    /// Where an updated body for `script` is written
    pub fn destination(&self, script: &Script) -> PathBuf {
        self.layout
            .update_destination(&script.file_name, script.is_user_script, script.is_core())
    }

    /// Check every script concurrently, yielding outcomes as they complete.
    ///
    /// Scripts resolving to the same destination are checked once.
    pub fn check_and_apply(&self, scripts: Vec<Arc<Script>>) -> BoxStream<'static, UpdateOutcome> {
        let mut seen = HashSet::new();
        let tasks: FuturesUnordered<_> = scripts
            .into_iter()
            .filter_map(|script| {
                let destination = self.destination(&script);
                seen.insert(destination.clone()).then_some((script, destination))
            })
            .map(|(script, destination)| {
                let fetcher = self.fetcher.clone();
                let locks = self.locks.clone();
                async move {
                    let file_name = script.file_name.clone();
                    match update_script(fetcher, locks, script, destination).await {
                        Ok(outcome) => outcome,
                        Err(error) => {
                            warn!(file = %file_name, error = %error, "Script update failed");
                            UpdateOutcome::Failed { file_name, error }
                        }
                    }
                }
            })
            .collect();

        debug!(count = tasks.len(), "Checking scripts for updates");
        tasks.boxed()
    }
}

async fn update_script(
    fetcher: Arc<dyn ScriptFetcher>,
    locks: Arc<PathLocks>,
    script: Arc<Script>,
    destination: PathBuf,
) -> Result<UpdateOutcome, UpdateError> {
    let file_name = script.file_name.clone();
    let skipped = |reason: SkipReason| -> Result<UpdateOutcome, UpdateError> {
        debug!(file = %file_name, %reason, "Skipping update");
        Ok(UpdateOutcome::Skipped {
            file_name: file_name.clone(),
            reason,
        })
    };

    let Some(update_url) = script.update_url.as_deref() else {
        return skipped(SkipReason::NoUpdateUrl);
    };

    let probe = fetcher.fetch_text(update_url).await?;
    let meta = metadata::parse(&probe);

    let Some(download_url) = meta.first("downloadURL") else {
        return skipped(SkipReason::NoDownloadUrl);
    };
    let (Some(new_version), Some(old_version)) = (meta.first("version"), script.version.as_deref())
    else {
        return skipped(SkipReason::MissingVersion);
    };

    if !is_newer(new_version, old_version) {
        debug!(file = %file_name, local = %old_version, remote = %new_version, "Script is up to date");
        return Ok(UpdateOutcome::UpToDate {
            file_name: file_name.clone(),
        });
    }

    let body = fetcher.fetch_text(download_url).await?;

    let path = destination.clone();
    tokio::task::spawn_blocking(move || {
        locks.with_lock(&path, || fsutil::write_atomic(&path, body.as_bytes()))
    })
    .await
    .map_err(|e| UpdateError::Task(e.to_string()))?
    .map_err(|source| UpdateError::Write {
        path: destination.clone(),
        source,
    })?;

    info!(
        file = %file_name,
        from = %old_version,
        to = %new_version,
        path = ?destination,
        "Updated script"
    );
    Ok(UpdateOutcome::Updated {
        file_name: file_name.clone(),
        from: old_version.to_string(),
        to: new_version.to_string(),
        path: destination,
    })
}
