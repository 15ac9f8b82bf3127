//! Directory watching.
//!
//! Each watched root gets its own `notify` watcher. Changes are reported to a
//! single typed callback together with the [`WatchedRoot`] they came from.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

/// Directories the manager reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedRoot {
    /// Staging area synced into the user scripts directory
    Staging,
    /// User scripts directory; changes trigger a reload
    UserScripts,
}

/// Errors installing a watcher
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to create watcher for {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Whether an event should be reported as a directory change
fn is_relevant(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

/// Active watchers; dropping this stops watching
pub struct ChangeWatcher {
    watchers: Vec<(WatchedRoot, RecommendedWatcher)>,
}

impl ChangeWatcher {
    /// Watch every root, reporting changes to `on_change`.
    ///
    /// Missing directories are created first. A root that cannot be watched is
    /// logged and skipped so the others keep working.
    pub fn install<F>(roots: &[(WatchedRoot, PathBuf)], on_change: F) -> Self
    where
        F: Fn(WatchedRoot) + Send + Sync + 'static,
    {
        let on_change = Arc::new(on_change);
        let mut watchers = Vec::with_capacity(roots.len());

        for (root, path) in roots {
            match watch_root(*root, path, on_change.clone()) {
                Ok(watcher) => {
                    info!(root = ?root, path = ?path, "Watching directory");
                    watchers.push((*root, watcher));
                }
                Err(e) => warn!(root = ?root, error = %e, "Directory watch disabled"),
            }
        }

        Self { watchers }
    }

    /// Roots that are actually being watched
    pub fn roots(&self) -> Vec<WatchedRoot> {
        self.watchers.iter().map(|(root, _)| *root).collect()
    }
}

fn watch_root<F>(root: WatchedRoot, path: &Path, on_change: Arc<F>) -> Result<RecommendedWatcher, WatchError>
where
    F: Fn(WatchedRoot) + Send + Sync + 'static,
{
    if let Err(e) = fs::create_dir_all(path) {
        debug!(path = ?path, error = %e, "Could not create watched directory");
    }

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
        Ok(event) => {
            if is_relevant(&event.kind) {
                debug!(root = ?root, kind = ?event.kind, "Directory changed");
                on_change(root);
            }
        }
        Err(e) => warn!(root = ?root, error = %e, "Directory watcher error"),
    })
    .map_err(|source| WatchError::Create {
        path: path.to_path_buf(),
        source,
    })?;

    watcher
        .watch(path, RecursiveMode::NonRecursive)
        .map_err(|source| WatchError::Watch {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(watcher)
}
