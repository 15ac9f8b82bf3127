//! Persisted plugin activation list and asset markers.
//!
//! Stored as JSON:
//!
//! ```json
//! {
//!   "loaded_plugins": ["canvas-render.user.js", "draw-tools.user.js"],
//!   "version": "0.30.1",
//!   "build": "7",
//!   "suite": "original",
//!   "last_update_check": "2024-05-01T10:00:00Z"
//! }
//! ```
//!
//! Plugins are referenced by file name so the order survives restarts and
//! rebuilding of the discovered plugin set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::assets::ScriptSuite;
use crate::fsutil;
use crate::version::compare_versions;

/// Errors persisting preferences
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// On-disk preferences document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    /// Enabled plugin file names in load order
    #[serde(default)]
    pub loaded_plugins: Vec<String>,
    /// App version that last installed the bundled assets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// App build that last installed the bundled assets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    /// Script suite currently installed in the library
    #[serde(default)]
    pub suite: ScriptSuite,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_check: Option<DateTime<Utc>>,
}

/// Ordered set of enabled plugin names backed by the preferences file
#[derive(Debug)]
pub struct ActivationStore {
    path: PathBuf,
    prefs: Preferences,
    active: HashSet<String>,
}

impl ActivationStore {
    /// Load from disk, starting fresh when the file is missing or corrupt
    pub fn load(path: &Path) -> Self {
        let prefs = read_preferences(path);
        let active = prefs.loaded_plugins.iter().cloned().collect();
        Self {
            path: path.to_path_buf(),
            prefs,
            active,
        }
    }

    /// Persist `prefs` and adopt it only once the write succeeded
    fn commit(&mut self, prefs: Preferences) -> Result<(), ActivationError> {
        write_preferences(&self.path, &prefs)?;
        self.active = prefs.loaded_plugins.iter().cloned().collect();
        self.prefs = prefs;
        Ok(())
    }

    /// Re-read the list from disk, picking up external edits
    pub fn reload(&mut self) {
        self.prefs = read_preferences(&self.path);
        self.active = self.prefs.loaded_plugins.iter().cloned().collect();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preferences(&self) -> &Preferences {
        &self.prefs
    }

    /// Enabled plugin names in stored order
    pub fn names(&self) -> &[String] {
        &self.prefs.loaded_plugins
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.active.contains(file_name)
    }

    /// Enable or disable a plugin by file name.
    ///
    /// Returns `Ok(false)` when the plugin already was in the requested state;
    /// nothing is written in that case. On a failed write the list is left
    /// as it was.
    pub fn set_active(&mut self, file_name: &str, loaded: bool) -> Result<bool, ActivationError> {
        let position = self
            .prefs
            .loaded_plugins
            .iter()
            .position(|name| name == file_name);

        let mut prefs = self.prefs.clone();
        match (position, loaded) {
            (Some(index), false) => {
                prefs.loaded_plugins.remove(index);
            }
            (None, true) => {
                prefs.loaded_plugins.push(file_name.to_string());
            }
            _ => return Ok(false),
        }

        self.commit(prefs)?;
        info!(plugin = %file_name, loaded, "Plugin activation changed");
        Ok(true)
    }

    /// Whether bundled assets must be copied again for this app version.
    ///
    /// True when no markers are stored, the stored version is older than the
    /// running one, or the build differs.
    pub fn needs_asset_refresh(&self, version: &str, build: u64) -> bool {
        let Some(stored_version) = self.prefs.version.as_deref() else {
            return true;
        };
        let older = compare_versions(stored_version, version)
            .map(|ord| ord.is_lt())
            .unwrap_or(true);
        let build_changed = self.prefs.build.as_deref() != Some(build.to_string().as_str());
        older || build_changed
    }

    /// Record that the bundled assets of `suite` were installed
    pub fn record_assets(
        &mut self,
        version: &str,
        build: u64,
        suite: ScriptSuite,
    ) -> Result<(), ActivationError> {
        let mut prefs = self.prefs.clone();
        prefs.version = Some(version.to_string());
        prefs.build = Some(build.to_string());
        prefs.suite = suite;
        self.commit(prefs)
    }

    pub fn record_update_check(&mut self, at: DateTime<Utc>) -> Result<(), ActivationError> {
        let mut prefs = self.prefs.clone();
        prefs.last_update_check = Some(at);
        self.commit(prefs)
    }

    pub fn last_update_check(&self) -> Option<DateTime<Utc>> {
        self.prefs.last_update_check
    }

    pub fn suite(&self) -> ScriptSuite {
        self.prefs.suite
    }
}

fn write_preferences(path: &Path, prefs: &Preferences) -> Result<(), ActivationError> {
    let json = serde_json::to_string_pretty(prefs)?;
    fsutil::write_atomic(path, json.as_bytes())?;
    debug!(path = ?path, count = prefs.loaded_plugins.len(), "Saved preferences");
    Ok(())
}

fn read_preferences(path: &Path) -> Preferences {
    if !path.exists() {
        return Preferences::default();
    }
    match fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<Preferences>(&content) {
            Ok(prefs) => {
                debug!(count = prefs.loaded_plugins.len(), "Loaded preferences");
                prefs
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to parse preferences, starting fresh");
                Preferences::default()
            }
        },
        Err(e) => {
            warn!(path = ?path, error = %e, "Failed to read preferences");
            Preferences::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ActivationStore) {
        let dir = TempDir::new().unwrap();
        let store = ActivationStore::load(&dir.path().join("preferences.json"));
        (dir, store)
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let (_dir, store) = store();
        assert!(store.names().is_empty());
        assert_eq!(store.suite(), ScriptSuite::Original);
    }

    #[test]
    fn test_enable_appends_in_order_and_persists() {
        let (dir, mut store) = store();
        assert!(store.set_active("b.user.js", true).unwrap());
        assert!(store.set_active("a.user.js", true).unwrap());

        assert_eq!(store.names(), ["b.user.js", "a.user.js"]);
        assert!(store.contains("a.user.js"));

        let reloaded = ActivationStore::load(&dir.path().join("preferences.json"));
        assert_eq!(reloaded.names(), ["b.user.js", "a.user.js"]);
    }

    #[test]
    fn test_toggle_round_trip_restores_list() {
        let (_dir, mut store) = store();
        for name in ["a.js", "b.js", "c.js"] {
            store.set_active(name, true).unwrap();
        }
        let before = store.names().to_vec();

        store.set_active("d.js", true).unwrap();
        store.set_active("d.js", false).unwrap();

        assert_eq!(store.names(), before.as_slice());
        assert!(!store.contains("d.js"));
    }

    #[test]
    fn test_noop_toggles_do_not_write() {
        let (dir, mut store) = store();
        assert!(!store.set_active("a.js", false).unwrap());
        assert!(!dir.path().join("preferences.json").exists());

        store.set_active("a.js", true).unwrap();
        assert!(!store.set_active("a.js", true).unwrap());
        assert_eq!(store.names(), ["a.js"]);
    }

    #[test]
    fn test_failed_write_leaves_list_unchanged() {
        let dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "").unwrap();
        let path = blocker.join("preferences.json");
        let mut store = ActivationStore::load(&path);

        assert!(store.set_active("a.js", true).is_err());
        assert!(store.names().is_empty());
        assert!(!store.contains("a.js"));

        // Once the path is writable the same toggle goes through
        fs::remove_file(&blocker).unwrap();
        assert!(store.set_active("a.js", true).unwrap());
        let reloaded = ActivationStore::load(&path);
        assert_eq!(reloaded.names(), ["a.js"]);
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preferences.json");
        fs::write(&path, "{not json").unwrap();
        let store = ActivationStore::load(&path);
        assert!(store.names().is_empty());
    }

    #[test]
    fn test_reload_picks_up_external_edits() {
        let (dir, mut store) = store();
        store.set_active("a.js", true).unwrap();

        let path = dir.path().join("preferences.json");
        fs::write(&path, r#"{"loaded_plugins": ["x.js", "y.js"]}"#).unwrap();
        store.reload();

        assert_eq!(store.names(), ["x.js", "y.js"]);
        assert!(!store.contains("a.js"));
    }

    #[test]
    fn test_asset_refresh_decision() {
        let (_dir, mut store) = store();
        assert!(store.needs_asset_refresh("1.0.0", 1));

        store
            .record_assets("1.0.0", 1, ScriptSuite::Original)
            .unwrap();
        assert!(!store.needs_asset_refresh("1.0.0", 1));
        assert!(store.needs_asset_refresh("1.0.1", 1));
        assert!(store.needs_asset_refresh("1.0.0", 2));
        // A downgrade with the same build keeps the installed assets
        assert!(!store.needs_asset_refresh("0.9.0", 1));
    }

    #[test]
    fn test_record_update_check_persists() {
        let (dir, mut store) = store();
        let now = Utc::now();
        store.record_update_check(now).unwrap();

        let reloaded = ActivationStore::load(&dir.path().join("preferences.json"));
        assert_eq!(reloaded.last_update_check(), Some(now));
    }
}
