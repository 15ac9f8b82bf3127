//! Scripts manager: owns the plugin set, fixed scripts, activation list,
//! watchers and update checker, and exposes the surface used by the UI.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::activation::{ActivationError, ActivationStore};
use crate::assets::{self, AssetError, ScriptSuite};
use crate::config::AppConfig;
use crate::discovery;
use crate::fetch::{FetchError, ReqwestFetcher, ScriptFetcher};
use crate::fsutil::{self, PathLocks};
use crate::layout::{ScriptLayout, HOOK_SCRIPT, MAIN_SCRIPT, POSITION_SCRIPT};
use crate::script::Script;
use crate::sync::{self, SyncReport};
use crate::update::{UpdateChecker, UpdateOutcome, UpdateReport};
use crate::watcher::{ChangeWatcher, WatchedRoot};

/// Notifications broadcast to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptsEvent {
    /// Plugins and fixed scripts were reloaded from disk
    ScriptsUpdated,
}

/// Errors surfaced by manager operations
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    Assets(#[from] AssetError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Cannot import {0}: no file name")]
    InvalidImport(PathBuf),

    #[error("Failed to import {path}: {source}")]
    Import {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Discovered plugins and the three fixed slots
#[derive(Debug, Default)]
struct ScriptsState {
    stored_plugins: Vec<Arc<Script>>,
    main: Option<Arc<Script>>,
    hook: Option<Arc<Script>>,
    position: Option<Arc<Script>>,
}

/// Running app identity used for the hook script and asset markers
#[derive(Debug, Clone)]
struct AppInfo {
    version: String,
    build: u64,
}

pub struct ScriptsManager {
    layout: Arc<ScriptLayout>,
    app: AppInfo,
    priority_plugin: Option<String>,
    state: Mutex<ScriptsState>,
    activation: Mutex<ActivationStore>,
    locks: Arc<PathLocks>,
    updater: UpdateChecker,
    events: broadcast::Sender<ScriptsEvent>,
    watcher: Mutex<Option<ChangeWatcher>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptsManager {
    /// Build a manager with the `reqwest` fetcher and start watching
    pub fn start(config: &AppConfig) -> Result<Arc<Self>, ManagerError> {
        let fetcher = Arc::new(ReqwestFetcher::new(&config.updates)?);
        let manager = Self::new(config, fetcher);
        manager.start_watching();
        Ok(manager)
    }

    /// Prepare the on-disk layout and load every script.
    ///
    /// Installs bundled assets when needed, moves staged files into the user
    /// directory, loads the fixed scripts and discovers plugins. Watchers are
    /// not installed; see [`ScriptsManager::start_watching`].
    pub fn new(config: &AppConfig, fetcher: Arc<dyn ScriptFetcher>) -> Arc<Self> {
        let layout = Arc::new(ScriptLayout::from_config(config));
        let app = AppInfo {
            version: config.app.version.clone(),
            build: config.app.build,
        };

        if let Err(e) = fs::create_dir_all(&layout.user_scripts) {
            warn!(path = ?layout.user_scripts, error = %e, "Failed to create user scripts directory");
        }

        let mut activation = ActivationStore::load(&layout.preferences);
        assets::ensure_bundled_assets(
            &layout,
            &mut activation,
            &app.version,
            app.build,
            config.app.always_refresh_assets,
        );

        let locks = Arc::new(PathLocks::new());
        let (events, _) = broadcast::channel(16);

        let manager = Arc::new(Self {
            updater: UpdateChecker::new(fetcher, layout.clone(), locks.clone()),
            layout,
            app,
            priority_plugin: config.plugins.priority_plugin.clone(),
            state: Mutex::new(ScriptsState::default()),
            activation: Mutex::new(activation),
            locks,
            events,
            watcher: Mutex::new(None),
        });

        manager.sync_staging();
        manager.load_fixed_scripts();
        manager.load_plugins();
        manager
    }

    /// Watch the staging and user scripts directories.
    ///
    /// Staging changes are synced into the user directory; user directory
    /// changes reload everything and broadcast [`ScriptsEvent::ScriptsUpdated`].
    pub fn start_watching(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let roots = [
            (WatchedRoot::Staging, self.layout.staging.clone()),
            (WatchedRoot::UserScripts, self.layout.user_scripts.clone()),
        ];
        let watcher = ChangeWatcher::install(&roots, move |root| {
            if let Some(manager) = weak.upgrade() {
                manager.handle_change(root);
            }
        });
        *lock(&self.watcher) = Some(watcher);
    }

    /// Stop watching directories
    pub fn stop_watching(&self) {
        lock(&self.watcher).take();
    }

    /// Route a directory change to sync or reload
    pub fn handle_change(&self, root: WatchedRoot) {
        match root {
            WatchedRoot::Staging => {
                self.sync_staging();
            }
            WatchedRoot::UserScripts => self.reload(),
        }
    }

    /// Subscribe to [`ScriptsEvent`]s
    pub fn subscribe(&self) -> broadcast::Receiver<ScriptsEvent> {
        self.events.subscribe()
    }

    pub fn layout(&self) -> &ScriptLayout {
        &self.layout
    }

    /// Move staged files into the user scripts directory
    pub fn sync_staging(&self) -> SyncReport {
        let report = sync::sync_directory(&self.layout.staging, &self.layout.user_scripts, &self.locks);
        if !report.is_empty() {
            info!(
                moved = report.moved.len(),
                failed = report.failed.len(),
                "Synced staging directory"
            );
        }
        report
    }

    /// Rediscover plugins, reload the fixed scripts and notify subscribers
    pub fn reload(&self) {
        self.load_plugins();
        self.load_fixed_scripts();
        // No receivers is fine
        let _ = self.events.send(ScriptsEvent::ScriptsUpdated);
    }

    /// Rebuild the plugin set from both directories
    pub fn load_plugins(&self) {
        let plugins = discovery::discover(&self.layout.library_plugins, &self.layout.user_scripts);
        lock(&self.state).stored_plugins = plugins;
    }

    /// Load library defaults for the fixed scripts, then apply user overrides.
    ///
    /// A slot that fails to load keeps its previous value.
    pub fn load_fixed_scripts(&self) {
        let main = Script::load(&self.layout.library_script(MAIN_SCRIPT)).map(Script::into_core);
        let hook = Script::load_core(&self.layout.library_script(HOOK_SCRIPT), "hook")
            .map(|s| s.with_build_info(&self.app.version, self.app.build));
        let position = Script::load_core(&self.layout.library_script(POSITION_SCRIPT), "position");

        let user_main = self.load_user_override(MAIN_SCRIPT);
        let user_position = self.load_user_override(POSITION_SCRIPT);

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        for (slot, result, label) in [
            (&mut state.main, main, "main"),
            (&mut state.hook, hook, "hook"),
            (&mut state.position, position, "position"),
        ] {
            match result {
                Ok(script) => *slot = Some(Arc::new(script)),
                Err(e) => warn!(slot = label, error = %e, "Failed to load fixed script"),
            }
        }
        if let Some(script) = user_main {
            state.main = Some(Arc::new(script));
        }
        if let Some(script) = user_position {
            state.position = Some(Arc::new(script));
        }
    }

    fn load_user_override(&self, file_name: &str) -> Option<Script> {
        let path = self.layout.user_script(file_name);
        if !path.exists() {
            return None;
        }
        match Script::load(&path) {
            Ok(script) => {
                debug!(file = %file_name, "Using user override");
                Some(script.into_core().into_user_script())
            }
            Err(e) => {
                warn!(file = %file_name, error = %e, "Failed to load user override");
                None
            }
        }
    }

    pub fn main_script(&self) -> Option<Arc<Script>> {
        lock(&self.state).main.clone()
    }

    pub fn hook_script(&self) -> Option<Arc<Script>> {
        lock(&self.state).hook.clone()
    }

    pub fn position_script(&self) -> Option<Arc<Script>> {
        lock(&self.state).position.clone()
    }

    /// Every discovered plugin in merge order
    pub fn stored_plugins(&self) -> Vec<Arc<Script>> {
        lock(&self.state).stored_plugins.clone()
    }

    /// Scripts to inject, in load order.
    ///
    /// Starts with the main and hook scripts. Active plugins follow in their
    /// stored order, except the priority plugin which always comes first
    /// among them. Active names without a discovered plugin are skipped.
    pub fn loaded_scripts(&self) -> Vec<Arc<Script>> {
        let state = lock(&self.state);
        let activation = lock(&self.activation);

        let mut result: Vec<Arc<Script>> = Vec::new();
        result.extend(state.main.clone());
        result.extend(state.hook.clone());
        let fixed = result.len();

        for name in activation.names() {
            let Some(plugin) = state.stored_plugins.iter().find(|p| &p.file_name == name) else {
                continue;
            };
            if self.priority_plugin.as_deref() == Some(name.as_str()) {
                result.insert(fixed, plugin.clone());
            } else {
                result.push(plugin.clone());
            }
        }
        result
    }

    pub fn is_active(&self, file_name: &str) -> bool {
        lock(&self.activation).contains(file_name)
    }

    /// Enabled plugin names in stored order
    pub fn active_names(&self) -> Vec<String> {
        lock(&self.activation).names().to_vec()
    }

    /// Enable or disable a plugin, persisting immediately.
    ///
    /// Returns whether the activation list changed.
    pub fn set_active(&self, file_name: &str, loaded: bool) -> Result<bool, ManagerError> {
        Ok(lock(&self.activation).set_active(file_name, loaded)?)
    }

    /// Re-read the activation list from disk
    pub fn reload_settings(&self) {
        lock(&self.activation).reload();
    }

    /// Scripts considered by an update check: plugins, main and position
    fn update_candidates(&self) -> Vec<Arc<Script>> {
        let state = lock(&self.state);
        let mut scripts = state.stored_plugins.clone();
        scripts.extend(state.main.clone());
        scripts.extend(state.position.clone());
        scripts
    }

    /// Start an update cycle, yielding each script's outcome as it finishes.
    ///
    /// Nothing is reloaded; writes into the user directory are picked up by
    /// the watcher, others by [`ScriptsManager::reload`].
    pub fn check_for_updates(&self) -> BoxStream<'static, UpdateOutcome> {
        self.updater.check_and_apply(self.update_candidates())
    }

    /// Run a full update cycle and summarize it
    pub async fn update_scripts(&self) -> UpdateReport {
        let mut report = UpdateReport::default();
        let mut outcomes = self.check_for_updates();
        while let Some(outcome) = outcomes.next().await {
            report.record(&outcome);
        }

        if let Err(e) = lock(&self.activation).record_update_check(Utc::now()) {
            warn!(error = %e, "Failed to record update check time");
        }
        info!(
            updated = report.updated.len(),
            failed = report.failed.len(),
            checked = report.total(),
            "Update cycle finished"
        );
        report
    }

    /// Replace the library scripts with another bundled suite and reload
    pub fn switch_suite(&self, suite: ScriptSuite) -> Result<(), ManagerError> {
        assets::install_suite(&self.layout, suite)?;
        lock(&self.activation).record_assets(&self.app.version, self.app.build, suite)?;
        self.reload();
        Ok(())
    }

    pub fn suite(&self) -> ScriptSuite {
        lock(&self.activation).suite()
    }

    /// When the last full update cycle finished
    pub fn last_update_check(&self) -> Option<DateTime<Utc>> {
        lock(&self.activation).last_update_check()
    }

    /// Copy an external file into the user scripts directory, replacing any
    /// entry with the same name
    pub fn import_file(&self, source: &Path) -> Result<PathBuf, ManagerError> {
        let file_name = source
            .file_name()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ManagerError::InvalidImport(source.to_path_buf()))?;
        let destination = self.layout.user_scripts.join(file_name);

        self.locks
            .with_lock(&destination, || {
                fsutil::remove_entry(&destination)?;
                fsutil::copy_entry(source, &destination)
            })
            .map_err(|e| ManagerError::Import {
                path: source.to_path_buf(),
                source: e,
            })?;

        info!(path = ?destination, "Imported script");
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves fixed bodies keyed by URL
    #[derive(Default)]
    struct StaticFetcher {
        bodies: HashMap<String, String>,
    }

    #[async_trait]
    impl ScriptFetcher for StaticFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
            self.bodies.get(url).cloned().ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    fn header(name: &str, version: &str) -> String {
        format!(
            "// ==UserScript==\n// @name {}\n// @version {}\n// ==/UserScript==\n",
            name, version
        )
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn setup(fetcher: StaticFetcher) -> (TempDir, Arc<ScriptsManager>) {
        let root = TempDir::new().unwrap();
        let bundle = root.path().join("bundle");
        let scripts = bundle.join("scripts");
        write(&scripts.join(MAIN_SCRIPT), &header("IITC", "0.30.1"));
        write(&scripts.join(HOOK_SCRIPT), "window.app = { version: '%@', build: %d };");
        write(&scripts.join(POSITION_SCRIPT), &header("Position", "0.1.0"));
        for name in ["canvas-render", "draw-tools", "sync"] {
            write(
                &scripts.join("plugins").join(format!("{}.user.js", name)),
                &header(name, "1.0.0"),
            );
        }
        write(&bundle.join("ce").join(MAIN_SCRIPT), &header("IITC CE", "0.40.0"));

        let mut config = AppConfig::with_container(root.path().join("container"));
        config.paths.bundle = bundle;
        config.app.version = "2.1.0".to_string();
        config.app.build = 42;

        let manager = ScriptsManager::new(&config, Arc::new(fetcher));
        (root, manager)
    }

    fn names(scripts: &[Arc<Script>]) -> Vec<&str> {
        scripts.iter().map(|s| s.file_name.as_str()).collect()
    }

    #[test]
    fn test_startup_installs_and_loads() {
        let (_root, manager) = setup(StaticFetcher::default());

        let main = manager.main_script().unwrap();
        assert!(main.is_core());
        assert_eq!(main.version.as_deref(), Some("0.30.1"));
        assert_eq!(
            manager.hook_script().unwrap().file_content,
            "window.app = { version: '2.1.0', build: 42 };"
        );
        assert_eq!(manager.position_script().unwrap().name.as_deref(), Some("position"));
        assert_eq!(
            names(&manager.stored_plugins()),
            vec!["canvas-render.user.js", "draw-tools.user.js", "sync.user.js"]
        );
    }

    #[test]
    fn test_loaded_scripts_puts_priority_plugin_first() {
        let (_root, manager) = setup(StaticFetcher::default());
        manager.set_active("sync.user.js", true).unwrap();
        manager.set_active("gone.user.js", true).unwrap();
        manager.set_active("canvas-render.user.js", true).unwrap();
        manager.set_active("draw-tools.user.js", true).unwrap();

        let loaded = manager.loaded_scripts();
        assert_eq!(
            names(&loaded),
            vec![
                MAIN_SCRIPT,
                HOOK_SCRIPT,
                "canvas-render.user.js",
                "sync.user.js",
                "draw-tools.user.js",
            ]
        );
    }

    #[test]
    fn test_toggle_round_trip() {
        let (_root, manager) = setup(StaticFetcher::default());
        manager.set_active("sync.user.js", true).unwrap();
        manager.set_active("draw-tools.user.js", true).unwrap();
        let before = manager.active_names();

        assert!(manager.set_active("canvas-render.user.js", true).unwrap());
        assert!(manager.is_active("canvas-render.user.js"));
        assert!(!manager.set_active("canvas-render.user.js", true).unwrap());
        assert!(manager.set_active("canvas-render.user.js", false).unwrap());

        assert_eq!(manager.active_names(), before);
    }

    #[test]
    fn test_activation_survives_restart() {
        let root = TempDir::new().unwrap();
        let mut config = AppConfig::with_container(root.path());
        config.paths.bundle = root.path().join("no-bundle");

        let first = ScriptsManager::new(&config, Arc::new(StaticFetcher::default()));
        first.set_active("b.user.js", true).unwrap();
        first.set_active("a.user.js", true).unwrap();
        drop(first);

        let second = ScriptsManager::new(&config, Arc::new(StaticFetcher::default()));
        assert_eq!(second.active_names(), vec!["b.user.js", "a.user.js"]);
    }

    #[test]
    fn test_user_override_replaces_fixed_slot() {
        let (_root, manager) = setup(StaticFetcher::default());
        write(
            &manager.layout().user_script(MAIN_SCRIPT),
            &header("Custom IITC", "9.9.9"),
        );

        let mut events = manager.subscribe();
        manager.handle_change(WatchedRoot::UserScripts);

        let main = manager.main_script().unwrap();
        assert!(main.is_user_script);
        assert!(main.is_core());
        assert_eq!(main.version.as_deref(), Some("9.9.9"));
        assert_eq!(events.try_recv().unwrap(), ScriptsEvent::ScriptsUpdated);
        // Override files are not plugins
        assert_eq!(manager.stored_plugins().len(), 3);
    }

    #[test]
    fn test_missing_library_keeps_previous_fixed_scripts() {
        let (_root, manager) = setup(StaticFetcher::default());
        fs::remove_file(manager.layout().library_script(POSITION_SCRIPT)).unwrap();

        manager.reload();

        assert!(manager.position_script().is_some());
        assert!(manager.main_script().is_some());
    }

    #[test]
    fn test_staging_change_moves_files_without_event() {
        let (_root, manager) = setup(StaticFetcher::default());
        write(
            &manager.layout().staging.join("mine.user.js"),
            &header("Mine", "1.0"),
        );

        let mut events = manager.subscribe();
        manager.handle_change(WatchedRoot::Staging);

        assert!(manager.layout().user_script("mine.user.js").exists());
        assert!(!manager.layout().staging.join("mine.user.js").exists());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_import_file_replaces_existing() {
        let (root, manager) = setup(StaticFetcher::default());
        write(&manager.layout().user_script("opened.user.js"), "old");
        let source = root.path().join("Inbox/opened.user.js");
        write(&source, &header("Opened", "2.0"));

        let destination = manager.import_file(&source).unwrap();

        assert_eq!(destination, manager.layout().user_script("opened.user.js"));
        assert_eq!(fs::read_to_string(&destination).unwrap(), header("Opened", "2.0"));
        assert!(source.exists());
    }

    #[test]
    fn test_import_without_file_name_fails() {
        let (_root, manager) = setup(StaticFetcher::default());
        let err = manager.import_file(Path::new("/")).unwrap_err();
        assert!(matches!(err, ManagerError::InvalidImport(_)));
    }

    #[test]
    fn test_switch_suite_reloads_library() {
        let (_root, manager) = setup(StaticFetcher::default());

        manager.switch_suite(ScriptSuite::CommunityEdition).unwrap();

        assert_eq!(manager.suite(), ScriptSuite::CommunityEdition);
        assert_eq!(manager.main_script().unwrap().version.as_deref(), Some("0.40.0"));
        assert!(manager.stored_plugins().is_empty());
    }

    #[tokio::test]
    async fn test_update_scripts_writes_newer_plugin() {
        let root = TempDir::new().unwrap();
        let mut fetcher = StaticFetcher::default();
        fetcher.bodies.insert(
            "https://example.com/draw.meta.js".to_string(),
            "// ==UserScript==\n// @version 1.0.1\n// @downloadURL https://example.com/draw.user.js\n// ==/UserScript==\n".to_string(),
        );
        fetcher.bodies.insert(
            "https://example.com/draw.user.js".to_string(),
            header("draw", "1.0.1"),
        );

        let mut config = AppConfig::with_container(root.path());
        config.paths.bundle = root.path().join("no-bundle");
        let layout = ScriptLayout::from_config(&config);
        write(
            &layout.user_script("draw.user.js"),
            "// ==UserScript==\n// @version 1.0.0\n// @updateURL https://example.com/draw.meta.js\n// ==/UserScript==\n",
        );

        let manager = ScriptsManager::new(&config, Arc::new(fetcher));
        assert!(manager.last_update_check().is_none());
        let report = manager.update_scripts().await;

        assert_eq!(report.updated, vec!["draw.user.js".to_string()]);
        assert!(manager.last_update_check().is_some());
        manager.reload();
        let plugin = manager.stored_plugins().pop().unwrap();
        assert_eq!(plugin.version.as_deref(), Some("1.0.1"));
    }
}
