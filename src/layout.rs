//! On-disk layout of the script library.
//!
//! ```text
//! <container>/
//! ├── scripts/
//! │   ├── total-conversion-build.user.js   # main script
//! │   ├── ios-hooks.js                     # hook script
//! │   ├── user-location.user.js            # position script
//! │   └── plugins/*.js                     # bundled plugins
//! ├── userScripts/*.js                     # user plugins and overrides
//! ├── Documents/                           # staging area
//! └── preferences.json
//! ```

use std::path::{Path, PathBuf};

use crate::config::AppConfig;

/// Main script file name
pub const MAIN_SCRIPT: &str = "total-conversion-build.user.js";
/// Hook script file name
pub const HOOK_SCRIPT: &str = "ios-hooks.js";
/// Position script file name
pub const POSITION_SCRIPT: &str = "user-location.user.js";

/// Resolved directories used by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLayout {
    pub container: PathBuf,
    pub library_scripts: PathBuf,
    pub library_plugins: PathBuf,
    pub user_scripts: PathBuf,
    pub staging: PathBuf,
    pub bundle: PathBuf,
    pub preferences: PathBuf,
}

impl ScriptLayout {
    pub fn from_config(config: &AppConfig) -> Self {
        let container = config.paths.container.clone();
        let library_scripts = container.join("scripts");
        let library_plugins = library_scripts.join("plugins");
        let user_scripts = config
            .paths
            .user_scripts
            .clone()
            .unwrap_or_else(|| container.join("userScripts"));
        let staging = config
            .paths
            .staging
            .clone()
            .unwrap_or_else(|| container.join("Documents"));
        let preferences = config
            .paths
            .preferences
            .clone()
            .unwrap_or_else(|| container.join("preferences.json"));

        Self {
            library_scripts,
            library_plugins,
            user_scripts,
            staging,
            bundle: config.paths.bundle.clone(),
            preferences,
            container,
        }
    }

    pub fn library_script(&self, file_name: &str) -> PathBuf {
        self.library_scripts.join(file_name)
    }

    pub fn user_script(&self, file_name: &str) -> PathBuf {
        self.user_scripts.join(file_name)
    }

    /// Where an updated copy of a script is written: the user directory for
    /// user scripts, the library scripts directory for core scripts, and the
    /// library plugins directory for everything else.
    pub fn update_destination(&self, file_name: &str, is_user_script: bool, is_core: bool) -> PathBuf {
        let dir: &Path = if is_user_script {
            &self.user_scripts
        } else if is_core {
            &self.library_scripts
        } else {
            &self.library_plugins
        };
        dir.join(file_name)
    }
}

/// True for the two fixed script names that are never treated as plugins
pub fn is_fixed_script_name(file_name: &str) -> bool {
    file_name == MAIN_SCRIPT || file_name == POSITION_SCRIPT
}
