//! Configuration loader.
//!
//! Loads configuration from:
//! 1. Default values
//! 2. `.userscripts/config.yaml` in the project directory
//! 3. `~/.userscripts/config.yaml` in the home directory
//! 4. Environment variables with `USERSCRIPTS__` prefix, e.g.
//!    `USERSCRIPTS__PATHS__CONTAINER=/data/iitc`

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub paths: PathsConfig,
    #[serde(default)]
    pub app: AppInfoConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub updates: UpdatesConfig,
}

/// Filesystem roots
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Shared library root; bundled scripts are copied to `<container>/scripts`
    pub container: PathBuf,
    /// User scripts directory (default `<container>/userScripts`)
    #[serde(default)]
    pub user_scripts: Option<PathBuf>,
    /// Staging directory synced into the user scripts directory
    /// (default `<container>/Documents`)
    #[serde(default)]
    pub staging: Option<PathBuf>,
    /// Packaged script suites, one subdirectory per suite
    #[serde(default = "default_bundle")]
    pub bundle: PathBuf,
    /// Preferences file (default `<container>/preferences.json`)
    #[serde(default)]
    pub preferences: Option<PathBuf>,
}

fn default_bundle() -> PathBuf {
    PathBuf::from("bundle")
}

/// Running application version, substituted into the hook script and
/// compared against the stored asset markers
#[derive(Debug, Deserialize, Clone)]
pub struct AppInfoConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub build: u64,
    /// Re-copy bundled assets on every start (development builds)
    #[serde(default)]
    pub always_refresh_assets: bool,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for AppInfoConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            build: 0,
            always_refresh_assets: false,
        }
    }
}

/// Plugin ordering rules
#[derive(Debug, Deserialize, Clone)]
pub struct PluginsConfig {
    /// Plugin placed ahead of every other active plugin when enabled.
    /// It sets up the render surface other plugins draw on.
    #[serde(default = "default_priority_plugin")]
    pub priority_plugin: Option<String>,
}

fn default_priority_plugin() -> Option<String> {
    Some("canvas-render.user.js".to_string())
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            priority_plugin: default_priority_plugin(),
        }
    }
}

/// HTTP settings for update checks
#[derive(Debug, Deserialize, Clone)]
pub struct UpdatesConfig {
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("userscript-manager/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl AppConfig {
    /// Configuration rooted at `container` with every other value defaulted
    pub fn with_container(container: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                container: container.into(),
                user_scripts: None,
                staging: None,
                bundle: default_bundle(),
                preferences: None,
            },
            app: AppInfoConfig::default(),
            plugins: PluginsConfig::default(),
            updates: UpdatesConfig::default(),
        }
    }

    pub fn container(&self) -> &Path {
        &self.paths.container
    }
}

/// Default container: the platform data directory
fn default_container() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("userscripts"))
        .unwrap_or_else(|| PathBuf::from(".userscripts/data"))
}

/// Load configuration from all sources
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // Set defaults
    builder = builder
        .set_default(
            "paths.container",
            default_container().to_string_lossy().to_string(),
        )?
        .set_default("paths.bundle", "bundle")?
        .set_default("app.version", default_version())?
        .set_default("app.build", 0)?
        .set_default("app.always_refresh_assets", false)?
        .set_default("updates.timeout_seconds", default_timeout())?;

    // Load from project config file
    let project_config = PathBuf::from(".userscripts/config.yaml");
    if project_config.exists() {
        builder = builder.add_source(File::from(project_config).required(false));
    }

    // Load from home directory config file
    if let Some(home) = dirs::home_dir() {
        let home_config: PathBuf = home.join(".userscripts/config.yaml");
        if home_config.exists() {
            builder = builder.add_source(File::from(home_config).required(false));
        }
    }

    // Double underscore keeps snake_case keys intact,
    // e.g. USERSCRIPTS__PATHS__USER_SCRIPTS=/tmp/user
    builder = builder.add_source(
        Environment::with_prefix("USERSCRIPTS")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
