//! Bundled script suites.
//!
//! The packaged bundle holds one directory per suite. On first run, after an
//! app upgrade, or when the user switches suites, the chosen suite replaces
//! the library scripts directory wholesale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::activation::ActivationStore;
use crate::fsutil;
use crate::layout::{ScriptLayout, MAIN_SCRIPT};

/// Packaged script suite variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSuite {
    #[default]
    Original,
    #[serde(rename = "ce")]
    CommunityEdition,
}

impl ScriptSuite {
    /// Bundle subdirectory holding this suite
    pub fn bundle_dir(&self) -> &'static str {
        match self {
            Self::Original => "scripts",
            Self::CommunityEdition => "ce",
        }
    }
}

impl fmt::Display for ScriptSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => write!(f, "original"),
            Self::CommunityEdition => write!(f, "ce"),
        }
    }
}

impl std::str::FromStr for ScriptSuite {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "original" | "scripts" => Ok(Self::Original),
            "ce" | "community" => Ok(Self::CommunityEdition),
            _ => Err(format!("Invalid suite '{}'. Must be: original, ce", s)),
        }
    }
}

/// Errors installing a bundled suite
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Bundle directory not found: {0}")]
    BundleMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Replace the library scripts directory with the bundled `suite`
pub fn install_suite(layout: &ScriptLayout, suite: ScriptSuite) -> Result<(), AssetError> {
    let source = layout.bundle.join(suite.bundle_dir());
    if !source.is_dir() {
        return Err(AssetError::BundleMissing(source));
    }
    fsutil::remove_entry(&layout.library_scripts)?;
    fsutil::copy_dir_recursive(&source, &layout.library_scripts)?;
    info!(suite = %suite, path = ?layout.library_scripts, "Installed bundled scripts");
    Ok(())
}

/// Copy bundled assets when the library is missing or out of date.
///
/// Returns true when a copy happened.
pub fn ensure_bundled_assets(
    layout: &ScriptLayout,
    store: &mut ActivationStore,
    version: &str,
    build: u64,
    force: bool,
) -> bool {
    let installed = layout.library_script(MAIN_SCRIPT).exists();
    if installed && !force && !store.needs_asset_refresh(version, build) {
        return false;
    }

    let suite = store.suite();
    if let Err(e) = install_suite(layout, suite) {
        warn!(suite = %suite, error = %e, "Failed to install bundled scripts");
        return false;
    }
    if let Err(e) = store.record_assets(version, build, suite) {
        warn!(error = %e, "Failed to record installed asset version");
    }
    true
}
