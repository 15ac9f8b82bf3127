//! In-memory representation of a script file and its header metadata.

use std::fs;
use std::path::{Path, PathBuf};

use crate::metadata::{self, Metadata};

/// Category assigned when a script's header names none
pub const DEFAULT_CATEGORY: &str = "Undefined";
/// Category of the fixed main, hook and position scripts
pub const CORE_CATEGORY: &str = "Core";

/// Errors raised while constructing a [`Script`]
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Script path has no file name: {0}")]
    NoFileName(PathBuf),
}

/// A script file loaded from disk.
///
/// Content and metadata are read once at construction. Updates produce a new
/// file on disk which is picked up by constructing a new `Script`.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// File name, unique within the merged plugin set
    pub file_name: String,
    /// Canonical location of the file
    pub file_path: PathBuf,
    /// Full script text
    pub file_content: String,
    pub version: Option<String>,
    pub name: Option<String>,
    pub category: String,
    pub description: Option<String>,
    pub download_url: Option<String>,
    pub update_url: Option<String>,
    /// True when discovered in the user scripts directory
    pub is_user_script: bool,
}

impl Script {
    /// Load a script and parse its `==UserScript==` header
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let (file_name, file_path, file_content) = read_script(path)?;
        let meta = metadata::parse(&file_content);
        Ok(Self::from_parts(file_name, file_path, file_content, &meta))
    }

    /// Load a fixed support script by name without reading its header.
    ///
    /// Used for the hook and position scripts, which are always loaded and
    /// carry category [`CORE_CATEGORY`].
    pub fn load_core(path: &Path, name: &str) -> Result<Self, ScriptError> {
        let (file_name, file_path, file_content) = read_script(path)?;
        Ok(Self {
            file_name,
            file_path,
            file_content,
            version: None,
            name: Some(name.to_string()),
            category: CORE_CATEGORY.to_string(),
            description: None,
            download_url: None,
            update_url: None,
            is_user_script: false,
        })
    }

    fn from_parts(
        file_name: String,
        file_path: PathBuf,
        file_content: String,
        meta: &Metadata,
    ) -> Self {
        let first = |key: &str| meta.first(key).map(str::to_string);
        Self {
            file_name,
            file_path,
            version: first("version"),
            name: first("name"),
            category: first("category").unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            description: first("description"),
            download_url: first("downloadURL"),
            update_url: first("updateURL"),
            file_content,
            is_user_script: false,
        }
    }

    /// Force category [`CORE_CATEGORY`]
    pub fn into_core(mut self) -> Self {
        self.category = CORE_CATEGORY.to_string();
        self
    }

    /// Mark as coming from the user scripts directory
    pub fn into_user_script(mut self) -> Self {
        self.is_user_script = true;
        self
    }

    pub fn is_core(&self) -> bool {
        self.category == CORE_CATEGORY
    }

    /// Display name, falling back to the file name
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.file_name)
    }

    /// Substitute the running app version and build into the content.
    ///
    /// The hook script carries a `%@` placeholder for the version string and a
    /// `%d` placeholder for the build number.
    pub fn with_build_info(mut self, version: &str, build: u64) -> Self {
        self.file_content = self
            .file_content
            .replacen("%@", version, 1)
            .replacen("%d", &build.to_string(), 1);
        self
    }
}

fn read_script(path: &Path) -> Result<(String, PathBuf, String), ScriptError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| ScriptError::NoFileName(path.to_path_buf()))?;

    let file_content = fs::read_to_string(path).map_err(|source| ScriptError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let file_path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    Ok((file_name, file_path, file_content))
}
