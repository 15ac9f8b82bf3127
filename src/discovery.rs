//! Plugin discovery across the library and user directories.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::layout::is_fixed_script_name;
use crate::script::Script;

/// Whether a directory entry name is a plugin candidate
pub fn is_plugin_file(file_name: &str) -> bool {
    file_name.ends_with(".js")
        && !file_name.ends_with(".meta.js")
        && !file_name.starts_with('.')
        && !is_fixed_script_name(file_name)
}

/// Load every plugin directly inside `dir`, sorted by file name.
///
/// The directory is created when missing. Files that cannot be read are
/// dropped.
pub fn scan_directory(dir: &Path, is_user: bool) -> Vec<Script> {
    if let Err(e) = fs::create_dir_all(dir) {
        warn!(path = ?dir, error = %e, "Failed to create plugin directory");
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = ?dir, error = %e, "Failed to read plugin directory");
            return Vec::new();
        }
    };

    let mut paths: Vec<_> = entries
        .flatten()
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(is_plugin_file)
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    let mut scripts = Vec::with_capacity(paths.len());
    for path in paths {
        match Script::load(&path) {
            Ok(script) => {
                debug!(
                    file = %script.file_name,
                    version = ?script.version,
                    category = %script.category,
                    "Loaded plugin"
                );
                scripts.push(if is_user { script.into_user_script() } else { script });
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Skipping unreadable plugin");
            }
        }
    }
    scripts
}

/// Merge user plugins over library plugins.
///
/// A user plugin with the same file name as a library plugin replaces it at
/// the same position; new names are appended.
pub fn merge(library: Vec<Script>, user: Vec<Script>) -> Vec<Arc<Script>> {
    let mut merged: Vec<Arc<Script>> = Vec::with_capacity(library.len() + user.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for script in library {
        if let Some(&pos) = index.get(&script.file_name) {
            merged[pos] = Arc::new(script);
        } else {
            index.insert(script.file_name.clone(), merged.len());
            merged.push(Arc::new(script));
        }
    }

    for script in user {
        let script = Arc::new(script.into_user_script());
        match index.get(&script.file_name) {
            Some(&pos) => merged[pos] = script,
            None => {
                index.insert(script.file_name.clone(), merged.len());
                merged.push(script);
            }
        }
    }

    merged
}

/// Scan both directories and merge the results
pub fn discover(library_plugins: &Path, user_scripts: &Path) -> Vec<Arc<Script>> {
    let library = scan_directory(library_plugins, false);
    let user = scan_directory(user_scripts, true);
    let (library_count, user_count) = (library.len(), user.len());
    let merged = merge(library, user);
    info!(
        library = library_count,
        user = user_count,
        total = merged.len(),
        "Discovered plugins"
    );
    merged
}
