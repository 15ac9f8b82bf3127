//! Filesystem helpers shared by sync, asset install and update application.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Write `contents` to `path` so readers never observe a partial file.
///
/// The data goes to a hidden temp file in the same directory which is then
/// renamed over the destination.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Recursively copy a directory
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Copy a file or directory to `dst`
pub fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        copy_dir_recursive(src, dst)
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

/// Remove a file or directory. Missing entries are not an error.
pub fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Per-path write locks.
///
/// Writers targeting the same destination run one at a time; writers on
/// different paths do not block each other.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `path`
    pub fn with_lock<R>(&self, path: &Path, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("script.user.js");
        fs::write(&path, "old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        // No temp files left behind
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/plugins/a.js");
        write_atomic(&path, b"content").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "content");
    }

    #[test]
    fn test_copy_dir_recursive() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();

        let sub = src.path().join("plugins");
        fs::create_dir_all(&sub).unwrap();
        fs::write(src.path().join("main.js"), "hello").unwrap();
        fs::write(sub.join("plugin.js"), "world").unwrap();

        let dest_path = dst.path().join("copy");
        copy_dir_recursive(src.path(), &dest_path).unwrap();

        assert_eq!(
            fs::read_to_string(dest_path.join("main.js")).unwrap(),
            "hello"
        );
        assert_eq!(
            fs::read_to_string(dest_path.join("plugins/plugin.js")).unwrap(),
            "world"
        );
    }

    #[test]
    fn test_remove_entry_handles_files_dirs_and_missing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.js");
        let sub = dir.path().join("sub");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(sub.join("deep")).unwrap();

        remove_entry(&file).unwrap();
        remove_entry(&sub).unwrap();
        remove_entry(&dir.path().join("missing")).unwrap();

        assert!(!file.exists());
        assert!(!sub.exists());
    }

    #[test]
    fn test_path_locks_serialize_same_path() {
        let locks = Arc::new(PathLocks::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let path = PathBuf::from("/tmp/same.js");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = locks.clone();
                let active = active.clone();
                let max_seen = max_seen.clone();
                let path = path.clone();
                thread::spawn(move || {
                    locks.with_lock(&path, || {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        active.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
