//! Scoped exclusive file locking for the cache and ratchet files.
//!
//! Both files are mutated under a read-modify-write-under-lock pattern:
//! acquire an exclusive lock, read the current file (tolerating "missing"),
//! mutate in memory, write a temp file, rename it into place, then release
//! the lock. This module only owns the lock acquisition/release half of that
//! scope; callers perform the atomic temp-file+rename write themselves
//! (see `cache.rs`, `ratchet.rs`) so the lock is held across the whole
//! critical section.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// An exclusive lock on a side-car `.lock` file next to the resource being
/// guarded. Dropping the guard releases the lock.
pub struct ExclusiveLock {
    _file: File,
    path: PathBuf,
}

impl ExclusiveLock {
    /// Acquire a blocking exclusive lock on `resource_path.lock`, creating
    /// parent directories as needed.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created or the
    /// lock file cannot be opened/locked.
    pub fn acquire(resource_path: &Path) -> io::Result<Self> {
        let lock_path = lock_path_for(resource_path);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        file.lock_exclusive()?;
        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        // Best-effort: an unlock failure here cannot be reported and the OS
        // releases the lock on process exit regardless.
        let _ = fs2::FileExt::unlock(&self._file);
    }
}

fn lock_path_for(resource_path: &Path) -> PathBuf {
    let mut name = resource_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    resource_path.with_file_name(name)
}
