//! Directory-backed bucket
//!
//! Stores each object as a file under the bucket root, using the key as a
//! relative path. Writes go through the temp-file + fsync + rename pattern,
//! which gives `put` the single-object-write atomicity the version index
//! persist step relies on.

use crate::bucket::Bucket;
use crate::error::StoreError;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Scratch directory under the bucket root; never listed
const TMP_DIR: &str = ".tmp";

/// Object bucket backed by a local directory
pub struct DirBucket {
    root: PathBuf,
}

impl DirBucket {
    /// Open (creating if necessary) a bucket rooted at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(path.join(TMP_DIR)).map_err(|source| StoreError::Io {
            key: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            root: path.to_path_buf(),
        })
    }

    /// Bucket root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to its on-disk location, rejecting traversal
    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.starts_with(TMP_DIR)
            || key.split('/').any(|part| part.is_empty() || part == "..")
        {
            return Err(StoreError::Backend(format!("invalid object key: {key:?}")));
        }
        Ok(self.root.join(key))
    }

    /// Write to a temp file, fsync, then rename into place (atomic on POSIX)
    fn atomic_write(&self, target: &Path, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };

        let temp_path = self.root.join(TMP_DIR).join(uuid::Uuid::new_v4().to_string());
        let mut temp_file = File::create(&temp_path).map_err(io_err)?;
        temp_file.write_all(bytes).map_err(io_err)?;
        temp_file.sync_all().map_err(io_err)?;
        drop(temp_file);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::rename(&temp_path, target).map_err(io_err)?;

        // Fsync parent directory for durability
        if let Some(parent) = target.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}

/// Fail with `Timeout` if the deadline elapsed while the call ran
///
/// The operation itself may have landed; callers retry with the same key, so
/// a late-but-successful put is overwritten with identical bytes.
fn check_deadline(
    start: Instant,
    timeout: Duration,
    op: &'static str,
    key: &str,
) -> Result<(), StoreError> {
    let elapsed = start.elapsed();
    if elapsed > timeout {
        return Err(StoreError::Timeout {
            op,
            key: key.to_string(),
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }
    Ok(())
}

impl Bucket for DirBucket {
    fn put(&self, key: &str, bytes: &[u8], timeout: Duration) -> Result<(), StoreError> {
        let start = Instant::now();
        let target = self.object_path(key)?;
        self.atomic_write(&target, key, bytes)?;
        check_deadline(start, timeout, "put", key)
    }

    fn put_if_absent(
        &self,
        key: &str,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<bool, StoreError> {
        let start = Instant::now();
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                key: key.to_string(),
                source,
            })?;
        }

        // create_new gives the atomic existence check
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };

        let io_err = |source| StoreError::Io {
            key: key.to_string(),
            source,
        };
        file.write_all(bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        check_deadline(start, timeout, "put_if_absent", key)?;
        Ok(true)
    }

    fn get(&self, key: &str, timeout: Duration) -> Result<Vec<u8>, StoreError> {
        let start = Instant::now();
        let target = self.object_path(key)?;
        let bytes = match fs::read(&target) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        };
        check_deadline(start, timeout, "get", key)?;
        Ok(bytes)
    }

    fn list(&self, prefix: &str, timeout: Duration) -> Result<Vec<String>, StoreError> {
        let start = Instant::now();
        let mut keys = Vec::new();

        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| StoreError::Backend(format!("list failed: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| StoreError::Backend(format!("list failed: {e}")))?;
            let key = rel.to_string_lossy().replace('\\', "/");
            if key.starts_with(TMP_DIR) {
                continue;
            }
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }

        keys.sort_unstable();
        check_deadline(start, timeout, "list", prefix)?;
        Ok(keys)
    }

    fn delete(&self, key: &str, timeout: Duration) -> Result<(), StoreError> {
        let start = Instant::now();
        let target = self.object_path(key)?;
        match fs::remove_file(&target) {
            Ok(()) => {}
            // Deleting a missing object is a no-op
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source,
                })
            }
        }
        check_deadline(start, timeout, "delete", key)
    }
}
