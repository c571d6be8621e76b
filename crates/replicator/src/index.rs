//! Version index: durable mapping from logical path to version history
//!
//! The index is append-only: a committed `VersionEntry` is never mutated or
//! removed. Consistency rules enforced here:
//!
//! 1. Per path, version numbers are gapless starting at 1.
//! 2. A journal sequence number appears at most once system-wide.
//! 3. `last_applied` is never less than any committed sequence number.
//! 4. The index persists to the reserved `meta/index.json` key, outside the
//!    namespace any logical path can encode to.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use store::{key, Bucket, StoreError};
use thiserror::Error;

/// Persisted format version
const FORMAT: u32 = 1;

/// One committed version of a path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// 1-based, strictly increasing per path; authoritative for ordering
    pub version: u64,
    /// Bucket key holding this version's bytes; `None` for tombstones
    pub object_key: Option<String>,
    /// Journal sequence number that produced this version
    pub sequence: u64,
    /// True if this version records a remove
    pub tombstone: bool,
    /// Creation time, advisory only
    pub timestamp_ms: u64,
}

/// Commit-time violations; these indicate a bug or a concurrent writer and
/// are never retried
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("sequence {sequence} already committed")]
    DuplicateSequence { sequence: u64 },

    #[error("out-of-order version for {path}: got {got}, expected {expected}")]
    OutOfOrderVersion {
        path: String,
        got: u64,
        expected: u64,
    },
}

/// Why a persisted index could not be loaded
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no persisted index found")]
    Missing,

    #[error("persisted index is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(StoreError),
}

/// Current state of a path, as reported by `current_version`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState<'a> {
    /// Latest version carries content
    Live(&'a VersionEntry),
    /// Latest version is a tombstone
    Deleted(&'a VersionEntry),
    /// Path has never been committed
    Unknown,
}

/// In-memory + durable path -> version-history mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionIndex {
    format: u32,
    entries: BTreeMap<String, Vec<VersionEntry>>,
    /// Highest sequence number fully committed, across all paths
    last_applied: u64,
    /// Every committed sequence number; guards `has_applied` for journals
    /// whose sequence numbering has gaps below the watermark
    applied: BTreeSet<u64>,
}

impl Default for VersionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionIndex {
    pub fn new() -> Self {
        Self {
            format: FORMAT,
            entries: BTreeMap::new(),
            last_applied: 0,
            applied: BTreeSet::new(),
        }
    }

    /// Whether the record with this sequence number is already committed
    pub fn has_applied(&self, sequence: u64) -> bool {
        sequence <= self.last_applied && self.applied.contains(&sequence)
    }

    /// Version number the next commit for `path` must carry
    pub fn next_version(&self, path: &str) -> u64 {
        self.entries.get(path).map_or(0, |v| v.len() as u64) + 1
    }

    /// Append a version to `path`'s history
    ///
    /// Fails if `version` is not exactly `next_version(path)` or if
    /// `sequence` was already committed anywhere in the index.
    pub fn commit(
        &mut self,
        path: &str,
        version: u64,
        object_key: Option<String>,
        sequence: u64,
        tombstone: bool,
    ) -> Result<VersionEntry, IndexError> {
        if self.applied.contains(&sequence) {
            return Err(IndexError::DuplicateSequence { sequence });
        }
        let expected = self.next_version(path);
        if version != expected {
            return Err(IndexError::OutOfOrderVersion {
                path: path.to_string(),
                got: version,
                expected,
            });
        }

        let entry = VersionEntry {
            version,
            object_key,
            sequence,
            tombstone,
            timestamp_ms: crate::current_timestamp_ms(),
        };
        self.entries
            .entry(path.to_string())
            .or_default()
            .push(entry.clone());
        self.applied.insert(sequence);
        self.last_applied = self.last_applied.max(sequence);
        Ok(entry)
    }

    /// Latest entry for a path, distinguishing deleted from never-seen
    pub fn current_version(&self, path: &str) -> PathState<'_> {
        match self.entries.get(path).and_then(|v| v.last()) {
            Some(entry) if entry.tombstone => PathState::Deleted(entry),
            Some(entry) => PathState::Live(entry),
            None => PathState::Unknown,
        }
    }

    /// A specific numbered version of a path
    pub fn version(&self, path: &str, version: u64) -> Option<&VersionEntry> {
        if version == 0 {
            return None;
        }
        self.entries.get(path)?.get(version as usize - 1)
    }

    /// Full history of a path, oldest first
    pub fn history(&self, path: &str) -> Option<&[VersionEntry]> {
        self.entries.get(path).map(|v| v.as_slice())
    }

    /// All known paths, sorted
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|s| s.as_str())
    }

    pub fn path_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }

    /// Check the index's internal invariants
    ///
    /// Run after loading or rebuilding; a violation means the persisted
    /// object was produced by a buggy or concurrent writer.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for (path, history) in &self.entries {
            for (i, entry) in history.iter().enumerate() {
                let expected = i as u64 + 1;
                if entry.version != expected {
                    return Err(format!(
                        "{path}: version {} at position {i} (expected {expected})",
                        entry.version
                    ));
                }
                if !seen.insert(entry.sequence) {
                    return Err(format!(
                        "sequence {} appears more than once",
                        entry.sequence
                    ));
                }
                if !self.applied.contains(&entry.sequence) {
                    return Err(format!(
                        "sequence {} committed but missing from applied set",
                        entry.sequence
                    ));
                }
                if entry.sequence > self.last_applied {
                    return Err(format!(
                        "sequence {} exceeds watermark {}",
                        entry.sequence, self.last_applied
                    ));
                }
                if entry.tombstone && entry.object_key.is_some() {
                    return Err(format!(
                        "{path} v{}: tombstone carries an object key",
                        entry.version
                    ));
                }
            }
        }
        Ok(())
    }

    /// Serialize and write the whole index to the reserved bucket key
    ///
    /// Atomicity is delegated to the bucket's single-object-write guarantee:
    /// a reader of the previous index never observes a partial successor.
    pub fn persist(&self, bucket: &dyn Bucket, timeout: Duration) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|e| StoreError::Backend(format!("index serialization failed: {e}")))?;
        bucket.put(key::INDEX_KEY, &bytes, timeout)
    }

    /// Load the persisted index from the reserved bucket key
    pub fn load(bucket: &dyn Bucket, timeout: Duration) -> Result<Self, LoadError> {
        let bytes = match bucket.get(key::INDEX_KEY, timeout) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => return Err(LoadError::Missing),
            Err(e) => return Err(LoadError::Store(e)),
        };

        let index: VersionIndex =
            serde_json::from_slice(&bytes).map_err(|e| LoadError::Corrupt(e.to_string()))?;
        if index.format != FORMAT {
            return Err(LoadError::Corrupt(format!(
                "unsupported index format {}",
                index.format
            )));
        }
        index.validate().map_err(LoadError::Corrupt)?;
        Ok(index)
    }
}
