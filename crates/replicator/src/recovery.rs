//! Recovery rebuilder
//!
//! Reconstructs the version index purely from the bucket's contents. Data
//! keys embed `(path, sequence)`, so listing the data namespace and sorting
//! each path's objects by sequence reproduces the version history the
//! pipeline would have committed.
//!
//! Known limitation: removes are not materialized as stored objects, so a
//! rebuilt index cannot recover tombstones and may resurrect logically
//! deleted paths. The rebuild logs a warning to that effect.

use crate::index::{LoadError, VersionIndex};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use store::{key, Bucket};

/// Rebuild a version index by enumerating the bucket's data objects
pub fn rebuild(bucket: &dyn Bucket, timeout: Duration) -> Result<VersionIndex> {
    let keys = bucket
        .list(key::DATA_PREFIX, timeout)
        .context("failed to list data objects")?;

    // Group by path; BTreeMap keeps paths ordered like the pipeline's index
    let mut by_path: BTreeMap<String, Vec<(u64, String)>> = BTreeMap::new();
    let mut skipped = 0usize;
    for object_key in keys {
        match key::parse_data_key(&object_key) {
            Some((path, sequence)) => {
                by_path.entry(path).or_default().push((sequence, object_key));
            }
            None => {
                tracing::warn!(key = %object_key, "skipping unrecognized data key");
                skipped += 1;
            }
        }
    }

    let mut index = VersionIndex::new();
    for (path, mut objects) in by_path {
        // Sequence order is version order; ties are impossible because the
        // sequence is part of the key
        objects.sort_unstable_by_key(|(sequence, _)| *sequence);
        for (sequence, object_key) in objects {
            let version = index.next_version(&path);
            index
                .commit(&path, version, Some(object_key), sequence, false)
                .with_context(|| format!("rebuild commit failed for {path}"))?;
        }
    }

    tracing::info!(
        paths = index.path_count(),
        last_applied = index.last_applied(),
        skipped,
        "rebuilt index from bucket contents (tombstones are not recoverable)"
    );
    Ok(index)
}

/// Load the persisted index, falling back to a rebuild when it is missing or
/// does not deserialize
pub fn load_or_rebuild(bucket: &dyn Bucket, timeout: Duration) -> Result<VersionIndex> {
    match VersionIndex::load(bucket, timeout) {
        Ok(index) => Ok(index),
        Err(LoadError::Missing) => {
            tracing::warn!("no persisted index; rebuilding from bucket contents");
            rebuild(bucket, timeout)
        }
        Err(LoadError::Corrupt(reason)) => {
            tracing::warn!("persisted index is corrupt ({reason}); rebuilding");
            rebuild(bucket, timeout)
        }
        // Transient store trouble is not grounds for a rebuild; surface it
        Err(LoadError::Store(e)) => Err(e).context("failed to load persisted index"),
    }
}
