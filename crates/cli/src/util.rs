//! Shared utilities for CLI commands

use anyhow::{Context as _, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use store::{Bucket, DirBucket};

/// Everything a command needs to talk to the bucket
pub struct Context {
    pub bucket: Arc<dyn Bucket>,
    pub timeout: Duration,
}

impl Context {
    pub fn new(bucket_dir: &Path, timeout_secs: u64) -> Result<Self> {
        let bucket = DirBucket::open(bucket_dir)
            .with_context(|| format!("failed to open bucket at {}", bucket_dir.display()))?;
        Ok(Self {
            bucket: Arc::new(bucket),
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Exit code for a partial, resumable run
pub const EXIT_PARTIAL: i32 = 2;

/// Exit code for a lease conflict (another replayer is active)
pub const EXIT_LEASE_CONFLICT: i32 = 3;
