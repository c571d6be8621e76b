//! Replication lease
//!
//! Exactly one pipeline instance may replay a journal against a bucket at a
//! time. The lease is a reserved object acquired with put-if-absent; a
//! holder that dies leaves a lease behind, so acquisition steals any lease
//! whose expiry has passed (or whose content cannot be read).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use store::{key, Bucket, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("replication lease held by {holder}, {remaining_ms}ms remaining")]
    Held { holder: String, remaining_ms: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseContent {
    holder: String,
    pid: u32,
    acquired_at_ms: u64,
    expires_at_ms: u64,
}

/// Time-bounded exclusive right to run replication against a bucket
///
/// Released explicitly or on drop (best effort).
pub struct Lease {
    bucket: Arc<dyn Bucket>,
    timeout: Duration,
    holder: String,
    released: bool,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("holder", &self.holder)
            .field("timeout", &self.timeout)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Lease {
    /// Acquire the replication lease, stealing an expired one if present
    ///
    /// `LeaseError::Held` is not retried: another live instance owns replay
    /// and the caller must abort.
    pub fn acquire(
        bucket: Arc<dyn Bucket>,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<Self, LeaseError> {
        let holder = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());

        // Two rounds: a failed first round may find an expired lease to
        // steal, after which put_if_absent gets one more chance.
        for attempt in 0..2 {
            let content = LeaseContent {
                holder: holder.clone(),
                pid: std::process::id(),
                acquired_at_ms: crate::current_timestamp_ms(),
                expires_at_ms: crate::current_timestamp_ms() + ttl.as_millis() as u64,
            };
            let bytes = serde_json::to_vec(&content)
                .map_err(|e| StoreError::Backend(format!("lease serialization failed: {e}")))?;

            if bucket.put_if_absent(key::LEASE_KEY, &bytes, timeout)? {
                tracing::info!(holder = %holder, "acquired replication lease");
                return Ok(Self {
                    bucket,
                    timeout,
                    holder,
                    released: false,
                });
            }

            if attempt > 0 {
                break;
            }

            // Lease object exists; decide stale vs live
            let existing = match bucket.get(key::LEASE_KEY, timeout) {
                Ok(bytes) => bytes,
                // Raced with a release; loop and try again
                Err(StoreError::NotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            let now = crate::current_timestamp_ms();
            match serde_json::from_slice::<LeaseContent>(&existing) {
                Ok(current) if current.expires_at_ms > now => {
                    return Err(LeaseError::Held {
                        holder: current.holder,
                        remaining_ms: current.expires_at_ms - now,
                    });
                }
                Ok(current) => {
                    tracing::warn!(
                        holder = %current.holder,
                        "stealing expired replication lease"
                    );
                }
                Err(e) => {
                    tracing::warn!("stealing unreadable replication lease: {e}");
                }
            }
            bucket.delete(key::LEASE_KEY, timeout)?;
        }

        // Lost both races; report whoever holds it now
        Err(LeaseError::Held {
            holder: "unknown".to_string(),
            remaining_ms: 0,
        })
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Release the lease
    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.bucket.delete(key::LEASE_KEY, self.timeout)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.bucket.delete(key::LEASE_KEY, self.timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::MemoryBucket;

    const T: Duration = Duration::from_secs(5);
    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_acquire_and_release() {
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());

        let lease = Lease::acquire(Arc::clone(&bucket), TTL, T).unwrap();
        assert!(bucket.get(key::LEASE_KEY, T).is_ok());

        lease.release().unwrap();
        assert!(matches!(
            bucket.get(key::LEASE_KEY, T),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_second_acquire_conflicts() {
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());

        let _lease = Lease::acquire(Arc::clone(&bucket), TTL, T).unwrap();
        let err = Lease::acquire(Arc::clone(&bucket), TTL, T).unwrap_err();
        assert!(matches!(err, LeaseError::Held { .. }));
    }

    #[test]
    fn test_expired_lease_is_stolen() {
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());

        // A lease that expired in the past
        let dead = Lease::acquire(Arc::clone(&bucket), Duration::ZERO, T).unwrap();
        // Simulate the holder dying without release
        std::mem::forget(dead);

        let lease = Lease::acquire(Arc::clone(&bucket), TTL, T).unwrap();
        assert!(!lease.holder().is_empty());
    }

    #[test]
    fn test_unreadable_lease_is_stolen() {
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
        bucket.put(key::LEASE_KEY, b"garbage", T).unwrap();

        Lease::acquire(Arc::clone(&bucket), TTL, T).unwrap();
    }

    #[test]
    fn test_drop_releases() {
        let bucket: Arc<dyn Bucket> = Arc::new(MemoryBucket::new());
        {
            let _lease = Lease::acquire(Arc::clone(&bucket), TTL, T).unwrap();
        }
        assert!(matches!(
            bucket.get(key::LEASE_KEY, T),
            Err(StoreError::NotFound { .. })
        ));
    }
}
