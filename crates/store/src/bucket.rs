//! The `Bucket` trait: minimal object store contract

use crate::error::StoreError;
use std::time::Duration;

/// Client interface for a remote object bucket
///
/// Semantics the rest of the system relies on:
/// - `put` is atomic from a reader's perspective: a concurrent `get` observes
///   either the previous object or the complete new one, never a partial
///   write.
/// - `put` is at-least-once safe: callers may retry the same key freely.
/// - `put_if_absent` succeeds only if the key does not already exist; this is
///   the primitive behind the replication lease.
/// - `list` enumerates every key under a prefix, in lexicographic order.
///
/// Every call carries a caller-supplied timeout. A deadline overrun maps to
/// `StoreError::Timeout`, which callers treat like any other transient error.
pub trait Bucket: Send + Sync {
    /// Store an object, overwriting any existing object under `key`
    fn put(&self, key: &str, bytes: &[u8], timeout: Duration) -> Result<(), StoreError>;

    /// Store an object only if `key` does not exist yet
    ///
    /// Returns `Ok(false)` if the key was already present.
    fn put_if_absent(&self, key: &str, bytes: &[u8], timeout: Duration)
        -> Result<bool, StoreError>;

    /// Fetch an object's bytes
    fn get(&self, key: &str, timeout: Duration) -> Result<Vec<u8>, StoreError>;

    /// Enumerate keys under a prefix, sorted lexicographically
    fn list(&self, prefix: &str, timeout: Duration) -> Result<Vec<String>, StoreError>;

    /// Remove an object; removing a missing key is not an error
    fn delete(&self, key: &str, timeout: Duration) -> Result<(), StoreError>;
}
