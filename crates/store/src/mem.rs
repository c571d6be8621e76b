//! In-memory bucket with fault injection
//!
//! Test double for the replication pipeline: can fail the next N puts under a
//! key prefix and simulate slow calls, which is how the crash-safety and
//! retry tests drive the pipeline into its failure paths.

use crate::bucket::Bucket;
use crate::error::StoreError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    /// Fail the next `.1` puts whose key starts with `.0`
    fail_puts: Option<(String, usize)>,
    /// Simulated per-call latency; calls fail with `Timeout` when it exceeds
    /// the caller's budget (the operation is not applied)
    latency: Duration,
    put_count: u64,
}

/// In-memory object bucket
#[derive(Default)]
pub struct MemoryBucket {
    inner: Mutex<Inner>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` puts (any key) with a transient error
    pub fn fail_next_puts(&self, count: usize) {
        self.fail_next_puts_matching("", count);
    }

    /// Fail the next `count` puts whose key starts with `prefix`
    pub fn fail_next_puts_matching(&self, prefix: &str, count: usize) {
        self.inner.lock().fail_puts = Some((prefix.to_string(), count));
    }

    /// Simulate slow calls
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.inner.lock().objects.len()
    }

    /// Total successful puts since creation
    pub fn put_count(&self) -> u64 {
        self.inner.lock().put_count
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().objects.contains_key(key)
    }
}

impl Inner {
    fn check_latency(&self, timeout: Duration, op: &'static str, key: &str) -> Result<(), StoreError> {
        if self.latency > timeout {
            return Err(StoreError::Timeout {
                op,
                key: key.to_string(),
                elapsed_ms: self.latency.as_millis() as u64,
            });
        }
        Ok(())
    }

    fn check_put_fault(&mut self, key: &str) -> Result<(), StoreError> {
        if let Some((prefix, remaining)) = &mut self.fail_puts {
            if *remaining > 0 && key.starts_with(prefix.as_str()) {
                *remaining -= 1;
                return Err(StoreError::Backend(format!("injected put failure: {key}")));
            }
        }
        Ok(())
    }
}

impl Bucket for MemoryBucket {
    fn put(&self, key: &str, bytes: &[u8], timeout: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.check_latency(timeout, "put", key)?;
        inner.check_put_fault(key)?;
        inner.objects.insert(key.to_string(), bytes.to_vec());
        inner.put_count += 1;
        Ok(())
    }

    fn put_if_absent(
        &self,
        key: &str,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        inner.check_latency(timeout, "put_if_absent", key)?;
        if inner.objects.contains_key(key) {
            return Ok(false);
        }
        inner.check_put_fault(key)?;
        inner.objects.insert(key.to_string(), bytes.to_vec());
        inner.put_count += 1;
        Ok(true)
    }

    fn get(&self, key: &str, timeout: Duration) -> Result<Vec<u8>, StoreError> {
        let inner = self.inner.lock();
        inner.check_latency(timeout, "get", key)?;
        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    fn list(&self, prefix: &str, timeout: Duration) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock();
        inner.check_latency(timeout, "list", prefix)?;
        Ok(inner
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, key: &str, timeout: Duration) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.check_latency(timeout, "delete", key)?;
        inner.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn test_basic_roundtrip() {
        let bucket = MemoryBucket::new();
        bucket.put("a", b"1", T).unwrap();
        assert_eq!(bucket.get("a", T).unwrap(), b"1");
        assert_eq!(bucket.object_count(), 1);
    }

    #[test]
    fn test_injected_put_failures_are_transient_and_finite() {
        let bucket = MemoryBucket::new();
        bucket.fail_next_puts(2);

        let e1 = bucket.put("a", b"1", T).unwrap_err();
        assert!(e1.is_transient());
        assert!(bucket.put("a", b"1", T).is_err());
        // Third attempt succeeds
        bucket.put("a", b"1", T).unwrap();
        assert!(bucket.contains("a"));
    }

    #[test]
    fn test_prefix_scoped_failures() {
        let bucket = MemoryBucket::new();
        bucket.fail_next_puts_matching("meta/", 1);

        bucket.put("data/x", b"1", T).unwrap();
        assert!(bucket.put("meta/index.json", b"{}", T).is_err());
        bucket.put("meta/index.json", b"{}", T).unwrap();
    }

    #[test]
    fn test_latency_over_budget_times_out_without_applying() {
        let bucket = MemoryBucket::new();
        bucket.set_latency(Duration::from_secs(10));

        match bucket.put("a", b"1", Duration::from_secs(1)) {
            Err(StoreError::Timeout { .. }) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
        bucket.set_latency(Duration::ZERO);
        assert!(!bucket.contains("a"));
    }

    #[test]
    fn test_list_is_sorted() {
        let bucket = MemoryBucket::new();
        bucket.put("b", b"", T).unwrap();
        bucket.put("a", b"", T).unwrap();
        assert_eq!(bucket.list("", T).unwrap(), vec!["a".to_string(), "b".to_string()]);
    }
}
