//! Object store client for Cloudtail
//!
//! This crate provides:
//! - The `Bucket` trait: put/get/list/delete against a remote bucket
//! - `DirBucket`: directory-backed bucket with atomic single-object writes
//! - `MemoryBucket`: in-memory bucket with fault injection for tests
//! - Object key encoding (data / meta / mirror namespaces)

pub mod bucket;
pub mod dir;
pub mod error;
pub mod key;
pub mod mem;

// Re-exports
pub use bucket::Bucket;
pub use dir::DirBucket;
pub use error::StoreError;
pub use mem::MemoryBucket;
