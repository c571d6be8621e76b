//! Journal replication for Cloudtail
//!
//! This crate provides:
//! - The journal reader (framed write/remove events)
//! - The version index (path -> ordered version history)
//! - The replication pipeline (upload, dedup, commit, persist)
//! - The recovery rebuilder (index reconstruction from bucket contents)
//! - The replication lease (single-replayer exclusivity)

pub mod index;
pub mod lease;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod recovery;

// Re-exports
pub use index::{IndexError, LoadError, PathState, VersionEntry, VersionIndex};
pub use lease::{Lease, LeaseError};
pub use pipeline::{ReplayConfig, ReplayError, ReplayReport, Replicator, StopReason};
pub use reader::{JournalError, JournalReader};
pub use record::{JournalRecord, Operation};
pub use recovery::{load_or_rebuild, rebuild};

/// Current time as milliseconds since the UNIX epoch
pub(crate) fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("System time before UNIX epoch")
        .as_millis() as u64
}
