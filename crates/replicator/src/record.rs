//! Journal record types

/// Captured file operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Write,
    Remove,
}

/// One captured write event, parsed from a journal frame
///
/// Constructed by the journal reader and consumed exactly once by the
/// replication pipeline; never persisted beyond the journal itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub operation: Operation,
    /// Globally monotonic sequence number assigned by the journal producer;
    /// the system-wide dedup key
    pub sequence: u64,
    /// Declared payload length in bytes (zero for removes)
    pub payload_size: usize,
    /// Logical file path the operation targets
    pub path: String,
    /// Exactly `payload_size` bytes for writes; empty for removes
    pub payload: Vec<u8>,
}

impl JournalRecord {
    pub fn is_remove(&self) -> bool {
        self.operation == Operation::Remove
    }
}
