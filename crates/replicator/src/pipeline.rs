//! Replication pipeline
//!
//! Drains a journal into the bucket and commits each record into the version
//! index. Per-record state machine:
//!
//! ```text
//! RECEIVED -> UPLOADING -> UPLOADED -> COMMITTED -> PERSISTED
//!                  \            \
//!                   +-- FAILED --+   (fail-stop: nothing later commits)
//! ```
//!
//! Uploads run on a bounded worker pool; commits stay strictly sequential in
//! journal order. Out-of-order upload completions are buffered in the window
//! and released to the committer in order, which preserves the gapless
//! per-path version numbering.
//!
//! Crash safety rests on deterministic object keys: an interrupted run may
//! leave uploaded-but-uncommitted objects behind, and the next run re-derives
//! the same key for the same record, so the retried upload overwrites
//! identical content and the commit happens exactly once.

use crate::index::{IndexError, VersionIndex};
use crate::reader::JournalReader;
use crate::record::Operation;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use store::{key, Bucket, StoreError};
use thiserror::Error;

/// Tuning knobs for a replay run
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Upload worker threads
    pub upload_workers: usize,
    /// Maximum records uploading concurrently
    pub max_in_flight: usize,
    /// Attempts per store call before giving up
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Commits between index persists (1 = persist every commit); the tail
    /// is always flushed before the run ends
    pub persist_every: usize,
    /// Timeout for each store call
    pub op_timeout: Duration,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            upload_workers: 4,
            max_in_flight: 16,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            persist_every: 1,
            op_timeout: Duration::from_secs(30),
        }
    }
}

/// Why the pipeline stopped consuming the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every record was consumed
    JournalExhausted,
    /// The final frame declared more payload bytes than the journal holds;
    /// all earlier complete records were replayed
    TruncatedTail,
    /// Cooperative cancellation between records
    Cancelled,
}

/// Summary of a completed (or cleanly stopped) replay run
#[derive(Debug)]
pub struct ReplayReport {
    pub records_seen: u64,
    pub records_skipped: u64,
    pub writes_uploaded: u64,
    pub tombstones_committed: u64,
    /// Watermark after the final persist; a future run resumes past this
    pub last_applied: u64,
    pub stop: StopReason,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.stop == StopReason::JournalExhausted
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("upload failed for sequence {sequence} after {attempts} attempts: {source}")]
    UploadFailed {
        sequence: u64,
        attempts: u32,
        source: StoreError,
    },

    #[error("index persist failed after {attempts} attempts: {source}")]
    PersistFailed { attempts: u32, source: StoreError },

    /// A commit the index rejected; indicates a bug or a concurrent writer,
    /// never retried
    #[error("index rejected commit: {0}")]
    Logic(#[from] IndexError),

    #[error("upload workers exited unexpectedly")]
    WorkersGone,
}

/// Per-record pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordState {
    Uploading,
    Uploaded,
    Committed,
    Failed,
}

/// A record admitted to the pipeline but not yet committed
struct Pending {
    sequence: u64,
    path: String,
    tombstone: bool,
    object_key: Option<String>,
    state: RecordState,
}

struct UploadJob {
    sequence: u64,
    key: String,
    payload: Vec<u8>,
}

type UploadOutcome = (u64, Result<(), (u32, StoreError)>);

/// Single-journal replication pipeline
pub struct Replicator {
    bucket: Arc<dyn Bucket>,
    config: ReplayConfig,
    cancel: Arc<AtomicBool>,
}

impl Replicator {
    pub fn new(bucket: Arc<dyn Bucket>, config: ReplayConfig) -> Self {
        Self {
            bucket,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Token that requests cancellation at the next record boundary
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Replay a journal into the index
    ///
    /// On success the index is persisted and the report carries the final
    /// watermark. On failure, everything committed before the failure point
    /// has been persisted, so re-running with the same journal resumes where
    /// this run stopped.
    pub fn run<R: BufRead>(
        &self,
        index: &mut VersionIndex,
        journal: JournalReader<R>,
    ) -> Result<ReplayReport, ReplayError> {
        let (job_tx, job_rx) = bounded::<UploadJob>(self.config.max_in_flight);
        let (result_tx, result_rx) = unbounded::<UploadOutcome>();

        let mut workers = Vec::with_capacity(self.config.upload_workers);
        for i in 0..self.config.upload_workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let bucket = Arc::clone(&self.bucket);
            let config = self.config.clone();
            let handle = thread::Builder::new()
                .name(format!("upload-{i}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        let outcome =
                            upload_with_retry(bucket.as_ref(), &job.key, &job.payload, &config);
                        if result_tx.send((job.sequence, outcome)).is_err() {
                            break;
                        }
                    }
                })
                .expect("failed to spawn upload worker");
            workers.push(handle);
        }
        drop(job_rx);
        drop(result_tx);

        let result = self.drive(index, journal, job_tx, result_rx);

        for handle in workers {
            let _ = handle.join();
        }
        result
    }

    fn drive<R: BufRead>(
        &self,
        index: &mut VersionIndex,
        mut journal: JournalReader<R>,
        job_tx: Sender<UploadJob>,
        result_rx: Receiver<UploadOutcome>,
    ) -> Result<ReplayReport, ReplayError> {
        let mut report = ReplayReport {
            records_seen: 0,
            records_skipped: 0,
            writes_uploaded: 0,
            tombstones_committed: 0,
            last_applied: index.last_applied(),
            stop: StopReason::JournalExhausted,
        };
        let mut window: VecDeque<Pending> = VecDeque::new();
        let mut in_flight = 0usize;
        let mut unpersisted = 0usize;
        let mut failure: Option<ReplayError> = None;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                tracing::info!("cancellation requested, stopping at record boundary");
                report.stop = StopReason::Cancelled;
                break;
            }
            if failure.is_some() {
                break;
            }

            let record = match journal.next() {
                None => break,
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    // The producer was interrupted mid-frame; everything up
                    // to here replays normally and the watermark stays at
                    // the last complete record.
                    tracing::warn!("journal ended early: {e}");
                    report.stop = StopReason::TruncatedTail;
                    break;
                }
            };

            report.records_seen += 1;
            if index.has_applied(record.sequence) {
                tracing::debug!(sequence = record.sequence, "already applied, skipping");
                report.records_skipped += 1;
                continue;
            }

            match record.operation {
                Operation::Remove => {
                    // Tombstones skip the upload step entirely
                    window.push_back(Pending {
                        sequence: record.sequence,
                        path: record.path,
                        tombstone: true,
                        object_key: None,
                        state: RecordState::Uploaded,
                    });
                }
                Operation::Write => {
                    let object_key = key::data_key(&record.path, record.sequence);
                    window.push_back(Pending {
                        sequence: record.sequence,
                        path: record.path,
                        tombstone: false,
                        object_key: Some(object_key.clone()),
                        state: RecordState::Uploading,
                    });
                    let job = UploadJob {
                        sequence: record.sequence,
                        key: object_key,
                        payload: record.payload,
                    };
                    if job_tx.send(job).is_err() {
                        failure = Some(ReplayError::WorkersGone);
                        continue;
                    }
                    in_flight += 1;
                }
            }

            while let Ok(outcome) = result_rx.try_recv() {
                in_flight -= 1;
                apply_outcome(&mut window, outcome, &mut failure);
            }
            while in_flight >= self.config.max_in_flight {
                match result_rx.recv() {
                    Ok(outcome) => {
                        in_flight -= 1;
                        apply_outcome(&mut window, outcome, &mut failure);
                    }
                    Err(_) => {
                        failure = Some(ReplayError::WorkersGone);
                        break;
                    }
                }
            }

            self.commit_ready(index, &mut window, &mut report, &mut unpersisted)?;
        }

        // Stop feeding the pool and wait out whatever is still in flight, so
        // completed uploads ahead of the stop point still commit.
        drop(job_tx);
        while in_flight > 0 {
            match result_rx.recv() {
                Ok(outcome) => {
                    in_flight -= 1;
                    apply_outcome(&mut window, outcome, &mut failure);
                }
                Err(_) => break,
            }
        }
        self.commit_ready(index, &mut window, &mut report, &mut unpersisted)?;

        if let Some(error) = failure {
            // Persist the committed prefix so the failure is resumable; an
            // error here is secondary to the one we are already reporting.
            if unpersisted > 0 {
                if let Err(persist_error) = self.persist_with_retry(index) {
                    tracing::error!("could not persist committed prefix: {persist_error}");
                }
            }
            tracing::error!("replication halted: {error}");
            return Err(error);
        }

        if unpersisted > 0 {
            self.persist_with_retry(index)?;
        }
        report.last_applied = index.last_applied();
        Ok(report)
    }

    /// Commit window entries from the front, in journal order
    ///
    /// Stops at the first entry still uploading (or failed): later records
    /// never commit past an earlier incomplete one.
    fn commit_ready(
        &self,
        index: &mut VersionIndex,
        window: &mut VecDeque<Pending>,
        report: &mut ReplayReport,
        unpersisted: &mut usize,
    ) -> Result<(), ReplayError> {
        while window
            .front()
            .is_some_and(|p| p.state == RecordState::Uploaded)
        {
            let mut pending = window.pop_front().expect("front checked above");
            let version = index.next_version(&pending.path);
            index.commit(
                &pending.path,
                version,
                pending.object_key.take(),
                pending.sequence,
                pending.tombstone,
            )?;
            pending.state = RecordState::Committed;
            tracing::debug!(
                sequence = pending.sequence,
                path = %pending.path,
                version,
                tombstone = pending.tombstone,
                "committed"
            );

            if pending.tombstone {
                report.tombstones_committed += 1;
            } else {
                report.writes_uploaded += 1;
            }
            report.last_applied = index.last_applied();

            *unpersisted += 1;
            if *unpersisted >= self.config.persist_every {
                self.persist_with_retry(index)?;
                *unpersisted = 0;
            }
        }
        Ok(())
    }

    fn persist_with_retry(&self, index: &VersionIndex) -> Result<(), ReplayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match index.persist(self.bucket.as_ref(), self.config.op_timeout) {
                Ok(()) => {
                    tracing::debug!(last_applied = index.last_applied(), "index persisted");
                    return Ok(());
                }
                Err(e) if attempt < self.config.max_attempts && e.is_transient() => {
                    tracing::warn!("index persist attempt {attempt} failed: {e}");
                    thread::sleep(backoff_delay(attempt, &self.config));
                }
                Err(e) => {
                    return Err(ReplayError::PersistFailed {
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        }
    }
}

fn apply_outcome(
    window: &mut VecDeque<Pending>,
    (sequence, outcome): UploadOutcome,
    failure: &mut Option<ReplayError>,
) {
    let Some(pending) = window.iter_mut().find(|p| p.sequence == sequence) else {
        return;
    };
    match outcome {
        Ok(()) => pending.state = RecordState::Uploaded,
        Err((attempts, source)) => {
            pending.state = RecordState::Failed;
            if failure.is_none() {
                *failure = Some(ReplayError::UploadFailed {
                    sequence,
                    attempts,
                    source,
                });
            }
        }
    }
}

fn upload_with_retry(
    bucket: &dyn Bucket,
    object_key: &str,
    payload: &[u8],
    config: &ReplayConfig,
) -> Result<(), (u32, StoreError)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match bucket.put(object_key, payload, config.op_timeout) {
            Ok(()) => {
                tracing::debug!(key = object_key, bytes = payload.len(), "uploaded");
                return Ok(());
            }
            Err(e) if attempt < config.max_attempts && e.is_transient() => {
                tracing::warn!("upload attempt {attempt} for {object_key} failed: {e}");
                thread::sleep(backoff_delay(attempt, config));
            }
            Err(e) => return Err((attempt, e)),
        }
    }
}

/// Exponential backoff, capped
fn backoff_delay(attempt: u32, config: &ReplayConfig) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    config
        .initial_backoff
        .saturating_mul(1u32 << shift)
        .min(config.max_backoff)
}
