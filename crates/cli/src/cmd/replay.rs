//! Replay a write-event journal into the bucket

use crate::util::{Context, EXIT_LEASE_CONFLICT, EXIT_PARTIAL};
use anyhow::{Context as _, Result};
use owo_colors::OwoColorize;
use replicator::{
    load_or_rebuild, JournalReader, Lease, LeaseError, ReplayConfig, ReplayError, Replicator,
    StopReason,
};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

pub struct Options {
    pub workers: usize,
    pub max_in_flight: usize,
    pub max_attempts: u32,
    pub persist_every: usize,
    pub lease_ttl_secs: u64,
}

pub async fn run(ctx: Context, journal_path: &Path, options: Options) -> Result<()> {
    // 1. Take the replication lease; a conflict means another replayer owns
    //    this bucket right now and we must not race it
    let lease = match Lease::acquire(
        Arc::clone(&ctx.bucket),
        Duration::from_secs(options.lease_ttl_secs),
        ctx.timeout,
    ) {
        Ok(lease) => lease,
        Err(LeaseError::Held { holder, remaining_ms }) => {
            eprintln!(
                "{} lease held by {} ({}s remaining)",
                "Replay refused:".red().bold(),
                holder,
                remaining_ms / 1000
            );
            std::process::exit(EXIT_LEASE_CONFLICT);
        }
        Err(e) => return Err(e).context("failed to acquire replication lease"),
    };

    // 2. Load the durable index, rebuilding if missing or corrupt
    let mut index = load_or_rebuild(ctx.bucket.as_ref(), ctx.timeout)?;
    let resume_from = index.last_applied();
    if resume_from > 0 {
        println!(
            "Resuming after sequence {}",
            resume_from.to_string().cyan()
        );
    }

    // 3. Open the journal
    let reader = JournalReader::open(journal_path)
        .with_context(|| format!("failed to open journal {}", journal_path.display()))?;

    // 4. Run the pipeline on a blocking thread, with Ctrl-C requesting a
    //    clean stop at the next record boundary
    let config = ReplayConfig {
        upload_workers: options.workers,
        max_in_flight: options.max_in_flight,
        max_attempts: options.max_attempts,
        persist_every: options.persist_every,
        op_timeout: ctx.timeout,
        ..ReplayConfig::default()
    };
    let replicator = Replicator::new(Arc::clone(&ctx.bucket), config);
    let cancel = replicator.cancel_token();
    let signal_cancel = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, finishing current record");
            signal_cancel.store(true, Ordering::Relaxed);
        }
    });

    let (run_result, index) = tokio::task::spawn_blocking(move || {
        let result = replicator.run(&mut index, reader);
        (result, index)
    })
    .await
    .context("replay task panicked")?;

    // 5. Report and release
    match run_result {
        Ok(report) => {
            println!("{}", "Replay finished".green().bold());
            println!("  records seen:       {}", report.records_seen);
            println!("  already applied:    {}", report.records_skipped);
            println!("  writes uploaded:    {}", report.writes_uploaded);
            println!("  tombstones:         {}", report.tombstones_committed);
            println!("  watermark:          {}", report.last_applied);

            lease.release().context("failed to release lease")?;

            match report.stop {
                StopReason::JournalExhausted => Ok(()),
                StopReason::TruncatedTail => {
                    println!(
                        "{}",
                        "Journal ended mid-frame; rerun once the producer catches up".yellow()
                    );
                    std::process::exit(EXIT_PARTIAL);
                }
                StopReason::Cancelled => {
                    println!("{}", "Cancelled; rerun to resume".yellow());
                    std::process::exit(EXIT_PARTIAL);
                }
            }
        }
        Err(e @ ReplayError::Logic(_)) => {
            // Index invariant violations are never retried; leave the lease
            // release to Drop and surface the error
            eprintln!("{} {}", "Fatal:".red().bold(), e);
            Err(e).context("index invariant violated during replay")
        }
        Err(e) => {
            eprintln!("{} {}", "Replay halted:".red().bold(), e);
            println!(
                "Committed work through sequence {} is persisted; rerun to resume",
                index.last_applied()
            );
            lease.release().context("failed to release lease")?;
            std::process::exit(EXIT_PARTIAL);
        }
    }
}
