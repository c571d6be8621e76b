//! Cloudtail CLI - cloudtail command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;
mod util;

/// Cloudtail - replicate captured file writes to a versioned object bucket
#[derive(Parser)]
#[command(name = "cloudtail")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bucket root directory
    #[arg(long, global = true, default_value = ".")]
    bucket: PathBuf,

    /// Per-call store timeout in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a write-event journal into the bucket
    Replay {
        /// Journal file to replay
        journal: PathBuf,

        /// Upload worker threads
        #[arg(long, default_value = "4")]
        workers: usize,

        /// Maximum concurrent uploads
        #[arg(long, default_value = "16")]
        max_in_flight: usize,

        /// Attempts per store call before giving up
        #[arg(long, default_value = "5")]
        max_attempts: u32,

        /// Commits between index persists (1 = every commit)
        #[arg(long, default_value = "1")]
        persist_every: usize,

        /// Replication lease time-to-live in seconds
        #[arg(long, default_value = "600")]
        lease_ttl_secs: u64,
    },
    /// Rebuild the version index from bucket contents
    Rebuild,
    /// Fetch the latest or a specific version of a path
    Fetch {
        /// Logical path to fetch
        path: String,

        /// Version number (default: latest)
        #[arg(short, long)]
        version: Option<u64>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show index summary
    Status {
        /// List every path with its version count
        #[arg(short, long)]
        verbose: bool,
    },
    /// Upload every file under a directory unconditionally (no versioning)
    Backup {
        /// Directory to walk
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let ctx = util::Context::new(&cli.bucket, cli.timeout_secs)?;

    match cli.command {
        Commands::Replay {
            journal,
            workers,
            max_in_flight,
            max_attempts,
            persist_every,
            lease_ttl_secs,
        } => {
            cmd::replay::run(
                ctx,
                &journal,
                cmd::replay::Options {
                    workers,
                    max_in_flight,
                    max_attempts,
                    persist_every,
                    lease_ttl_secs,
                },
            )
            .await
        }
        Commands::Rebuild => cmd::rebuild::run(ctx).await,
        Commands::Fetch {
            path,
            version,
            output,
        } => cmd::fetch::run(ctx, &path, version, output).await,
        Commands::Status { verbose } => cmd::status::run(ctx, verbose).await,
        Commands::Backup { dir } => cmd::backup::run(ctx, &dir).await,
    }
}
