//! Fetch a stored version of a path

use crate::util::Context;
use anyhow::{Context as _, Result};
use owo_colors::OwoColorize;
use replicator::{load_or_rebuild, PathState, VersionEntry};
use std::io::Write;
use std::path::PathBuf;

pub async fn run(
    ctx: Context,
    path: &str,
    version: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let index = load_or_rebuild(ctx.bucket.as_ref(), ctx.timeout)?;

    let entry: &VersionEntry = match version {
        Some(n) => index
            .version(path, n)
            .with_context(|| format!("{path} has no version {n}"))?,
        None => match index.current_version(path) {
            PathState::Live(entry) => entry,
            PathState::Deleted(entry) => {
                anyhow::bail!(
                    "{path} was deleted at version {} (sequence {})",
                    entry.version,
                    entry.sequence
                );
            }
            PathState::Unknown => anyhow::bail!("unknown path: {path}"),
        },
    };

    let object_key = entry
        .object_key
        .as_ref()
        .with_context(|| format!("{path} v{} is a tombstone; nothing to fetch", entry.version))?;

    let bytes = ctx
        .bucket
        .get(object_key, ctx.timeout)
        .with_context(|| format!("failed to fetch {object_key}"))?;

    match output {
        Some(out_path) => {
            std::fs::write(&out_path, &bytes)
                .with_context(|| format!("failed to write {}", out_path.display()))?;
            println!(
                "{} {} v{} ({} bytes) -> {}",
                "Fetched".green().bold(),
                path,
                entry.version,
                bytes.len(),
                out_path.display()
            );
        }
        None => {
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(())
}
