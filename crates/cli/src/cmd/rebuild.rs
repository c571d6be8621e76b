//! Rebuild the version index from bucket contents

use crate::util::Context;
use anyhow::{Context as _, Result};
use owo_colors::OwoColorize;
use replicator::rebuild;

pub async fn run(ctx: Context) -> Result<()> {
    println!("Rebuilding index from bucket contents...");

    let index = rebuild(ctx.bucket.as_ref(), ctx.timeout)?;
    index
        .validate()
        .map_err(|reason| anyhow::anyhow!("rebuilt index failed validation: {reason}"))?;

    index
        .persist(ctx.bucket.as_ref(), ctx.timeout)
        .context("failed to persist rebuilt index")?;

    println!("{}", "Rebuild complete".green().bold());
    println!("  paths:     {}", index.path_count());
    println!("  watermark: {}", index.last_applied());
    println!(
        "{}",
        "Note: removes are not stored remotely; deleted paths may reappear".yellow()
    );
    Ok(())
}
