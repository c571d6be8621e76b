//! Full-tree backup walker
//!
//! Uploads every regular file under a directory unconditionally into the
//! `mirror/` namespace. Shares the bucket with replication but not the
//! version index: mirror uploads overwrite, they do not version.

use crate::util::Context;
use anyhow::{Context as _, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use store::key;
use walkdir::WalkDir;

pub async fn run(ctx: Context, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut uploaded = 0usize;
    let mut skipped = 0usize;
    let mut bytes_total = 0u64;

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.context("directory walk failed")?;
        if !entry.file_type().is_file() {
            // Symbolic links and such are not covered
            if !entry.file_type().is_dir() {
                tracing::debug!(path = %entry.path().display(), "skipping non-regular file");
                skipped += 1;
            }
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(dir)
            .context("walked path outside the root")?;
        let logical = rel.to_string_lossy().replace('\\', "/");

        let bytes = std::fs::read(entry.path())
            .with_context(|| format!("failed to read {}", entry.path().display()))?;
        ctx.bucket
            .put(&key::mirror_key(&logical), &bytes, ctx.timeout)
            .with_context(|| format!("failed to upload {logical}"))?;

        bytes_total += bytes.len() as u64;
        uploaded += 1;
        tracing::debug!(path = %logical, bytes = bytes.len(), "mirrored");
    }

    println!("{}", "Backup complete".green().bold());
    println!("  files uploaded: {}", uploaded);
    println!("  bytes:          {}", bytes_total);
    if skipped > 0 {
        println!("  skipped:        {} (non-regular files)", skipped);
    }
    Ok(())
}
