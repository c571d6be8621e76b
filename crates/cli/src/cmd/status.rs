//! Show index summary

use crate::util::Context;
use anyhow::Result;
use owo_colors::OwoColorize;
use replicator::{LoadError, PathState, VersionIndex};

pub async fn run(ctx: Context, verbose: bool) -> Result<()> {
    let index = match VersionIndex::load(ctx.bucket.as_ref(), ctx.timeout) {
        Ok(index) => index,
        Err(LoadError::Missing) => {
            println!("{}", "No index in this bucket yet".dimmed());
            println!();
            println!("{}", "Tip: 'cloudtail replay <journal>' creates one".dimmed());
            return Ok(());
        }
        Err(LoadError::Corrupt(reason)) => {
            println!("{} {}", "Index is corrupt:".red().bold(), reason);
            println!("Run 'cloudtail rebuild' to reconstruct it from bucket contents");
            std::process::exit(1);
        }
        Err(LoadError::Store(e)) => return Err(e.into()),
    };

    let mut live = 0usize;
    let mut deleted = 0usize;
    let mut versions = 0usize;
    for path in index.paths() {
        versions += index.history(path).map_or(0, |h| h.len());
        match index.current_version(path) {
            PathState::Deleted(_) => deleted += 1,
            _ => live += 1,
        }
    }

    println!("{}", "Index status".bold());
    println!("  paths:     {} ({} live, {} deleted)", index.path_count(), live, deleted);
    println!("  versions:  {}", versions);
    println!("  watermark: {}", index.last_applied());

    if verbose {
        println!();
        for path in index.paths() {
            let history = index.history(path).unwrap_or(&[]);
            match index.current_version(path) {
                PathState::Deleted(entry) => println!(
                    "  {} {} ({} versions, deleted at v{})",
                    "✗".red(),
                    path.dimmed(),
                    history.len(),
                    entry.version
                ),
                PathState::Live(entry) => println!(
                    "  {} {} ({} versions, latest v{})",
                    "✓".green(),
                    path,
                    history.len(),
                    entry.version
                ),
                PathState::Unknown => {}
            }
        }
    }
    Ok(())
}
