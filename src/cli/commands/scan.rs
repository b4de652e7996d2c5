//! Library scanning, watching and listing commands.

use std::path::Path;
use std::time::Duration;

use tokio::runtime::Runtime;
use tracing::{info, warn};

use super::{build_library, open_db};
use crate::config::{Config, WatcherKind};
use crate::db;
use crate::library::{Library, ScanReport};
use crate::scanner::{NotifyBackend, PollingBackend, WatchBackend};

/// Scan a directory and reconcile the database with it
pub fn cmd_scan(rt: &Runtime, config: &Config, db_path: &Path, root: &Path) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_db(db_path).await?;
        let library = build_library(pool, config);

        println!("Scanning directory: {}", root.display());
        let report = library.scan_directory(root).await?;

        println!("Waiting for conversions to finish...");
        library.queue().flush().await;
        print_report(&report);
        Ok::<_, anyhow::Error>(())
    })
}

/// List all tracks in the database
pub fn cmd_list(rt: &Runtime, db_path: &Path) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_db(db_path).await?;
        for track in db::get_tracks(&pool, None).await? {
            let location = track
                .file_path
                .as_deref()
                .or(track.url.as_deref())
                .unwrap_or("-");
            let lossless = if track.lossless_path.is_some() { " [+lossless]" } else { "" };
            println!("{:>5}  {} - {}{}", track.id, track.title, location, lossless);
        }
        Ok::<_, anyhow::Error>(())
    })
}

/// Watch a directory and apply changes until Ctrl+C
pub fn cmd_watch(
    rt: &Runtime,
    config: &Config,
    db_path: &Path,
    root: &Path,
    scan_first: bool,
    polling: bool,
) -> anyhow::Result<()> {
    rt.block_on(async {
        let pool = open_db(db_path).await?;
        let library = build_library(pool, config);

        if scan_first {
            println!("Running initial scan...");
            let report = library.scan_directory(root).await?;
            print_report(&report);
        }

        let backend = backend_for(config, polling);

        println!("Watching for changes in: {}", root.display());
        println!("Press Ctrl+C to stop.\n");

        tokio::select! {
            result = watch_until_closed(&library, root, backend.as_ref()) => result?,
            _ = tokio::signal::ctrl_c() => {
                info!(target: "cli::watch", "Interrupted, stopping watcher");
            }
        }

        library.queue().flush().await;
        Ok::<_, anyhow::Error>(())
    })
}

async fn watch_until_closed(
    library: &Library,
    root: &Path,
    backend: &dyn WatchBackend,
) -> anyhow::Result<()> {
    library.watch(root, backend).await?;
    warn!(target: "cli::watch", "Watcher closed unexpectedly");
    Ok(())
}

fn backend_for(config: &Config, polling: bool) -> Box<dyn WatchBackend> {
    let watcher = &config.watcher;
    if polling || watcher.backend == WatcherKind::Polling {
        Box::new(PollingBackend {
            interval: Duration::from_millis(watcher.poll_interval_ms),
        })
    } else {
        Box::new(NotifyBackend {
            stability: Duration::from_millis(watcher.stability_ms),
        })
    }
}

fn print_report(report: &ScanReport) {
    println!(
        "Scan complete: {} files processed, {} failed",
        report.successful, report.failed
    );
    println!(
        "Configs: {} applied, {} skipped",
        report.configs.processed, report.configs.failed
    );
    println!(
        "Cleanup: {} duplicates, {} stale, {} lossless cleared, {} regenerated, {} albums fixed",
        report.dedup.removed,
        report.cleanup.deleted,
        report.cleanup.lossless_cleared,
        report.cleanup.regenerations,
        report.orphans.fixed
    );
    for failure in &report.failures {
        eprintln!("  {}: {}", failure.path.display(), failure.message);
    }
}
