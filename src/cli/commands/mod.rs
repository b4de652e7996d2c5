//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in a submodule:
//! - `scan`: full scans, watching and listing

mod scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;

use crate::config::{self, Config};
use crate::db;
use crate::error::Error;
use crate::library::Library;
use crate::media::{FfmpegConverter, SymphoniaWaveform};
use crate::metadata::{LoftyReader, MetadataExtractor};
use crate::queue::ProcessingQueue;

pub use scan::{cmd_list, cmd_scan, cmd_watch};

/// Tunesync CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Database path (overrides the config file)
    #[arg(long, global = true, env = "TUNESYNC_DB")]
    pub db: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan a directory and reconcile the database with it
    Scan {
        /// Library root (defaults to the configured root)
        path: Option<PathBuf>,
    },
    /// List all tracks in the database
    List,
    /// Watch a directory and apply changes as they happen
    Watch {
        /// Library root (defaults to the configured root)
        path: Option<PathBuf>,
        /// Run a full scan before watching
        #[arg(long)]
        scan_first: bool,
        /// Poll the filesystem instead of using native notifications
        #[arg(long)]
        polling: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;
    let config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    let db_path = cli.db.as_deref().unwrap_or(&config.library.database);

    match &cli.command {
        Commands::Scan { path } => {
            let root = library_root(path.as_deref(), &config)?;
            cmd_scan(&rt, &config, db_path, &root)
        }
        Commands::List => cmd_list(&rt, db_path),
        Commands::Watch {
            path,
            scan_first,
            polling,
        } => {
            let root = library_root(path.as_deref(), &config)?;
            cmd_watch(&rt, &config, db_path, &root, *scan_first, *polling)
        }
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// The root given on the command line, else the configured one.
fn library_root(arg: Option<&Path>, config: &Config) -> Result<PathBuf, Error> {
    arg.map(Path::to_path_buf)
        .or_else(|| config.library.root.clone())
        .ok_or_else(|| Error::config("No library path given and none configured"))
}

/// Open the database, running migrations.
pub(crate) async fn open_db(db_path: &Path) -> anyhow::Result<sqlx::SqlitePool> {
    let url = db::db_url(Some(db_path));
    db::init_db(&url)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))
}

/// Engine wired to the production collaborators as configured.
pub(crate) fn build_library(pool: sqlx::SqlitePool, config: &Config) -> Library {
    let processing = &config.processing;
    Library::new(pool, ProcessingQueue::new(processing.workers))
        .with_extractor(MetadataExtractor::new(
            Arc::new(LoftyReader),
            config.retry.policy(),
        ))
        .with_converter(Arc::new(FfmpegConverter::from_config(processing)))
        .with_waveform(Arc::new(SymphoniaWaveform::new(processing.waveform_peaks)))
        .with_case_policy(config.library.case_policy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_watch_flags() {
        let cli = Cli::parse_from(["tunesync", "--db", "x.db", "watch", "/music", "--polling"]);
        assert_eq!(cli.db.as_deref(), Some(Path::new("x.db")));
        match cli.command {
            Commands::Watch {
                path,
                scan_first,
                polling,
            } => {
                assert_eq!(path.as_deref(), Some(Path::new("/music")));
                assert!(!scan_first);
                assert!(polling);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_library_root_falls_back_to_config() {
        let mut config = Config::default();
        assert!(library_root(None, &config).is_err());

        config.library.root = Some(PathBuf::from("/configured"));
        assert_eq!(
            library_root(None, &config).unwrap(),
            PathBuf::from("/configured")
        );
        assert_eq!(
            library_root(Some(Path::new("/given")), &config).unwrap(),
            PathBuf::from("/given")
        );
    }
}
