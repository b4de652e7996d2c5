//! Crate-wide error types.
//!
//! Library modules return [`Error`] through the crate [`Result`] alias, while
//! the binary uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: Top-level error enum shared by every subsystem
//! - [`Error::is_transient`]: the retry predicate used by [`crate::retry`]
//! - [`ResultExt`]: attach human-readable context to any fallible call
//!
//! # Example
//!
//! ```ignore
//! use tunesync::error::{Result, ResultExt};
//!
//! fn load(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path).with_context("reading release.yaml")
//! }
//! ```

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Tag or format parsing failed
    #[error("Metadata error for {path}: {message}")]
    Metadata {
        path: PathBuf,
        message: String,
        /// Whether the failure looks like a file caught mid-write or mid-move
        transient: bool,
    },

    /// Malformed sidecar config (artist.yaml, release.yaml, ...)
    #[error("Invalid sidecar {path}: {message}")]
    Sidecar { path: PathBuf, message: String },

    /// Lossless to mp3 conversion failed
    #[error("Conversion failed for {path}: {message}")]
    Conversion { path: PathBuf, message: String },

    /// Waveform extraction failed
    #[error("Waveform extraction failed for {path}: {message}")]
    Waveform { path: PathBuf, message: String },

    /// Directory walk failed; aborts a full scan
    #[error("Failed to walk {root}: {message}")]
    Walk { root: PathBuf, message: String },

    /// File watcher error
    #[error("Watch error: {0}")]
    Watch(String),

    /// A queued task was dropped before it produced a result
    #[error("Processing queue closed")]
    QueueClosed,

    /// A queued task panicked
    #[error("Queued task panicked: {0}")]
    TaskPanicked(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error produced by an operation whose outcome is shared between callers
    #[error("{0}")]
    Shared(Arc<Error>),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a metadata error that will not be retried.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Create a metadata error that the retry policy may retry.
    pub fn transient_metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Create a sidecar config error.
    pub fn sidecar(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Sidecar {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a conversion error.
    pub fn conversion(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Conversion {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a waveform error.
    pub fn waveform(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Waveform {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// Whether retrying the failed operation may succeed.
    ///
    /// Covers the classes seen when a file is read while still being moved or
    /// converted: truncated reads, busy files and files that vanished.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => is_transient_io(e.kind()),
            Self::Metadata { transient, .. } => *transient,
            Self::WithContext { source, .. } => source.is_transient(),
            Self::Shared(inner) => inner.is_transient(),
            _ => false,
        }
    }
}

/// I/O error kinds that indicate a file in flux rather than a broken file.
pub fn is_transient_io(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::NotFound | ErrorKind::ResourceBusy | ErrorKind::UnexpectedEof
    )
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}
