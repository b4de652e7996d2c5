//! Tunesync - keeps a music catalog database in step with a folder of audio
//! files and YAML sidecars.
//!
//! The [`library::Library`] engine runs full scans and applies watcher events;
//! everything it needs from the outside world (tag reading, encoding,
//! waveform extraction) sits behind traits so it can be swapped in tests.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod library;
pub mod media;
pub mod metadata;
pub mod model;
pub mod queue;
pub mod retry;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;
