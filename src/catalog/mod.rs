//! Sidecar YAML configs: formats and ingestion.

mod cover;
pub mod processor;
pub mod sidecar;

pub use processor::{ConfigSummary, process_global, process_releases, settings};
pub use sidecar::{ArtistConfig, CatalogConfig, ReleaseConfig, SidecarKind, slugify};
