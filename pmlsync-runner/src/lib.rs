//! pmlsync runner: configuration and pipeline orchestration.
//!
//! This crate builds on `pmlsync-core` to provide:
//! - TOML configuration with defaults for every setting
//! - The export phase (portal session → per-subsystem artifacts)
//! - The process phase (validate → normalize → publish)
//! - Post-success housekeeping (combined CSV, artifact cleanup)

pub mod config;
pub mod pipeline;

pub use config::{ArtifactConfig, ConfigError, NormalizeConfig, PipelineConfig, PortalConfig};
pub use pipeline::{
    build_table, clean, export_phase, process_existing, run_pipeline, PipelineError,
    PipelineReport,
};
