//! Pipeline orchestration and the run-level success decision.
//!
//! Two phases:
//! 1. **Export**: one `Result` per subsystem; failures are logged and do not
//!    stop the other subsystems.
//! 2. **Process**: validate → normalize → publish. This phase needs every
//!    artifact; any gate failure aborts before a single record is sent.
//!
//! After a fully successful publish the combined CSV is saved (when
//! configured) and the artifacts are removed (unless kept).

use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

use pmlsync_core::artifact::{delete_artifacts, ArchiveError, ConsistencyError};
use pmlsync_core::normalize::{NormalizeError, PriceTable};
use pmlsync_core::portal::{ExportError, ExportSummary, PortalTransport, ProtocolDriver};
use pmlsync_core::publish::{BatchPublisher, IngestSink, PublishError, PublishReport};

use crate::config::PipelineConfig;

/// Errors that end a run before or instead of publishing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("export error: {0}")]
    Export(#[from] ExportError),
    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error("normalize error: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
    #[error("artifact error: {0}")]
    Artifact(#[from] ArchiveError),
    #[error("failed to render combined table: {0}")]
    Render(#[from] csv::Error),
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a run that reached the publish stage.
#[derive(Debug)]
pub struct PipelineReport {
    /// Present when the run downloaded its own artifacts.
    pub export: Option<ExportSummary>,
    pub publish: PublishReport,
    pub combined_csv: Option<PathBuf>,
    pub removed_artifacts: Vec<PathBuf>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.publish.succeeded()
    }
}

/// Phase 1 only: download and extract every subsystem's artifact.
pub fn export_phase(
    config: &PipelineConfig,
    transport: &dyn PortalTransport,
) -> Result<ExportSummary, PipelineError> {
    let driver = ProtocolDriver::new(
        transport,
        config.portal.form.clone(),
        config.window(),
        config.extractor(),
    );
    let summary = driver.export_all()?;
    for (subsystem, outcome) in &summary.outcomes {
        if let Err(e) = outcome {
            warn!(subsystem = %subsystem, error = %e, "no artifact for subsystem");
        }
    }
    Ok(summary)
}

/// Validate and normalize the artifacts already in the working directory.
pub fn build_table(config: &PipelineConfig) -> Result<PriceTable, PipelineError> {
    let validated = config.validator().validate()?;
    let table = config.normalizer().normalize(&validated)?;
    Ok(table)
}

/// Phase 2 only: validate → normalize → publish on existing artifacts.
pub fn process_existing(
    config: &PipelineConfig,
    sink: &dyn IngestSink,
) -> Result<PipelineReport, PipelineError> {
    let table = build_table(config)?;

    let publish = BatchPublisher::new(sink, config.ingest.batch_size).publish(&table)?;
    info!(
        total_records = publish.total_records,
        records_sent = publish.records_sent,
        batches = publish.batches.len(),
        "upload summary"
    );

    let mut report = PipelineReport {
        export: None,
        publish,
        combined_csv: None,
        removed_artifacts: Vec::new(),
    };
    if !report.succeeded() {
        error!("publish incomplete; artifacts kept for inspection");
        return Ok(report);
    }

    if let Some(path) = &config.artifacts.combined_csv {
        fs::write(path, table.to_csv()?).map_err(|source| PipelineError::Write {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), rows = table.len(), "combined table saved");
        report.combined_csv = Some(path.clone());
    }

    if !config.artifacts.keep_artifacts {
        report.removed_artifacts =
            delete_artifacts(&config.artifacts.working_dir, &config.artifacts.prefix)?;
    }
    Ok(report)
}

/// Full run: export, then process.
pub fn run_pipeline(
    config: &PipelineConfig,
    transport: &dyn PortalTransport,
    sink: &dyn IngestSink,
) -> Result<PipelineReport, PipelineError> {
    let summary = export_phase(config, transport)?;
    if !summary.all_succeeded() {
        warn!(
            failed = summary.failed(),
            "some subsystems were not exported; validation will refuse to merge"
        );
    }

    let mut report = process_existing(config, sink)?;
    report.export = Some(summary);
    if report.succeeded() {
        info!("pipeline complete");
    }
    Ok(report)
}

/// Remove every artifact of this configuration's prefix.
pub fn clean(config: &PipelineConfig) -> Result<Vec<PathBuf>, PipelineError> {
    let removed = delete_artifacts(&config.artifacts.working_dir, &config.artifacts.prefix)?;
    info!(removed = removed.len(), "artifacts cleaned");
    Ok(removed)
}
