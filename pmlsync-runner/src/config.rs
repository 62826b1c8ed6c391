//! Pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a working
//! configuration against the public portal and a local ingestion API.
//!
//! ```toml
//! log_file = "pml_mda.log"
//!
//! [portal]
//! url = "https://www.cenace.gob.mx/Paginas/SIM/Reportes/PreEnerServConMDA.aspx"
//! timeout_secs = 60
//! # period = "02/05/2024 - 02/05/2024"
//! # date = "02/05/2024"
//!
//! [ingest]
//! base_url = "http://127.0.0.1:5000"
//! target_source = "data_source_1"
//! batch_size = 100
//!
//! [artifacts]
//! working_dir = "."
//! prefix = "PML_MDA"
//! keep_artifacts = true
//! # combined_csv = "PML_MDA_combined.csv"
//!
//! [normalize]
//! header_token = "Hora"
//! date_label = "Fecha:"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use pmlsync_core::artifact::consistency::DEFAULT_DATE_LABEL;
use pmlsync_core::artifact::{ArchiveExtractor, ConsistencyValidator};
use pmlsync_core::normalize::{NormalizeSettings, TableNormalizer};
use pmlsync_core::portal::{FormSettings, PortalSettings, ReportWindow};
use pmlsync_core::publish::IngestSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `[portal]`: session settings, fixed form values and window overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    #[serde(flatten)]
    pub http: PortalSettings,
    #[serde(flatten)]
    pub form: FormSettings,
    /// Reporting period sent to the portal; scraped from the page when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    /// Report date (`dd/mm/yyyy`); scraped from the page when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// `[artifacts]`: where downloads land and what happens to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub working_dir: PathBuf,
    pub prefix: String,
    /// Name of the raw download before it is renamed and unpacked.
    pub interim_name: String,
    /// Leave the per-subsystem files in place after a successful publish.
    pub keep_artifacts: bool,
    /// Write the combined table here after a fully successful publish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined_csv: Option<PathBuf>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            prefix: "PML_MDA".into(),
            interim_name: "resultado.zip".into(),
            keep_artifacts: true,
            combined_csv: None,
        }
    }
}

/// `[normalize]`: report layout plus the date label the validator looks for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    #[serde(flatten)]
    pub table: NormalizeSettings,
    pub date_label: String,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            table: NormalizeSettings::default(),
            date_label: DEFAULT_DATE_LABEL.into(),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub portal: PortalConfig,
    pub ingest: IngestSettings,
    pub artifacts: ArtifactConfig,
    pub normalize: NormalizeConfig,
    /// Append log output to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.portal.http.url.trim().is_empty() {
            return invalid("portal.url must not be empty");
        }
        if self.ingest.base_url.trim().is_empty() {
            return invalid("ingest.base_url must not be empty");
        }
        if self.ingest.batch_size == 0 {
            return invalid("ingest.batch_size must be at least 1");
        }
        if self.artifacts.prefix.trim().is_empty() {
            return invalid("artifacts.prefix must not be empty");
        }
        if self.normalize.date_label.is_empty() {
            return invalid("normalize.date_label must not be empty");
        }
        Ok(())
    }

    pub fn window(&self) -> ReportWindow {
        ReportWindow {
            period: self.portal.period.clone(),
            date: self.portal.date.clone(),
        }
    }

    pub fn extractor(&self) -> ArchiveExtractor {
        ArchiveExtractor::new(
            &self.artifacts.working_dir,
            &self.artifacts.prefix,
            &self.artifacts.interim_name,
        )
    }

    pub fn validator(&self) -> ConsistencyValidator {
        ConsistencyValidator::new(&self.artifacts.working_dir, &self.artifacts.prefix)
            .with_date_label(&self.normalize.date_label)
    }

    pub fn normalizer(&self) -> TableNormalizer {
        TableNormalizer::new(self.normalize.table.clone())
    }
}
