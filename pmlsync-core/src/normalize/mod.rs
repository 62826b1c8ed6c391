//! Table normalization: validated artifacts → one combined [`PriceTable`].
//!
//! Per artifact:
//! 1. Locate the header row (first line containing the header token, else a
//!    fixed default offset).
//! 2. Parse the rest as CSV, strip the unit suffix from labels, tag rows with
//!    the subsystem.
//! 3. Rename source labels to canonical names.
//!
//! The shared date label is parsed once and stamped on every record, and each
//! source hour is mapped to its canonical `HH:00:00` label.

pub mod date;
pub mod table;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::consistency::ValidatedArtifacts;
use crate::domain::{HourOfDay, PriceRecord, Subsystem};
pub use date::parse_date_label;
pub use table::{PriceTable, RawTable, REQUIRED_COLUMNS};
use table::{
    COL_CLAVE, COL_CONGESTION, COL_ENERGIA, COL_FECHA, COL_HORA, COL_PERDIDAS, COL_PML,
    COL_SISTEMA,
};

/// Data-shape errors. Any of them halts the pipeline before publish.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("invalid report date: {0}")]
    InvalidDate(String),

    #[error("{subsystem}: no table found after line {header_row}")]
    NoTable { subsystem: Subsystem, header_row: usize },

    #[error("{subsystem}: CSV parse error: {source}")]
    Csv {
        subsystem: Subsystem,
        #[source]
        source: csv::Error,
    },

    #[error("{subsystem}: missing column '{column}'")]
    MissingColumn { subsystem: Subsystem, column: String },

    #[error("{subsystem}: line {line}: invalid {column} value {value:?}")]
    InvalidNumber {
        subsystem: Subsystem,
        line: usize,
        column: String,
        value: String,
    },
}

/// Layout knobs of the exported report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeSettings {
    /// A line containing this token is the header row.
    pub header_token: String,
    /// Header row (0-based) when no line contains the token.
    pub default_header_row: usize,
    /// Removed from every column label.
    pub unit_suffix: String,
    /// Source label → canonical label.
    pub column_map: BTreeMap<String, String>,
    /// Largest tolerated |PML - (energy + loss + congestion)| before warning.
    pub component_tolerance: f64,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        let column_map = [
            ("Clave del nodo", COL_CLAVE),
            ("Precio marginal local", COL_PML),
            ("Componente de energia", COL_ENERGIA),
            ("Componente de perdidas", COL_PERDIDAS),
            ("Componente de congestion", COL_CONGESTION),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            header_token: COL_HORA.to_string(),
            default_header_row: 7,
            unit_suffix: "($/MWh)".to_string(),
            column_map,
            component_tolerance: 0.1,
        }
    }
}

/// Index of the first line containing `token`.
pub fn find_header_row(text: &str, token: &str) -> Option<usize> {
    text.lines().position(|line| line.contains(token))
}

/// Coerce a source hour cell to an integer; non-numeric cells become 0.
pub fn parse_hour(cell: &str) -> Option<i64> {
    let cell = cell.trim();
    cell.parse::<i64>().ok().or_else(|| {
        cell.parse::<f64>()
            .ok()
            .filter(|h| h.is_finite())
            .map(|h| h.trunc() as i64)
    })
}

/// Builds the combined table from validated artifacts.
#[derive(Debug, Clone, Default)]
pub struct TableNormalizer {
    settings: NormalizeSettings,
}

impl TableNormalizer {
    pub fn new(settings: NormalizeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NormalizeSettings {
        &self.settings
    }

    /// Parse one artifact's tabular region with cleaned header labels.
    pub fn parse_artifact(
        &self,
        subsystem: Subsystem,
        text: &str,
    ) -> Result<RawTable, NormalizeError> {
        let header_row = find_header_row(text, &self.settings.header_token).unwrap_or_else(|| {
            warn!(
                subsystem = %subsystem,
                token = %self.settings.header_token,
                default = self.settings.default_header_row,
                "header token not found; using default header row"
            );
            self.settings.default_header_row
        });
        debug!(subsystem = %subsystem, header_row, "header row located");

        let region = text.lines().skip(header_row).collect::<Vec<_>>().join("\n");
        if region.trim().is_empty() {
            return Err(NormalizeError::NoTable {
                subsystem,
                header_row,
            });
        }

        let csv_err = |source: csv::Error| NormalizeError::Csv { subsystem, source };
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(region.as_bytes());

        let headers = rdr
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(|h| h.replace(&self.settings.unit_suffix, "").trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(csv_err)?;
            if record.iter().all(|cell| cell.is_empty()) {
                continue;
            }
            let line = record
                .position()
                .map(|p| p.line() as usize + header_row)
                .unwrap_or_default();
            rows.push((line, record.iter().map(str::to_string).collect()));
        }

        Ok(RawTable { headers, rows })
    }

    /// Apply the column map to a table's labels.
    pub fn rename_columns(&self, table: &mut RawTable) {
        for header in &mut table.headers {
            if let Some(canonical) = self.settings.column_map.get(header.as_str()) {
                *header = canonical.clone();
            }
        }
    }

    /// Merge every validated artifact into one table.
    pub fn normalize(&self, validated: &ValidatedArtifacts) -> Result<PriceTable, NormalizeError> {
        let date = parse_date_label(&validated.date_label).map_err(NormalizeError::InvalidDate)?;

        let mut columns: Vec<String> = Vec::new();
        let mut records = Vec::new();
        let mut coerced_hours = 0usize;

        for artifact in &validated.artifacts {
            let subsystem = artifact.subsystem;
            let mut table = self.parse_artifact(subsystem, &artifact.text)?;
            self.rename_columns(&mut table);

            for header in &table.headers {
                if !header.is_empty() && !columns.contains(header) {
                    columns.push(header.clone());
                }
            }

            let col = |name: &str| {
                table
                    .column_index(name)
                    .ok_or_else(|| NormalizeError::MissingColumn {
                        subsystem,
                        column: name.to_string(),
                    })
            };
            let (hora, clave, pml, energia, perdidas, congestion) = (
                col(COL_HORA)?,
                col(COL_CLAVE)?,
                col(COL_PML)?,
                col(COL_ENERGIA)?,
                col(COL_PERDIDAS)?,
                col(COL_CONGESTION)?,
            );

            let before = records.len();
            for (line, cells) in &table.rows {
                let cell = |i: usize| cells.get(i).map(String::as_str).unwrap_or("");
                // NaN and infinities parse as f64 but are not prices
                let number = |i: usize, column: &str| {
                    cell(i)
                        .parse::<f64>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| NormalizeError::InvalidNumber {
                            subsystem,
                            line: *line,
                            column: column.to_string(),
                            value: cell(i).to_string(),
                        })
                };

                let hour = parse_hour(cell(hora)).unwrap_or_else(|| {
                    coerced_hours += 1;
                    0
                });

                records.push(PriceRecord {
                    subsystem,
                    date,
                    hour,
                    hora: HourOfDay::from_source_hour(hour),
                    node: cell(clave).to_string(),
                    pml: number(pml, COL_PML)?,
                    energy: number(energia, COL_ENERGIA)?,
                    loss: number(perdidas, COL_PERDIDAS)?,
                    congestion: number(congestion, COL_CONGESTION)?,
                });
            }
            info!(subsystem = %subsystem, rows = records.len() - before, "artifact normalized");
        }

        if coerced_hours > 0 {
            warn!(rows = coerced_hours, "non-numeric hour values mapped to 00:00:00");
        }

        let tolerance = self.settings.component_tolerance;
        let off = records
            .iter()
            .filter(|r| r.component_residual().abs() > tolerance)
            .count();
        if off > 0 {
            warn!(rows = off, tolerance, "PML differs from the sum of its components");
        }

        for extra in [COL_SISTEMA, COL_FECHA] {
            if !columns.iter().any(|c| c == extra) {
                columns.push(extra.to_string());
            }
        }

        info!(rows = records.len(), date = %date, "combined table built");
        Ok(PriceTable {
            date,
            columns,
            records,
        })
    }
}
