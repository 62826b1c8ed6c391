//! Batch publishing of the combined table to the ingestion API.
//!
//! The table is split into contiguous, ordered batches; each batch is one
//! blocking POST. A failed batch is logged and counted, the remaining batches
//! are still sent, and the aggregate result is `false`.

pub mod sink;

use serde::Serialize;
use std::ops::Range;
use thiserror::Error;
use tracing::{error, info};

use crate::domain::{canonical_hour, PriceRecord, Subsystem};
use crate::normalize::PriceTable;
pub use sink::{BatchError, HttpIngestSink, IngestSettings, IngestSink};

/// Table-level refusal to publish. Nothing is sent.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("table is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("table has no records to publish")]
    EmptyTable,

    #[error("batch size must be at least 1")]
    ZeroBatchSize,
}

/// One record as the ingestion API expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestRecord {
    #[serde(rename = "Sistema")]
    pub sistema: Subsystem,
    /// `YYYY-MM-DD`
    #[serde(rename = "Fecha")]
    pub fecha: String,
    /// `HH:00:00`
    #[serde(rename = "Hora")]
    pub hora: String,
    #[serde(rename = "Clave")]
    pub clave: String,
    #[serde(rename = "PML")]
    pub pml: f64,
    #[serde(rename = "Energia")]
    pub energia: f64,
    #[serde(rename = "Congestion")]
    pub congestion: f64,
    #[serde(rename = "Perdidas")]
    pub perdidas: f64,
}

impl From<&PriceRecord> for IngestRecord {
    fn from(r: &PriceRecord) -> Self {
        IngestRecord {
            sistema: r.subsystem,
            fecha: r.date.format("%Y-%m-%d").to_string(),
            hora: canonical_hour(r.hour),
            clave: r.node.clone(),
            pml: r.pml,
            energia: r.energy,
            congestion: r.congestion,
            perdidas: r.loss,
        }
    }
}

/// Contiguous index ranges covering `0..len` in chunks of at most `size`.
pub fn partition(len: usize, size: usize) -> Vec<Range<usize>> {
    if size == 0 {
        return Vec::new();
    }
    (0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect()
}

/// Result of one batch.
#[derive(Debug)]
pub struct BatchOutcome {
    /// 1-based batch number.
    pub index: usize,
    pub range: Range<usize>,
    pub result: Result<(), BatchError>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Aggregate of a publish run.
#[derive(Debug)]
pub struct PublishReport {
    pub total_records: usize,
    pub records_sent: usize,
    pub batches: Vec<BatchOutcome>,
}

impl PublishReport {
    /// True only when every batch was acknowledged and every record sent.
    pub fn succeeded(&self) -> bool {
        self.batches.iter().all(|b| b.result.is_ok()) && self.records_sent == self.total_records
    }

    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.batches.iter().filter(|b| b.result.is_err())
    }
}

/// Sends a [`PriceTable`] through an [`IngestSink`] in fixed-size batches.
pub struct BatchPublisher<'a> {
    sink: &'a dyn IngestSink,
    batch_size: usize,
}

impl<'a> BatchPublisher<'a> {
    pub fn new(sink: &'a dyn IngestSink, batch_size: usize) -> Self {
        Self { sink, batch_size }
    }

    pub fn publish(&self, table: &PriceTable) -> Result<PublishReport, PublishError> {
        let missing = table.missing_columns();
        if !missing.is_empty() {
            error!(missing = ?missing, "required columns missing; nothing sent");
            return Err(PublishError::MissingColumns(missing));
        }
        if table.is_empty() {
            return Err(PublishError::EmptyTable);
        }
        if self.batch_size == 0 {
            return Err(PublishError::ZeroBatchSize);
        }

        let records: Vec<IngestRecord> = table.records.iter().map(IngestRecord::from).collect();
        let ranges = partition(records.len(), self.batch_size);
        let total = ranges.len();
        info!(
            total_records = records.len(),
            batch_size = self.batch_size,
            batches = total,
            "publishing"
        );

        let mut batches = Vec::with_capacity(total);
        let mut records_sent = 0;
        for (i, range) in ranges.into_iter().enumerate() {
            let index = i + 1;
            info!(batch = index, of = total, "Records {}-{}", range.start + 1, range.end);

            let result = self.sink.send(&records[range.clone()]);
            match &result {
                Ok(()) => {
                    records_sent += range.len();
                    info!(batch = index, of = total, "batch sent");
                }
                Err(BatchError::Connection(e)) => {
                    error!(batch = index, error = %e, "connection refused by ingestion API")
                }
                Err(BatchError::Timeout(e)) => {
                    error!(batch = index, error = %e, "ingestion request timed out")
                }
                Err(BatchError::Status { code, reason, body }) => {
                    error!(batch = index, status = code, reason = %reason, body = %body, "ingestion API rejected batch")
                }
                Err(BatchError::Request(e)) => {
                    error!(batch = index, error = %e, "ingestion request failed")
                }
            }
            batches.push(BatchOutcome {
                index,
                range,
                result,
            });
        }

        let report = PublishReport {
            total_records: records.len(),
            records_sent,
            batches,
        };
        if report.succeeded() {
            info!(records_sent, "all batches sent");
        } else {
            error!(
                records_sent,
                total_records = report.total_records,
                failed_batches = report.failed_batches().count(),
                "one or more batches failed"
            );
        }
        Ok(report)
    }
}
