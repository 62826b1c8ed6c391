//! Ingestion sink trait and the blocking HTTP implementation.
//!
//! [`IngestSink`] is the seam between batching and transport: the publisher
//! only knows "send this batch", tests substitute an in-memory sink.

use reqwest::header;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use super::IngestRecord;

/// Failure of a single batch POST. Never stops later batches.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("could not connect to ingestion API: {0}")]
    Connection(String),

    #[error("ingestion request timed out: {0}")]
    Timeout(String),

    #[error("ingestion API returned HTTP {code} {reason}: {body}")]
    Status {
        code: u16,
        reason: String,
        body: String,
    },

    #[error("ingestion request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for BatchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BatchError::Timeout(e.to_string())
        } else if e.is_connect() {
            BatchError::Connection(e.to_string())
        } else {
            BatchError::Request(e.to_string())
        }
    }
}

/// Destination of published batches.
pub trait IngestSink {
    /// Deliver one batch. `Ok` means the API acknowledged it with a 2xx.
    fn send(&self, batch: &[IngestRecord]) -> Result<(), BatchError>;
}

/// Downstream API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub base_url: String,
    pub target_source: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            target_source: "data_source_1".into(),
            batch_size: 100,
            timeout_secs: 180,
        }
    }
}

impl IngestSettings {
    /// `{base_url}/api/v1/mercado/{target_source}` joined with single slashes.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/api/v1/mercado/{}",
            self.base_url.trim_end_matches('/'),
            self.target_source.trim_start_matches('/')
        )
    }
}

/// JSON-over-HTTP sink for the ingestion API.
pub struct HttpIngestSink {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpIngestSink {
    pub fn new(settings: &IngestSettings) -> Result<Self, BatchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| BatchError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: settings.endpoint(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl IngestSink for HttpIngestSink {
    fn send(&self, batch: &[IngestRecord]) -> Result<(), BatchError> {
        debug!(endpoint = %self.endpoint, records = batch.len(), "POST batch");
        let resp = self
            .client
            .post(&self.endpoint)
            .header(header::ACCEPT, "application/json")
            .json(batch)
            .send()?;

        let status = resp.status();
        let body = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(BatchError::Status {
                code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            });
        }

        match serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok())
        {
            Some(pretty) => info!(status = status.as_u16(), "API response:\n{pretty}"),
            None => info!(status = status.as_u16(), response = %body, "API response (text)"),
        }
        Ok(())
    }
}
