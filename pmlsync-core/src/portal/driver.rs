//! Protocol driver: replays the portal's three-round export wizard per subsystem.
//!
//! ```text
//! GET page ──► initial token, period, date
//!   for each subsystem:
//!     round 1  select report   (form, initial token)   ──► token₁
//!     round 2  confirm period  (form, token₁)          ──► token₂
//!     round 3  trigger export  (raw body, enc(token₂)) ──► ZIP attachment
//! ```
//!
//! Every subsystem yields its own `Result`; a failed subsystem never stops the
//! loop. Token misses are logged and replaced by the empty token, leaving the
//! consistency gate to reject whatever the portal sends back.

use std::fmt;
use std::fs;
use thiserror::Error;
use tracing::{error, info, warn};

use super::form_state::{extract_marker_token, InitialFormState, StateToken, VIEWSTATE_FIELD};
use super::request::{self, ExportParams, FormSettings, RequestBody};
use super::transport::{PortalResponse, PortalTransport, ProtocolError};
use crate::artifact::archive::{ArchiveError, ArchiveExtractor, DownloadedArtifact};
use crate::domain::Subsystem;

/// Number of leading body bytes logged when a response is not an attachment.
const PREVIEW_BYTES: usize = 20;

/// Step of the export exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Round {
    InitialPage,
    SelectReport,
    ConfirmPeriod,
    TriggerExport,
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Round::InitialPage => "initial page",
            Round::SelectReport => "round 1 (select report)",
            Round::ConfirmPeriod => "round 2 (confirm period)",
            Round::TriggerExport => "round 3 (trigger export)",
        };
        f.write_str(name)
    }
}

/// Why a subsystem produced no artifact.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{round}: {source}")]
    Protocol {
        round: Round,
        #[source]
        source: ProtocolError,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl ExportError {
    fn at(round: Round) -> impl FnOnce(ProtocolError) -> ExportError {
        move |source| ExportError::Protocol { round, source }
    }
}

/// Period and date overrides; `None` uses the values scraped from the page.
#[derive(Debug, Clone, Default)]
pub struct ReportWindow {
    pub period: Option<String>,
    pub date: Option<String>,
}

/// Per-subsystem outcome of the export phase, in subsystem order.
#[derive(Debug)]
pub struct ExportSummary {
    pub outcomes: Vec<(Subsystem, Result<DownloadedArtifact, ExportError>)>,
}

impl ExportSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &DownloadedArtifact> {
        self.outcomes.iter().filter_map(|(_, r)| r.as_ref().ok())
    }
}

/// Drives the export wizard over one portal session.
pub struct ProtocolDriver<'a> {
    transport: &'a dyn PortalTransport,
    form: FormSettings,
    window: ReportWindow,
    extractor: ArchiveExtractor,
}

impl<'a> ProtocolDriver<'a> {
    pub fn new(
        transport: &'a dyn PortalTransport,
        form: FormSettings,
        window: ReportWindow,
        extractor: ArchiveExtractor,
    ) -> Self {
        Self {
            transport,
            form,
            window,
            extractor,
        }
    }

    /// Export every subsystem.
    ///
    /// Fails only when the report page itself cannot be loaded; everything
    /// after that is reported per subsystem in the summary.
    pub fn export_all(&self) -> Result<ExportSummary, ExportError> {
        let page = self
            .transport
            .fetch_page()
            .map_err(ExportError::at(Round::InitialPage))?;
        let initial = InitialFormState::from_html(&page);
        if initial.token.is_empty() {
            warn!("initial page carries no __VIEWSTATE; continuing with empty token");
        }

        let period = self.resolve("period", &self.window.period, &initial.period);
        let date = self.resolve("date", &self.window.date, &initial.date);
        info!(period = %period, date = %date, "report window");

        let mut outcomes = Vec::with_capacity(Subsystem::ALL.len());
        for subsystem in Subsystem::ALL {
            let params = ExportParams {
                subsystem,
                period: &period,
                date: &date,
            };
            info!(subsystem = %subsystem, "exporting");
            let result = self.export_subsystem(&params, &initial.token);
            if let Err(e) = &result {
                error!(subsystem = %subsystem, error = %e, "export failed; continuing with next subsystem");
            }
            outcomes.push((subsystem, result));
        }

        let summary = ExportSummary { outcomes };
        info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "export phase complete"
        );
        Ok(summary)
    }

    /// Run the three rounds for one subsystem.
    pub fn export_subsystem(
        &self,
        params: &ExportParams<'_>,
        initial_token: &StateToken,
    ) -> Result<DownloadedArtifact, ExportError> {
        let subsystem = params.subsystem;
        self.clear_stale(subsystem)?;

        let body = request::select_report(&self.form, params, initial_token);
        let resp = self.round(Round::SelectReport, subsystem, &body)?;
        let token = next_token(Round::SelectReport, subsystem, &resp);

        let body = request::confirm_period(&self.form, params, &token);
        let resp = self.round(Round::ConfirmPeriod, subsystem, &body)?;
        let token = next_token(Round::ConfirmPeriod, subsystem, &resp);

        let body = request::trigger_export(&self.form, params, &token.percent_encoded());
        let resp = self.round(Round::TriggerExport, subsystem, &body)?;

        if !resp.is_success() {
            return Err(ExportError::Protocol {
                round: Round::TriggerExport,
                source: ProtocolError::HttpStatus {
                    status: resp.status,
                },
            });
        }
        if !resp.is_zip_attachment() {
            let content_disposition = resp.content_disposition.clone().unwrap_or_default();
            let preview = &resp.body[..resp.body.len().min(PREVIEW_BYTES)];
            warn!(
                subsystem = %subsystem,
                content_disposition = %content_disposition,
                first_bytes = ?String::from_utf8_lossy(preview),
                "response does not look like a ZIP export"
            );
            return Err(ExportError::Protocol {
                round: Round::TriggerExport,
                source: ProtocolError::NotAnAttachment {
                    content_disposition,
                },
            });
        }

        self.extractor.write_interim(&resp.body)?;
        let artifact = self
            .extractor
            .extract(subsystem, resp.content_disposition.as_deref())?;
        Ok(artifact)
    }

    fn round(
        &self,
        round: Round,
        subsystem: Subsystem,
        body: &RequestBody,
    ) -> Result<PortalResponse, ExportError> {
        let resp = self.transport.submit(body).map_err(ExportError::at(round))?;
        if round != Round::TriggerExport && !resp.is_success() {
            warn!(subsystem = %subsystem, status = resp.status, "{round} returned non-success status");
        }
        Ok(resp)
    }

    /// Remove an artifact left over from an earlier run.
    fn clear_stale(&self, subsystem: Subsystem) -> Result<(), ExportError> {
        let path = self.extractor.artifact_path(subsystem);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;
            info!(subsystem = %subsystem, path = %path.display(), "removed stale artifact");
        }
        Ok(())
    }

    fn resolve(&self, what: &str, configured: &Option<String>, scraped: &Option<String>) -> String {
        match (configured, scraped) {
            (Some(v), _) => v.clone(),
            (None, Some(v)) => v.clone(),
            (None, None) => {
                warn!("report {what} missing from page and not configured; sending empty value");
                String::new()
            }
        }
    }
}

/// Token for the next round, or the empty token when the marker is missing.
fn next_token(round: Round, subsystem: Subsystem, resp: &PortalResponse) -> StateToken {
    match extract_marker_token(&resp.text(), VIEWSTATE_FIELD) {
        Some(token) => token,
        None => {
            warn!(subsystem = %subsystem, "{round}: __VIEWSTATE marker not found; next round uses an empty token");
            StateToken::empty()
        }
    }
}
