//! Portal transport trait and the blocking HTTP implementation.
//!
//! The [`PortalTransport`] trait abstracts the session so the protocol driver
//! can be exercised against scripted responses in tests. [`HttpPortal`] keeps a
//! single cookie-carrying `reqwest` client for the whole run.

use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::request::{RequestBody, FORM_CONTENT_TYPE};

/// Errors talking to the portal. All of them are scoped to one subsystem.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("portal request timed out: {0}")]
    Timeout(String),

    #[error("could not connect to portal: {0}")]
    Connection(String),

    #[error("portal request failed: {0}")]
    Request(String),

    #[error("portal returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("response is not a ZIP attachment (Content-Disposition: {content_disposition:?})")]
    NotAnAttachment { content_disposition: String },

    #[error("invalid portal client settings: {0}")]
    InvalidSettings(String),
}

impl From<reqwest::Error> for ProtocolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProtocolError::Timeout(e.to_string())
        } else if e.is_connect() {
            ProtocolError::Connection(e.to_string())
        } else {
            ProtocolError::Request(e.to_string())
        }
    }
}

/// A portal response reduced to what the driver inspects.
#[derive(Debug, Clone, Default)]
pub struct PortalResponse {
    pub status: u16,
    pub content_disposition: Option<String>,
    pub body: Vec<u8>,
}

impl PortalResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// True when the server announced a ZIP download.
    pub fn is_zip_attachment(&self) -> bool {
        self.content_disposition
            .as_deref()
            .is_some_and(|cd| cd.contains("attachment") && cd.contains(".zip"))
    }
}

/// One stateful session with the report page.
pub trait PortalTransport {
    /// GET the report page (full HTML).
    fn fetch_page(&self) -> Result<String, ProtocolError>;

    /// POST a body to the report page within the same session.
    fn submit(&self, body: &RequestBody) -> Result<PortalResponse, ProtocolError>;
}

/// HTTP settings of the portal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    pub url: String,
    pub user_agent: String,
    pub referer: String,
    pub origin: String,
    pub accept_language: String,
    pub timeout_secs: u64,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            url: "https://www.cenace.gob.mx/Paginas/SIM/Reportes/PreEnerServConMDA.aspx".into(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64; rv:137.0) Gecko/20100101 Firefox/137.0"
                .into(),
            referer: "https://www.cenace.gob.mx/Paginas/SIM/Reportes/PreEnerServConMDA.aspx".into(),
            origin: "https://www.cenace.gob.mx".into(),
            accept_language: "en-US,en;q=0.5".into(),
            timeout_secs: 60,
        }
    }
}

/// Blocking HTTP session against the portal.
pub struct HttpPortal {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpPortal {
    pub fn new(settings: &PortalSettings) -> Result<Self, ProtocolError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        for (name, value) in [
            (header::ACCEPT_LANGUAGE, &settings.accept_language),
            (header::REFERER, &settings.referer),
            (header::ORIGIN, &settings.origin),
        ] {
            if value.is_empty() {
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProtocolError::InvalidSettings(format!("{name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(settings.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| ProtocolError::InvalidSettings(e.to_string()))?;

        Ok(Self {
            client,
            url: settings.url.clone(),
        })
    }
}

impl PortalTransport for HttpPortal {
    fn fetch_page(&self) -> Result<String, ProtocolError> {
        let resp = self.client.get(&self.url).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProtocolError::HttpStatus {
                status: status.as_u16(),
            });
        }
        Ok(resp.text()?)
    }

    fn submit(&self, body: &RequestBody) -> Result<PortalResponse, ProtocolError> {
        let resp = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body.encode())
            .send()?;

        let status = resp.status().as_u16();
        let content_disposition = resp
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes()?.to_vec();

        Ok(PortalResponse {
            status,
            content_disposition,
            body,
        })
    }
}
