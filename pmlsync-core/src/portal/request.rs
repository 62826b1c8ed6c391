//! Outgoing request bodies for the three protocol rounds.
//!
//! Rounds 1 and 2 are ordinary form posts. Round 3 must reproduce the
//! browser's raw submission byte for byte (including the download button
//! field), so it is assembled as a pre-encoded query string. Both shapes are
//! values of [`RequestBody`].

use serde::{Deserialize, Serialize};

use super::form_state::{encode_component, StateToken, PERIOD_FIELD, START_DATE_FIELD};
use crate::domain::Subsystem;

const SCRIPT_MANAGER: &str = "ctl00$ContentPlaceHolder1$ScriptManager";
const REPORT: &str = "ctl00$ContentPlaceHolder1$ddlReporte";
const PERIODICITY: &str = "ctl00$ContentPlaceHolder1$ddlPeriodicidad";
const SYSTEM: &str = "ctl00$ContentPlaceHolder1$ddlSistema";
const END_DATE: &str = "ctl00$ContentPlaceHolder1$hdfEndDateSelected";
const MIN_DATE: &str = "ctl00$ContentPlaceHolder1$hdfMinDateToSelect";
const MAX_DATE: &str = "ctl00$ContentPlaceHolder1$hdfMaxDateToSelect";
const DOWNLOAD_BUTTON: &str = "ctl00$ContentPlaceHolder1$btnDescargarZIP";
const DOWNLOAD_LABEL: &str = "Descargar ZIP";

/// Content type sent with every portal post.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Body of a portal POST.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Ordered field pairs, form-encoded on send.
    Form(Vec<(String, String)>),
    /// Literal, already-encoded body sent verbatim.
    Encoded(String),
}

impl RequestBody {
    /// Wire representation of the body.
    pub fn encode(&self) -> String {
        match self {
            RequestBody::Form(pairs) => url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish(),
            RequestBody::Encoded(raw) => raw.clone(),
        }
    }

    /// Value of a field, looked up in either representation.
    pub fn field(&self, name: &str) -> Option<String> {
        match self {
            RequestBody::Form(pairs) => pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            RequestBody::Encoded(raw) => url::form_urlencoded::parse(raw.as_bytes())
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned()),
        }
    }
}

/// Fixed form values of the report page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    /// Report selector value (day-ahead PML by node).
    pub report_id: String,
    /// Periodicity selector (`D` = daily).
    pub periodicity: String,
    /// Earliest selectable date sent back to the page (`dd/mm/yyyy`) in
    /// rounds 2 and 3.
    pub min_date: String,
    /// Earliest selectable date in round 1, before the page narrows the range.
    pub select_min_date: String,
    pub viewstate_generator: String,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            report_id: "359,322".into(),
            periodicity: "D".into(),
            min_date: "29/01/2016".into(),
            select_min_date: "29/03/2016".into(),
            viewstate_generator: "35C9E14B".into(),
        }
    }
}

/// Values that vary per subsystem and per run.
#[derive(Debug, Clone, Copy)]
pub struct ExportParams<'a> {
    pub subsystem: Subsystem,
    pub period: &'a str,
    pub date: &'a str,
}

/// Round 1: select report type and subsystem.
pub fn select_report(settings: &FormSettings, params: &ExportParams<'_>, token: &StateToken) -> RequestBody {
    async_post(settings, params, token, REPORT, &settings.select_min_date)
}

/// Round 2: confirm the reporting period.
pub fn confirm_period(settings: &FormSettings, params: &ExportParams<'_>, token: &StateToken) -> RequestBody {
    async_post(settings, params, token, PERIOD_FIELD, &settings.min_date)
}

/// Round 3: press the ZIP download button.
///
/// `encoded_token` must already be form-encoded
/// (see [`StateToken::percent_encoded`]).
pub fn trigger_export(settings: &FormSettings, params: &ExportParams<'_>, encoded_token: &str) -> RequestBody {
    let date = encode_component(params.date);
    let pairs: [(&str, String); 15] = [
        (REPORT, encode_component(&settings.report_id)),
        (PERIODICITY, encode_component(&settings.periodicity)),
        (SYSTEM, encode_component(params.subsystem.as_str())),
        (PERIOD_FIELD, encode_component(params.period)),
        (START_DATE_FIELD, date.clone()),
        (END_DATE, date.clone()),
        (MIN_DATE, encode_component(&settings.min_date)),
        (MAX_DATE, date),
        (DOWNLOAD_BUTTON, encode_component(DOWNLOAD_LABEL)),
        ("__EVENTTARGET", String::new()),
        ("__EVENTARGUMENT", String::new()),
        ("__LASTFOCUS", String::new()),
        ("__VIEWSTATE", encoded_token.to_string()),
        ("__VIEWSTATEGENERATOR", encode_component(&settings.viewstate_generator)),
        ("__VIEWSTATEENCRYPTED", String::new()),
    ];

    let raw = pairs
        .iter()
        .map(|(name, value)| format!("{}={value}", encode_component(name)))
        .collect::<Vec<_>>()
        .join("&");
    RequestBody::Encoded(raw)
}

fn async_post(
    settings: &FormSettings,
    params: &ExportParams<'_>,
    token: &StateToken,
    event_target: &str,
    min_date: &str,
) -> RequestBody {
    let script_manager = format!("{SCRIPT_MANAGER}|{event_target}");
    let fields: [(&str, &str); 17] = [
        (SCRIPT_MANAGER, script_manager.as_str()),
        (REPORT, settings.report_id.as_str()),
        (PERIODICITY, settings.periodicity.as_str()),
        (SYSTEM, params.subsystem.as_str()),
        (PERIOD_FIELD, params.period),
        (START_DATE_FIELD, params.date),
        (END_DATE, params.date),
        (MIN_DATE, min_date),
        (MAX_DATE, params.date),
        ("__EVENTTARGET", event_target),
        ("__EVENTARGUMENT", ""),
        ("__LASTFOCUS", ""),
        ("__VIEWSTATE", token.as_str()),
        ("__VIEWSTATEGENERATOR", settings.viewstate_generator.as_str()),
        ("__VIEWSTATEENCRYPTED", ""),
        ("__ASYNCPOST", "true"),
        // The browser always sends an unnamed empty field last.
        ("", ""),
    ];

    RequestBody::Form(
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}
