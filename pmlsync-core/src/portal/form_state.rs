//! Extraction of server-issued form state.
//!
//! Two sources carry state on the portal:
//! - full HTML pages (initial GET), where state lives in hidden `<input>` fields;
//! - AJAX-partial responses, a pipe-delimited stream where the refreshed state
//!   appears as `|hiddenField|__VIEWSTATE|<value>|`.
//!
//! Both extractors are pure and return `None` when the field is absent.

use regex::Regex;
use scraper::{Html, Selector};
use std::fmt;

/// Name of the hidden field carrying the page state.
pub const VIEWSTATE_FIELD: &str = "__VIEWSTATE";
/// Reporting period text box.
pub const PERIOD_FIELD: &str = "ctl00$ContentPlaceHolder1$txtPeriodo";
/// Hidden field holding the selected start date.
pub const START_DATE_FIELD: &str = "ctl00$ContentPlaceHolder1$hdfStartDateSelected";

/// Opaque state token issued by the portal.
///
/// Each protocol round consumes one token and yields a new one; tokens are
/// never mutated in place. The empty token stands in for an extraction miss.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateToken(String);

impl StateToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Form-encode the token for embedding in a raw request body.
    ///
    /// Every reserved character is escaped and spaces become `+`.
    pub fn percent_encoded(&self) -> String {
        encode_component(&self.0)
    }
}

impl fmt::Display for StateToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens run to tens of kilobytes; logs only need a prefix.
        let prefix: String = self.0.chars().take(16).collect();
        write!(f, "{prefix}.. ({} chars)", self.0.len())
    }
}

/// Form-encode a single value (`application/x-www-form-urlencoded` rules).
pub fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Return the `value` attribute of the `element` whose `name` is `field_name`.
///
/// Returns `None` when no such element exists, when it has no `value`, or when
/// the element kind is not a valid selector.
pub fn extract_field_value(document: &Html, field_name: &str, element: &str) -> Option<String> {
    let escaped = field_name.replace('\\', "\\\\").replace('"', "\\\"");
    let selector = Selector::parse(&format!("{element}[name=\"{escaped}\"]")).ok()?;
    document
        .select(&selector)
        .next()?
        .value()
        .attr("value")
        .map(str::to_string)
}

/// Scan an AJAX-partial body for `|hiddenField|<field>|<value>` and return the value.
pub fn extract_marker_token(body: &str, field: &str) -> Option<StateToken> {
    let pattern = format!(r"\|hiddenField\|{}\|([^|]+)", regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| StateToken::new(m.as_str()))
}

/// State scraped from the report page before any subsystem is requested.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialFormState {
    pub token: StateToken,
    pub period: Option<String>,
    pub date: Option<String>,
}

impl InitialFormState {
    /// Parse the report page. Missing fields are left as `None` / empty token.
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);
        let token = extract_field_value(&document, VIEWSTATE_FIELD, "input")
            .map(StateToken::new)
            .unwrap_or_default();
        Self {
            token,
            period: extract_field_value(&document, PERIOD_FIELD, "input"),
            date: extract_field_value(&document, START_DATE_FIELD, "input"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body><form method="post" action="./PreEnerServConMDA.aspx">
        <input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="dDwtMTA4+/MzQ=" />
        <input name="ctl00$ContentPlaceHolder1$txtPeriodo" type="text" value="02/05/2024 - 02/05/2024" />
        <input type="hidden" name="ctl00$ContentPlaceHolder1$hdfStartDateSelected" value="02/05/2024" />
        <input type="hidden" name="ctl00$ContentPlaceHolder1$hdfNoValue" />
        </form></body></html>"#;

    #[test]
    fn extracts_hidden_input_value() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(
            extract_field_value(&doc, "__VIEWSTATE", "input").as_deref(),
            Some("dDwtMTA4+/MzQ=")
        );
        assert_eq!(
            extract_field_value(&doc, START_DATE_FIELD, "input").as_deref(),
            Some("02/05/2024")
        );
    }

    #[test]
    fn absent_field_is_none() {
        let doc = Html::parse_document(PAGE);
        assert_eq!(extract_field_value(&doc, "__EVENTVALIDATION", "input"), None);
        assert_eq!(
            extract_field_value(&doc, "ctl00$ContentPlaceHolder1$hdfNoValue", "input"),
            None
        );
        // Right name, wrong element kind
        assert_eq!(extract_field_value(&doc, "__VIEWSTATE", "select"), None);
    }

    #[test]
    fn malformed_markup_does_not_panic() {
        let doc = Html::parse_document("<input name='__VIEWSTATE' value='abc'<<div></p>");
        let _ = extract_field_value(&doc, "__VIEWSTATE", "input");
        assert_eq!(extract_field_value(&doc, "x", "!!not a selector"), None);
    }

    #[test]
    fn initial_state_from_page() {
        let state = InitialFormState::from_html(PAGE);
        assert_eq!(state.token.as_str(), "dDwtMTA4+/MzQ=");
        assert_eq!(state.period.as_deref(), Some("02/05/2024 - 02/05/2024"));
        assert_eq!(state.date.as_deref(), Some("02/05/2024"));
    }

    #[test]
    fn initial_state_tolerates_empty_page() {
        let state = InitialFormState::from_html("<html></html>");
        assert!(state.token.is_empty());
        assert!(state.period.is_none());
        assert!(state.date.is_none());
    }

    #[test]
    fn marker_token_found_in_partial_stream() {
        let body = "1|#||4|52|updatePanel|ctl00_up|<div/>|0|hiddenField|__EVENTTARGET||\
                    184|hiddenField|__VIEWSTATE|/wEPDwUK+abc=|8|hiddenField|__VIEWSTATEGENERATOR|35C9E14B|";
        let token = extract_marker_token(body, VIEWSTATE_FIELD).unwrap();
        assert_eq!(token.as_str(), "/wEPDwUK+abc=");
    }

    #[test]
    fn marker_token_missing() {
        assert_eq!(extract_marker_token("<html>error</html>", VIEWSTATE_FIELD), None);
        // Empty value does not match
        assert_eq!(extract_marker_token("|hiddenField|__VIEWSTATE||", VIEWSTATE_FIELD), None);
    }

    #[test]
    fn token_percent_encoding_escapes_everything_reserved() {
        let token = StateToken::new("/wE+a b=");
        assert_eq!(token.percent_encoded(), "%2FwE%2Ba+b%3D");
    }
}
