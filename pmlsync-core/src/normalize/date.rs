//! Report date labels (`dd/mmm/yyyy`, Spanish month abbreviations).
//!
//! The month table is local to this parser; no process locale is touched.

use chrono::NaiveDate;

/// (abbreviation, full name) per month, January first.
const MONTHS: [(&str, &str); 12] = [
    ("ene", "enero"),
    ("feb", "febrero"),
    ("mar", "marzo"),
    ("abr", "abril"),
    ("may", "mayo"),
    ("jun", "junio"),
    ("jul", "julio"),
    ("ago", "agosto"),
    ("sep", "septiembre"),
    ("oct", "octubre"),
    ("nov", "noviembre"),
    ("dic", "diciembre"),
];

/// Month number (1-12) for a Spanish month token.
///
/// Accepts the three-letter abbreviation, `sept`, or the full name, in any
/// case and with an optional trailing period.
pub fn month_number(token: &str) -> Option<u32> {
    let token = token.trim().trim_end_matches('.').to_lowercase();
    MONTHS
        .iter()
        .position(|(abbr, full)| token == *abbr || token == *full || (*abbr == "sep" && token == "sept"))
        .map(|i| i as u32 + 1)
}

/// Parse a label such as `02/may/2024`.
pub fn parse_date_label(label: &str) -> Result<NaiveDate, String> {
    let parts: Vec<&str> = label.trim().split('/').collect();
    let [day, month, year] = parts.as_slice() else {
        return Err(format!("expected dd/mmm/yyyy, got {label:?}"));
    };

    let day: u32 = day
        .trim()
        .parse()
        .map_err(|_| format!("invalid day in {label:?}"))?;
    let month = month_number(month).ok_or_else(|| format!("unknown month in {label:?}"))?;
    let year: i32 = year
        .trim()
        .parse()
        .map_err(|_| format!("invalid year in {label:?}"))?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| format!("no such date: {label:?}"))
}
