//! Property tests for pipeline invariants.
//!
//! Uses proptest to verify:
//! 1. Hour mapping: every integer maps to one of the 24 canonical labels
//! 2. Batching: contiguous, ordered, bounded batches that rebuild the input
//! 3. Date labels: every calendar date survives a render/parse cycle
//! 4. Marker extraction: any pipe-free token is found in a partial stream

use chrono::{Datelike, NaiveDate};
use proptest::prelude::*;
use pmlsync_core::domain::{canonical_hour, HourOfDay};
use pmlsync_core::normalize::parse_date_label;
use pmlsync_core::portal::extract_marker_token;
use pmlsync_core::publish::partition;

const MONTHS: [&str; 12] = [
    "ene", "feb", "mar", "abr", "may", "jun", "jul", "ago", "sep", "oct", "nov", "dic",
];

// ── 1. Hour mapping ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn hour_label_is_always_canonical(hour in any::<i64>()) {
        let label = canonical_hour(hour);
        prop_assert_eq!(label.len(), 8);
        prop_assert!(label.ends_with(":00:00"));
        let hh: u8 = label[..2].parse().unwrap();
        prop_assert!(hh <= 23);

        if (1..=23).contains(&hour) {
            prop_assert_eq!(i64::from(hh), hour);
        } else {
            prop_assert_eq!(hh, 0);
        }
    }

    #[test]
    fn hour_label_matches_typed_hour(hour in -48i64..48) {
        prop_assert_eq!(canonical_hour(hour), HourOfDay::from_source_hour(hour).to_string());
    }
}

// ── 2. Batching ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn batches_rebuild_the_input(len in 0usize..2_000, size in 1usize..300) {
        let input: Vec<usize> = (0..len).collect();
        let ranges = partition(len, size);

        prop_assert_eq!(ranges.len(), len.div_ceil(size));
        prop_assert!(ranges.iter().all(|r| !r.is_empty() && r.len() <= size));
        // every batch but the last is full
        if let Some((_, init)) = ranges.split_last() {
            prop_assert!(init.iter().all(|r| r.len() == size));
        }

        let rebuilt: Vec<usize> = ranges.iter().flat_map(|r| input[r.clone()].to_vec()).collect();
        prop_assert_eq!(rebuilt, input);
    }
}

// ── 3. Date labels ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn rendered_labels_parse_back(days in 0i64..20_000) {
        let base = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
        let date = base + chrono::Duration::days(days);
        let label = format!(
            "{:02}/{}/{}",
            date.day(),
            MONTHS[date.month0() as usize],
            date.year()
        );
        prop_assert_eq!(parse_date_label(&label).unwrap(), date);
    }
}

// ── 4. Marker extraction ─────────────────────────────────────────────

proptest! {
    #[test]
    fn marker_token_is_recovered(token in "[A-Za-z0-9+/=]{1,200}") {
        let body = format!("1|#||4|12|updatePanel|up|<b>x</b>|0|hiddenField|__VIEWSTATE|{token}|8|hiddenField|__VIEWSTATEGENERATOR|35C9E14B|");
        let found = extract_marker_token(&body, "__VIEWSTATE").unwrap();
        prop_assert_eq!(found.as_str(), token.as_str());
    }
}
