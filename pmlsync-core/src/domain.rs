//! Domain types shared by every pipeline stage.
//!
//! - [`Subsystem`]: the closed set of market regions a report is split by
//! - [`HourOfDay`]: canonical `HH:00:00` hour label
//! - [`PriceRecord`]: one normalized (subsystem, date, hour, node) price row

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market subsystem. The portal exports one report per subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subsystem {
    /// Sistema Interconectado Nacional.
    #[serde(rename = "SIN")]
    Sin,
    /// Baja California.
    #[serde(rename = "BCA")]
    Bca,
    /// Baja California Sur.
    #[serde(rename = "BCS")]
    Bcs,
}

impl Subsystem {
    /// Every subsystem, in the order reports are requested and merged.
    pub const ALL: [Subsystem; 3] = [Subsystem::Sin, Subsystem::Bca, Subsystem::Bcs];

    /// Portal identifier, also used in artifact names and the `Sistema` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::Sin => "SIN",
            Subsystem::Bca => "BCA",
            Subsystem::Bcs => "BCS",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Subsystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIN" => Ok(Subsystem::Sin),
            "BCA" => Ok(Subsystem::Bca),
            "BCS" => Ok(Subsystem::Bcs),
            other => Err(format!("unknown subsystem: {other}")),
        }
    }
}

/// Canonical hour-of-day label, always one of `00:00:00` ..= `23:00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourOfDay(u8);

impl HourOfDay {
    /// Map a source hour to its canonical label.
    ///
    /// Hours 1-23 keep their value. Hour 24 (the interval ending at midnight)
    /// and anything outside 1-24 map to `00:00:00`.
    pub fn from_source_hour(hour: i64) -> Self {
        if (1..=23).contains(&hour) {
            HourOfDay(hour as u8)
        } else {
            HourOfDay(0)
        }
    }

    pub fn hour(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for HourOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00:00", self.0)
    }
}

impl Serialize for HourOfDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Shorthand for [`HourOfDay::from_source_hour`] rendered as a string.
pub fn canonical_hour(hour: i64) -> String {
    HourOfDay::from_source_hour(hour).to_string()
}

/// A normalized price row.
///
/// Prices are in $/MWh. The marginal price is expected to equal the sum of its
/// three components up to rounding; see [`PriceRecord::component_residual`].
#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub subsystem: Subsystem,
    pub date: NaiveDate,
    /// Hour as reported by the source (1-24 expected).
    pub hour: i64,
    /// Canonical label derived from `hour`.
    pub hora: HourOfDay,
    pub node: String,
    pub pml: f64,
    pub energy: f64,
    pub loss: f64,
    pub congestion: f64,
}

impl PriceRecord {
    /// `pml - (energy + loss + congestion)`.
    pub fn component_residual(&self) -> f64 {
        self.pml - (self.energy + self.loss + self.congestion)
    }
}
