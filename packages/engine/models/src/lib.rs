#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Request and result types shared by the risk engine, its persistent
//! store, and presentation code.
//!
//! Nothing here computes anything; the types only fix the ordering,
//! identity, and serialized shape of stratification results.

pub mod filter;

use chrono::{Datelike as _, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use filter::{Condition, FilterParseError, RowFilter};

/// One value of one stratification dimension.
///
/// Ordering is total: `Missing` sorts before every integer, integers sort
/// numerically and before every label, labels sort bytewise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionValue {
    /// The row had no value for this dimension.
    Missing,
    /// An integer column or derived temporal key.
    Int(i64),
    /// A canonical categorical label.
    Text(String),
}

impl DimensionValue {
    /// Reads a literal typed by a user: integers become [`Self::Int`],
    /// anything else [`Self::Text`].
    #[must_use]
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        trimmed
            .parse::<i64>()
            .map_or_else(|_| Self::Text(trimmed.to_string()), Self::Int)
    }

    /// Whether this is [`Self::Missing`].
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl std::fmt::Display for DimensionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => Ok(()),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for DimensionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for DimensionValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// A stratification request: which dimensions to group by, in which order,
/// over which rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StratificationRequest {
    /// Dimension names, in output order.
    pub dimensions: Vec<String>,
    /// Rows to include.
    #[serde(default)]
    pub filter: RowFilter,
}

impl StratificationRequest {
    /// Creates an unfiltered request.
    #[must_use]
    pub fn new<I, S>(dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dimensions: dimensions.into_iter().map(Into::into).collect(),
            filter: RowFilter::default(),
        }
    }

    /// Restricts the request to rows matching `filter`.
    #[must_use]
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// One stratum of a stratification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateRecord {
    /// Dimension values, in request order.
    pub key: Vec<DimensionValue>,
    /// Number of incidents in the stratum. Never zero.
    pub count: u64,
    /// Matched exposure denominator, if any.
    pub exposure: Option<f64>,
    /// Normalized rate; `None` when no denominator applies.
    pub rate: Option<f64>,
    /// Rate divided by the baseline rate of the same window.
    pub relative_risk: Option<f64>,
    /// Fraction of all matched incidents that fall in this stratum.
    pub share: f64,
    /// Mean severity of the stratum's incidents.
    pub avg_severity: f64,
    /// Fraction of the stratum's incidents with severity 3 or 4.
    pub severe_share: f64,
    /// Set when `count` is below the configured minimum sample size.
    pub low_confidence: bool,
    /// 1-based rank by count within the record's partition. Only set on
    /// ranked output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// Fraction of the partition's incidents that fall in this stratum.
    /// Only set on ranked output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_share: Option<f64>,
}

/// Calendar unit used for per-time-unit rates.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TimeBasis {
    /// Calendar days.
    Day,
    /// Calendar months.
    Month,
    /// Calendar years.
    Year,
}

impl TimeBasis {
    /// Number of calendar units touched by the window `[first, last]`,
    /// counting both ends. Always at least 1.
    #[must_use]
    pub fn units(self, first: NaiveDateTime, last: NaiveDateTime) -> u64 {
        let (first, last) = if last < first {
            (last, first)
        } else {
            (first, last)
        };
        let span = match self {
            Self::Day => (last.date() - first.date()).num_days(),
            Self::Month => {
                i64::from(last.year() - first.year()) * 12 + i64::from(last.month())
                    - i64::from(first.month())
            }
            Self::Year => i64::from(last.year() - first.year()),
        };
        u64::try_from(span).unwrap_or(0) + 1
    }
}

/// Incident count for one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCount {
    /// Two-letter state code.
    pub state: String,
    /// Incidents in the state.
    pub count: u64,
}

/// Incident count and percentage for one severity level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityShare {
    /// Severity level (1-4).
    pub severity: u8,
    /// Incidents at this level.
    pub count: u64,
    /// Percentage of all incidents, 0-100.
    pub percentage: f64,
}

/// Dataset-level overview of a cleaned view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryReport {
    /// Cleaned view version the summary was computed from.
    pub version: String,
    /// Rows in the cleaned view.
    pub total_incidents: u64,
    /// Earliest start time.
    pub first_start: Option<NaiveDateTime>,
    /// Latest start time.
    pub last_start: Option<NaiveDateTime>,
    /// Number of distinct states present.
    pub states_covered: usize,
    /// States with the most incidents, descending.
    pub top_states: Vec<StateCount>,
    /// Count and percentage per severity level, ascending by level.
    pub severity_distribution: Vec<SeverityShare>,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use chrono::NaiveDate;

    use super::*;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    #[test]
    fn dimension_values_order_missing_int_text() {
        let mut values = vec![
            DimensionValue::from("TX"),
            DimensionValue::Int(10),
            DimensionValue::Missing,
            DimensionValue::Int(2),
            DimensionValue::from("CA"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                DimensionValue::Missing,
                DimensionValue::Int(2),
                DimensionValue::Int(10),
                DimensionValue::from("CA"),
                DimensionValue::from("TX"),
            ]
        );
    }

    #[test]
    fn dimension_values_serialize_as_plain_json() {
        let key = vec![
            DimensionValue::from("CA"),
            DimensionValue::Int(3),
            DimensionValue::Missing,
        ];
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"["CA",3,null]"#);
        let back: Vec<DimensionValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn parses_literals() {
        assert_eq!(DimensionValue::parse_literal(" 3 "), DimensionValue::Int(3));
        assert_eq!(DimensionValue::parse_literal("CA"), DimensionValue::from("CA"));
        assert_eq!(DimensionValue::Missing.to_string(), "");
    }

    #[test]
    fn counts_calendar_units_inclusively() {
        let first = at(2020, 12, 30);
        let last = at(2021, 1, 2);
        assert_eq!(TimeBasis::Day.units(first, last), 4);
        assert_eq!(TimeBasis::Month.units(first, last), 2);
        assert_eq!(TimeBasis::Year.units(first, last), 2);
        assert_eq!(TimeBasis::Day.units(first, first), 1);
        assert_eq!(TimeBasis::Month.units(last, first), 2);
    }

    #[test]
    fn time_basis_parses_case_insensitively() {
        assert_eq!(TimeBasis::from_str("Month").unwrap(), TimeBasis::Month);
        assert_eq!(TimeBasis::Year.to_string(), "year");
    }
}
