//! Row filter predicates.
//!
//! A [`RowFilter`] is a conjunction of [`Condition`]s. Filters are plain
//! data so they can be serialized into a stable cache key; the engine
//! compiles them against a concrete view before scanning.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::DimensionValue;

/// Dimension name that selects the start-time window condition.
const START_TIME: &str = "start_time";

/// One predicate over a single dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// The dimension equals `value`.
    Equals {
        /// Dimension name.
        dimension: String,
        /// Expected value.
        value: DimensionValue,
    },
    /// The dimension equals any of `values`.
    OneOf {
        /// Dimension name.
        dimension: String,
        /// Accepted values.
        values: Vec<DimensionValue>,
    },
    /// The integer dimension lies in `[min, max]`.
    Between {
        /// Dimension name.
        dimension: String,
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },
    /// `start_time` lies in `[from, to)`; either bound may be open.
    StartTime {
        /// Inclusive lower bound.
        from: Option<NaiveDateTime>,
        /// Exclusive upper bound.
        to: Option<NaiveDateTime>,
    },
}

impl Condition {
    /// The dimension this condition reads.
    #[must_use]
    pub fn dimension(&self) -> &str {
        match self {
            Self::Equals { dimension, .. }
            | Self::OneOf { dimension, .. }
            | Self::Between { dimension, .. } => dimension,
            Self::StartTime { .. } => START_TIME,
        }
    }
}

/// Error returned when a textual filter condition cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParseError {
    /// The offending input.
    pub input: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

impl std::fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid filter '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for FilterParseError {}

/// Parses the command-line filter syntax:
///
/// - `state=CA` equals
/// - `state=CA|TX|NY` one of
/// - `severity=2..4` inclusive integer range
/// - `start_time=2020-01-01..2021-01-01` half-open window, either side
///   may be empty
impl std::str::FromStr for Condition {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| FilterParseError {
            input: s.to_string(),
            reason,
        };

        let (dimension, value) = s.split_once('=').ok_or_else(|| err("expected DIM=VALUE"))?;
        let dimension = dimension.trim();
        let value = value.trim();
        if dimension.is_empty() {
            return Err(err("missing dimension name"));
        }

        if dimension.eq_ignore_ascii_case(START_TIME) {
            let (from, to) = value
                .split_once("..")
                .ok_or_else(|| err("expected FROM..TO"))?;
            let bound = |raw: &str| -> Result<Option<NaiveDateTime>, FilterParseError> {
                let raw = raw.trim();
                if raw.is_empty() {
                    return Ok(None);
                }
                parse_bound(raw)
                    .map(Some)
                    .ok_or_else(|| err("expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS"))
            };
            return Ok(Self::StartTime {
                from: bound(from)?,
                to: bound(to)?,
            });
        }

        if let Some((min, max)) = value.split_once("..") {
            let min = min
                .trim()
                .parse()
                .map_err(|_| err("range bounds must be integers"))?;
            let max = max
                .trim()
                .parse()
                .map_err(|_| err("range bounds must be integers"))?;
            return Ok(Self::Between {
                dimension: dimension.to_string(),
                min,
                max,
            });
        }

        if value.contains('|') {
            return Ok(Self::OneOf {
                dimension: dimension.to_string(),
                values: value.split('|').map(DimensionValue::parse_literal).collect(),
            });
        }

        Ok(Self::Equals {
            dimension: dimension.to_string(),
            value: DimensionValue::parse_literal(value),
        })
    }
}

fn parse_bound(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// A conjunction of conditions. The empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowFilter {
    conditions: Vec<Condition>,
}

impl RowFilter {
    /// The filter that matches every row.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Adds a condition.
    #[must_use]
    pub fn with(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// The conditions, in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Whether this filter matches every row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Stable identity of the filter for cache keys.
    ///
    /// Conditions are serialized individually, deduplicated, and sorted, so
    /// two filters listing the same conditions in a different order share a
    /// key. The empty filter's key is `"*"`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        if self.conditions.is_empty() {
            return "*".to_string();
        }
        let mut parts = self
            .conditions
            .iter()
            .map(|c| serde_json::to_string(c).unwrap_or_default())
            .collect::<Vec<_>>();
        parts.sort();
        parts.dedup();
        format!("[{}]", parts.join(","))
    }
}

impl FromIterator<Condition> for RowFilter {
    fn from_iter<T: IntoIterator<Item = Condition>>(iter: T) -> Self {
        Self {
            conditions: iter.into_iter().collect(),
        }
    }
}
