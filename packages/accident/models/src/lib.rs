#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Accident severity scale and temporal bucket definitions.
//!
//! This crate defines the canonical severity scale and the calendar/clock
//! buckets (season, time of day) used across the entire accident-risk
//! system. The state code table lives in [`states`].

pub mod states;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Severity level for an accident, from 1 (minor) to 4 (severe).
///
/// The scale measures impact on traffic, not injury outcome.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AccidentSeverity {
    /// Level 1: Short delay, little traffic impact
    Minor = 1,
    /// Level 2: Noticeable delay
    Moderate = 2,
    /// Level 3: Significant delay
    Serious = 3,
    /// Level 4: Long delay, road closure
    Severe = 4,
}

impl AccidentSeverity {
    /// Returns the numeric value of this severity level.
    #[must_use]
    pub const fn value(self) -> u8 {
        self as u8
    }

    /// Creates a severity level from a numeric value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not in the range 1-4.
    pub const fn from_value(value: i64) -> Result<Self, InvalidSeverityError> {
        match value {
            1 => Ok(Self::Minor),
            2 => Ok(Self::Moderate),
            3 => Ok(Self::Serious),
            4 => Ok(Self::Severe),
            _ => Err(InvalidSeverityError { value }),
        }
    }

    /// Whether this level counts towards the "severe accident" share
    /// (level 3 and above).
    #[must_use]
    pub const fn is_severe(self) -> bool {
        self.value() >= 3
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Minor, Self::Moderate, Self::Serious, Self::Severe]
    }
}

/// Error returned when attempting to create an [`AccidentSeverity`] from an
/// invalid numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSeverityError {
    /// The invalid severity value that was provided.
    pub value: i64,
}

impl std::fmt::Display for InvalidSeverityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid severity value {}: expected 1-4", self.value)
    }
}

impl std::error::Error for InvalidSeverityError {}

/// Meteorological season of the year.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum Season {
    /// December, January, February
    Winter,
    /// March, April, May
    Spring,
    /// June, July, August
    Summer,
    /// September, October, November
    Fall,
}

impl Season {
    /// Maps a calendar month (1-12) to its season.
    ///
    /// Returns `None` for months outside 1-12.
    #[must_use]
    pub const fn from_month(month: u32) -> Option<Self> {
        match month {
            12 | 1 | 2 => Some(Self::Winter),
            3..=5 => Some(Self::Spring),
            6..=8 => Some(Self::Summer),
            9..=11 => Some(Self::Fall),
            _ => None,
        }
    }
}

/// Coarse part of the day an accident started in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum TimeOfDay {
    /// 06:00-11:59
    Morning,
    /// 12:00-17:59
    Afternoon,
    /// 18:00-21:59
    Evening,
    /// 22:00-05:59
    Night,
}

impl TimeOfDay {
    /// Maps an hour of the day (0-23) to its bucket. Hours outside the
    /// 6-21 window, including invalid ones, fall into [`Self::Night`].
    #[must_use]
    pub const fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => Self::Morning,
            12..=17 => Self::Afternoon,
            18..=21 => Self::Evening,
            _ => Self::Night,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn severity_from_value_roundtrip() {
        for v in 1..=4_i64 {
            let severity = AccidentSeverity::from_value(v).unwrap();
            assert_eq!(i64::from(severity.value()), v);
        }
        assert!(AccidentSeverity::from_value(0).is_err());
        assert!(AccidentSeverity::from_value(5).is_err());
        assert_eq!(
            AccidentSeverity::from_value(7).unwrap_err().to_string(),
            "invalid severity value 7: expected 1-4"
        );
    }

    #[test]
    fn severe_threshold() {
        let severe: Vec<_> = AccidentSeverity::all()
            .iter()
            .filter(|s| s.is_severe())
            .collect();
        assert_eq!(
            severe,
            vec![&AccidentSeverity::Serious, &AccidentSeverity::Severe]
        );
    }

    #[test]
    fn season_covers_every_month() {
        assert_eq!(Season::from_month(12), Some(Season::Winter));
        assert_eq!(Season::from_month(1), Some(Season::Winter));
        assert_eq!(Season::from_month(4), Some(Season::Spring));
        assert_eq!(Season::from_month(7), Some(Season::Summer));
        assert_eq!(Season::from_month(10), Some(Season::Fall));
        assert_eq!(Season::from_month(13), None);
        assert_eq!(Season::Fall.to_string(), "Fall");
    }

    #[test]
    fn time_of_day_boundaries() {
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(11), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_hour(12), TimeOfDay::Afternoon);
        assert_eq!(TimeOfDay::from_hour(21), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_hour(22), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_str("Evening").unwrap(), TimeOfDay::Evening);
    }
}
