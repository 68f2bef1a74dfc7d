//! Dimension resolution.
//!
//! Maps requested dimension names onto groupable columns of a cleaned view
//! or onto the reserved temporal keys derived from `start_time`.

use std::str::FromStr as _;

use accident_risk_accident_models::{Season, TimeOfDay};
use accident_risk_engine_models::DimensionValue;
use accident_risk_schema::descriptor::ColumnKind;
use chrono::{Datelike as _, NaiveDateTime, Timelike as _};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::EngineError;
use crate::view::CleanedView;

const SEASONS: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Fall];

const TIMES_OF_DAY: [TimeOfDay; 4] = [
    TimeOfDay::Morning,
    TimeOfDay::Afternoon,
    TimeOfDay::Evening,
    TimeOfDay::Night,
];

/// A temporal key computed from `start_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DerivedKey {
    /// Hour of day, 0-23.
    Hour,
    /// Day of week, 0 = Sunday.
    DayOfWeek,
    /// Calendar month, 1-12.
    Month,
    /// Calendar year.
    Year,
    /// Meteorological season label.
    Season,
    /// Part-of-day label.
    TimeOfDay,
}

impl DerivedKey {
    /// Every derived key, in slot order.
    pub const ALL: [Self; 6] = [
        Self::Hour,
        Self::DayOfWeek,
        Self::Month,
        Self::Year,
        Self::Season,
        Self::TimeOfDay,
    ];

    /// Position of this key in per-view memo tables.
    #[must_use]
    pub const fn slot(self) -> usize {
        self as usize
    }

    /// Computes the integer code of this key for one timestamp. Labelled
    /// keys return the label's index.
    #[must_use]
    pub fn compute(self, at: NaiveDateTime) -> i64 {
        match self {
            Self::Hour => i64::from(at.hour()),
            Self::DayOfWeek => i64::from(at.weekday().num_days_from_sunday()),
            Self::Month => i64::from(at.month()),
            Self::Year => i64::from(at.year()),
            Self::Season => Season::from_month(at.month())
                .and_then(|s| SEASONS.iter().position(|x| *x == s))
                .and_then(|i| i64::try_from(i).ok())
                .unwrap_or(-1),
            Self::TimeOfDay => {
                let bucket = TimeOfDay::from_hour(at.hour());
                TIMES_OF_DAY
                    .iter()
                    .position(|x| *x == bucket)
                    .and_then(|i| i64::try_from(i).ok())
                    .unwrap_or(-1)
            }
        }
    }

    /// Whether the key's values are labels rather than numbers.
    #[must_use]
    pub const fn is_labelled(self) -> bool {
        matches!(self, Self::Season | Self::TimeOfDay)
    }

    /// Turns a code produced by [`Self::compute`] into an output value.
    #[must_use]
    pub fn decode(self, code: i64) -> DimensionValue {
        let index = usize::try_from(code).ok();
        match self {
            Self::Season => index
                .and_then(|i| SEASONS.get(i))
                .map_or(DimensionValue::Missing, |s| {
                    DimensionValue::Text(s.to_string())
                }),
            Self::TimeOfDay => index
                .and_then(|i| TIMES_OF_DAY.get(i))
                .map_or(DimensionValue::Missing, |t| {
                    DimensionValue::Text(t.to_string())
                }),
            _ => DimensionValue::Int(code),
        }
    }

    /// Encodes a user-supplied value, matching labels case-insensitively.
    #[must_use]
    pub fn encode(self, value: &DimensionValue) -> Option<i64> {
        match (self.is_labelled(), value) {
            (false, DimensionValue::Int(v)) => Some(*v),
            (false, DimensionValue::Text(s)) => s.trim().parse().ok(),
            (true, DimensionValue::Text(s)) => {
                let s = s.trim();
                let position = if self == Self::Season {
                    SEASONS
                        .iter()
                        .position(|x| x.as_ref().eq_ignore_ascii_case(s))
                } else {
                    TIMES_OF_DAY
                        .iter()
                        .position(|x| x.as_ref().eq_ignore_ascii_case(s))
                };
                position.and_then(|i| i64::try_from(i).ok())
            }
            _ => None,
        }
    }
}

/// Where a resolved dimension's values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSource {
    /// A declared schema column of a groupable kind.
    Column(ColumnKind),
    /// A key derived from `start_time`.
    Derived(DerivedKey),
}

/// A validated dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDimension {
    /// Canonical name: the column's logical name or the derived key name.
    pub name: String,
    /// Where its values come from.
    pub source: DimensionSource,
}

/// Resolves a single name, returning `None` if it is neither a groupable
/// column nor a derived key.
///
/// Derived names take precedence. Columns match on their logical name or
/// raw header, case-insensitively.
#[must_use]
pub fn resolve_one(view: &CleanedView, requested: &str) -> Option<ResolvedDimension> {
    let name = requested.trim();
    if let Ok(key) = DerivedKey::from_str(name) {
        return Some(ResolvedDimension {
            name: key.to_string(),
            source: DimensionSource::Derived(key),
        });
    }

    view.schema()
        .columns
        .iter()
        .filter(|c| c.kind.is_groupable())
        .find(|c| c.name.eq_ignore_ascii_case(name) || c.source_header().eq_ignore_ascii_case(name))
        .map(|c| ResolvedDimension {
            name: c.name.clone(),
            source: DimensionSource::Column(c.kind),
        })
}

/// Resolves a stratification key, preserving request order.
///
/// # Errors
///
/// * [`EngineError::UnknownDimension`] listing every name that did not
///   resolve
/// * [`EngineError::DuplicateDimension`] if two names resolve to the same
///   dimension
pub fn resolve<S: AsRef<str>>(
    view: &CleanedView,
    requested: &[S],
) -> Result<Vec<ResolvedDimension>, EngineError> {
    let mut resolved = Vec::with_capacity(requested.len());
    let mut unknown = Vec::new();

    for name in requested {
        match resolve_one(view, name.as_ref()) {
            Some(dimension) => resolved.push(dimension),
            None => unknown.push(name.as_ref().to_string()),
        }
    }

    if !unknown.is_empty() {
        return Err(EngineError::UnknownDimension { names: unknown });
    }

    for (i, dimension) in resolved.iter().enumerate() {
        if resolved[..i].iter().any(|d| d.name == dimension.name) {
            return Err(EngineError::DuplicateDimension {
                name: dimension.name.clone(),
            });
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::view::test_view;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 30, 0)
            .unwrap()
    }

    #[test]
    fn computes_derived_keys() {
        // 2021-03-07 was a Sunday.
        let ts = at(2021, 3, 7, 19);
        assert_eq!(DerivedKey::Hour.compute(ts), 19);
        assert_eq!(DerivedKey::DayOfWeek.compute(ts), 0);
        assert_eq!(DerivedKey::Month.compute(ts), 3);
        assert_eq!(DerivedKey::Year.compute(ts), 2021);
        assert_eq!(
            DerivedKey::Season.decode(DerivedKey::Season.compute(ts)),
            DimensionValue::from("Spring")
        );
        assert_eq!(
            DerivedKey::TimeOfDay.decode(DerivedKey::TimeOfDay.compute(ts)),
            DimensionValue::from("Evening")
        );
    }

    #[test]
    fn encodes_labels_case_insensitively() {
        assert_eq!(
            DerivedKey::Season.encode(&DimensionValue::from("summer")),
            Some(2)
        );
        assert_eq!(DerivedKey::Season.encode(&DimensionValue::Int(2)), None);
        assert_eq!(DerivedKey::Hour.encode(&DimensionValue::from("7")), Some(7));
    }

    #[test]
    fn resolves_columns_and_derived_keys_in_order() {
        let view = test_view();
        let dims = resolve(&view, &["Severity", "hour", "STATE"]).unwrap();
        let names = dims.iter().map(|d| d.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["severity", "hour", "state"]);
        assert_eq!(dims[1].source, DimensionSource::Derived(DerivedKey::Hour));
    }

    #[test]
    fn resolves_raw_headers() {
        let view = test_view();
        let dim = resolve_one(&view, "Weather_Condition").unwrap();
        assert_eq!(dim.name, "weather_condition");
    }

    #[test]
    fn lists_every_unknown_dimension() {
        let view = test_view();
        let err = resolve(&view, &["state", "planet", "temperature_f", "mood"]).unwrap_err();
        let EngineError::UnknownDimension { names } = err else {
            panic!("expected unknown dimension, got {err}");
        };
        assert_eq!(names, ["planet", "temperature_f", "mood"]);
    }

    #[test]
    fn rejects_repeated_dimensions() {
        let view = test_view();
        let err = resolve(&view, &["state", "State"]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateDimension { name } if name == "state"));
    }
}
