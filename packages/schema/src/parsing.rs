//! Cell-level type parsing.
//!
//! Each parser reports whether the cell converted exactly, converted only
//! through an ambiguous coercion (which the normalizer records), or could
//! not be converted at all.

use chrono::{NaiveDate, NaiveDateTime, Timelike as _};

/// Cell literals treated as missing values, compared case-insensitively.
const MISSING_LITERALS: &[&str] = &["", "na", "n/a", "nan", "null", "none"];

/// Outcome of parsing one cell into a typed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parsed<T> {
    /// The cell converted without loss.
    Exact(T),
    /// The cell converted, but only through a lossy or ambiguous rule.
    Coerced(T),
    /// The cell does not hold a value of the declared type.
    Invalid,
}

impl<T> Parsed<T> {
    /// Returns the converted value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            Self::Exact(v) | Self::Coerced(v) => Some(v),
            Self::Invalid => None,
        }
    }
}

/// Returns `true` if the cell holds one of the missing-value literals.
#[must_use]
pub fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    MISSING_LITERALS
        .iter()
        .any(|literal| trimmed.eq_ignore_ascii_case(literal))
}

/// Parses an integer cell. Integral floats such as `"2.0"` are coerced.
#[must_use]
pub fn parse_integer(raw: &str) -> Parsed<i64> {
    let trimmed = raw.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Parsed::Exact(v);
    }
    match trimmed.parse::<f64>() {
        #[allow(clippy::cast_possible_truncation)]
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
            Parsed::Coerced(f as i64)
        }
        _ => Parsed::Invalid,
    }
}

/// Parses a float cell. Non-finite values are invalid.
#[must_use]
pub fn parse_float(raw: &str) -> Parsed<f64> {
    match raw.trim().parse::<f64>() {
        Ok(f) if f.is_finite() => Parsed::Exact(f),
        _ => Parsed::Invalid,
    }
}

/// Parses a timestamp cell.
///
/// Accepts `YYYY-MM-DD HH:MM:SS` with a space or `T` separator. Fractional
/// seconds are truncated and bare dates are read as midnight; both count
/// as coercions.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Parsed<NaiveDateTime> {
    let trimmed = raw.trim();

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            if dt.nanosecond() == 0 {
                return Parsed::Exact(dt);
            }
            return dt
                .with_nanosecond(0)
                .map_or(Parsed::Invalid, Parsed::Coerced);
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map_or(Parsed::Invalid, Parsed::Coerced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_missing_literals() {
        assert!(is_missing(""));
        assert!(is_missing("  "));
        assert!(is_missing("NaN"));
        assert!(is_missing("N/A"));
        assert!(is_missing("null"));
        assert!(!is_missing("0"));
        assert!(!is_missing("Nashville"));
    }

    #[test]
    fn parses_integers() {
        assert_eq!(parse_integer("3"), Parsed::Exact(3));
        assert_eq!(parse_integer(" 7 "), Parsed::Exact(7));
        assert_eq!(parse_integer("2.0"), Parsed::Coerced(2));
        assert_eq!(parse_integer("2.5"), Parsed::Invalid);
        assert_eq!(parse_integer("high"), Parsed::Invalid);
    }

    #[test]
    fn parses_floats() {
        assert_eq!(parse_float("36.9"), Parsed::Exact(36.9));
        assert_eq!(parse_float("inf"), Parsed::Invalid);
        assert_eq!(parse_float("warm"), Parsed::Invalid);
    }

    #[test]
    fn parses_exact_timestamps() {
        let dt = parse_timestamp("2016-02-08 05:46:00").value().unwrap();
        assert_eq!(dt.to_string(), "2016-02-08 05:46:00");
        assert!(matches!(parse_timestamp("2016-02-08T05:46:00"), Parsed::Exact(_)));
        assert!(matches!(parse_timestamp("2016-02-08 05:46:00.000"), Parsed::Exact(_)));
    }

    #[test]
    fn coerces_fractional_seconds_and_dates() {
        let Parsed::Coerced(dt) = parse_timestamp("2016-02-08 05:46:00.123456789") else {
            panic!("expected coercion");
        };
        assert_eq!(dt.to_string(), "2016-02-08 05:46:00");

        let Parsed::Coerced(midnight) = parse_timestamp("2016-02-08") else {
            panic!("expected coercion");
        };
        assert_eq!(midnight.to_string(), "2016-02-08 00:00:00");
    }

    #[test]
    fn rejects_malformed_timestamps() {
        assert_eq!(parse_timestamp("yesterday"), Parsed::Invalid);
        assert_eq!(parse_timestamp("2016-13-08 05:46:00"), Parsed::Invalid);
    }
}
