//! The cleaned view: validated rows plus lazily derived temporal keys.
//!
//! A [`CleanedView`] is immutable once built and is shared between
//! concurrent aggregation workers behind an `Arc`. Derived columns are
//! filled on first use and memoized for the life of the view.

use std::sync::OnceLock;

use accident_risk_engine_models::DimensionValue;
use accident_risk_schema::descriptor::{ColumnKind, Schema, SEVERITY, START_TIME, STATE};
use accident_risk_schema::parsing::parse_integer;
use accident_risk_schema::typed::{CategoricalColumn, TypedTable};
use chrono::NaiveDateTime;

use crate::dimension::{DerivedKey, DimensionSource, ResolvedDimension};

/// Rows that passed validation, identified by a version string.
#[derive(Debug)]
pub struct CleanedView {
    table: TypedTable,
    version: String,
    derived: [OnceLock<Vec<Option<i64>>>; DerivedKey::ALL.len()],
}

impl CleanedView {
    pub(crate) fn new(table: TypedTable, version: String) -> Self {
        Self {
            table,
            version,
            derived: Default::default(),
        }
    }

    /// Version identifier; changes whenever the raw snapshot, the
    /// validation rules, or the schema change.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the view has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The underlying typed rows.
    #[must_use]
    pub const fn table(&self) -> &TypedTable {
        &self.table
    }

    /// The schema the rows were read with.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        self.table.schema()
    }

    /// Incident start times. Never missing in a cleaned view.
    #[must_use]
    pub fn start_times(&self) -> &[Option<NaiveDateTime>] {
        self.table.timestamp(START_TIME).unwrap_or_default()
    }

    /// Incident severities. Always in 1-4 in a cleaned view.
    #[must_use]
    pub fn severities(&self) -> &[Option<i64>] {
        self.table.integer(SEVERITY).unwrap_or_default()
    }

    /// State codes.
    #[must_use]
    pub fn states(&self) -> Option<&CategoricalColumn> {
        self.table.categorical(STATE)
    }

    /// Values of a derived key, computing them on first access.
    pub fn derived(&self, key: DerivedKey) -> &[Option<i64>] {
        self.derived[key.slot()].get_or_init(|| {
            log::debug!("Deriving '{key}' for view {}", self.version);
            self.start_times()
                .iter()
                .map(|ts| ts.map(|ts| key.compute(ts)))
                .collect()
        })
    }

    /// Whether a derived key has already been computed for this view.
    #[must_use]
    pub fn is_derived(&self, key: DerivedKey) -> bool {
        self.derived[key.slot()].get().is_some()
    }

    /// Row accessor for a resolved dimension.
    #[must_use]
    pub fn key_column(&self, dimension: &ResolvedDimension) -> Option<KeyColumn<'_>> {
        match dimension.source {
            DimensionSource::Derived(key) => Some(KeyColumn::Derived(key, self.derived(key))),
            DimensionSource::Column(ColumnKind::Categorical) => self
                .table
                .categorical(&dimension.name)
                .map(KeyColumn::Categorical),
            DimensionSource::Column(ColumnKind::Integer) => {
                self.table.integer(&dimension.name).map(KeyColumn::Integer)
            }
            DimensionSource::Column(_) => None,
        }
    }

    /// Canonicalizes a user-supplied value for `dimension` the same way the
    /// normalizer canonicalized the data, and encodes it.
    ///
    /// The returned code is `None` when the value cannot occur in this view
    /// (for example a label that no row carries).
    #[must_use]
    pub fn canonical_literal(
        &self,
        dimension: &ResolvedDimension,
        value: &DimensionValue,
    ) -> (DimensionValue, Option<Option<i64>>) {
        if value.is_missing() {
            return (DimensionValue::Missing, Some(None));
        }

        match dimension.source {
            DimensionSource::Derived(key) => key.encode(value).map_or_else(
                || (value.clone(), None),
                |code| (key.decode(code), Some(Some(code))),
            ),
            DimensionSource::Column(ColumnKind::Integer) => match value {
                DimensionValue::Int(v) => (DimensionValue::Int(*v), Some(Some(*v))),
                other => parse_integer(&other.to_string()).value().map_or_else(
                    || (other.clone(), None),
                    |v| (DimensionValue::Int(v), Some(Some(v))),
                ),
            },
            DimensionSource::Column(_) => {
                let raw = value.to_string();
                let label = self
                    .schema()
                    .column(&dimension.name)
                    .and_then(|spec| spec.canonicalize(&raw))
                    .unwrap_or(raw);
                let code = self
                    .table
                    .categorical(&dimension.name)
                    .and_then(|c| c.code_of(&label))
                    .map(|c| Some(i64::from(c)));
                (DimensionValue::Text(label), code)
            }
        }
    }
}

/// Read access to one dimension's per-row codes.
#[derive(Debug, Clone, Copy)]
pub enum KeyColumn<'a> {
    /// Dictionary codes of a categorical column.
    Categorical(&'a CategoricalColumn),
    /// Values of an integer column.
    Integer(&'a [Option<i64>]),
    /// Codes of a derived key.
    Derived(DerivedKey, &'a [Option<i64>]),
}

impl KeyColumn<'_> {
    /// The code at `row`, `None` when the value is missing.
    #[must_use]
    pub fn code(&self, row: usize) -> Option<i64> {
        match self {
            Self::Categorical(c) => c.code(row).map(i64::from),
            Self::Integer(v) | Self::Derived(_, v) => v.get(row).copied().flatten(),
        }
    }

    /// Turns a code back into an output value.
    #[must_use]
    pub fn decode(&self, code: Option<i64>) -> DimensionValue {
        let Some(code) = code else {
            return DimensionValue::Missing;
        };
        match self {
            Self::Categorical(c) => u32::try_from(code)
                .ok()
                .and_then(|code| c.label(code))
                .map_or(DimensionValue::Missing, |label| {
                    DimensionValue::Text(label.to_string())
                }),
            Self::Integer(_) => DimensionValue::Int(code),
            Self::Derived(key, _) => key.decode(code),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_view() -> CleanedView {
    test_view_with(&crate::config::ValidationConfig::default())
}

/// The five-row fixture validated under `config`.
#[cfg(test)]
pub(crate) fn test_view_with(config: &crate::config::ValidationConfig) -> CleanedView {
    use accident_risk_schema::normalize::normalize;
    use accident_risk_schema::progress::null_progress;
    use accident_risk_schema::raw::RawTable;

    use crate::validate::validate;

    let raw = RawTable::new(
        "test-snapshot",
        ["ID", "Start_Time", "End_Time", "State", "Severity", "Weather_Condition", "Temperature(F)"],
        [
            ["A-1", "2021-03-07 08:15:00", "2021-03-07 09:00:00", "CA", "1", "Rain", "51.0"],
            ["A-2", "2021-03-07 17:40:00", "", "ca", "2", "Light Rain", "49.5"],
            ["A-3", "2021-07-04 23:05:00", "2021-07-05 01:00:00", "TX", "1", "Fair", ""],
            ["A-4", "2022-01-15 12:00:00", "", "Texas", "1", "", "31.0"],
            ["A-5", "2022-01-16 06:30:00", "", "TX", "3", "T-Storm", "60.2"],
        ],
    );
    let typed = normalize(&raw, &Schema::us_accidents().unwrap()).unwrap();
    let (view, _) = validate(&typed, config, &null_progress());
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimension::resolve_one;

    #[test]
    fn derives_lazily_and_once() {
        let view = test_view();
        assert!(!view.is_derived(DerivedKey::Hour));
        let first = view.derived(DerivedKey::Hour).as_ptr();
        assert!(view.is_derived(DerivedKey::Hour));
        assert!(!view.is_derived(DerivedKey::Month));
        assert_eq!(view.derived(DerivedKey::Hour).as_ptr(), first);
        assert_eq!(
            view.derived(DerivedKey::Hour),
            [Some(8), Some(17), Some(23), Some(12), Some(6)]
        );
    }

    #[test]
    fn decodes_key_columns() {
        let view = test_view();
        let state = resolve_one(&view, "state").unwrap();
        let column = view.key_column(&state).unwrap();
        assert_eq!(column.decode(column.code(1)), DimensionValue::from("CA"));
        assert_eq!(column.decode(column.code(3)), DimensionValue::from("TX"));

        let weather = resolve_one(&view, "weather_condition").unwrap();
        let column = view.key_column(&weather).unwrap();
        assert_eq!(column.decode(column.code(3)), DimensionValue::Missing);
        assert_eq!(column.decode(column.code(4)), DimensionValue::from("Thunderstorm"));
    }

    #[test]
    fn canonicalizes_user_literals() {
        let view = test_view();
        let state = resolve_one(&view, "state").unwrap();
        let (value, code) = view.canonical_literal(&state, &DimensionValue::from("texas"));
        assert_eq!(value, DimensionValue::from("TX"));
        assert!(matches!(code, Some(Some(_))));

        let (value, code) = view.canonical_literal(&state, &DimensionValue::from("pr"));
        assert_eq!(value, DimensionValue::from("PR"));
        assert_eq!(code, None);

        let severity = resolve_one(&view, "severity").unwrap();
        for literal in ["2.0", " 2 ", "2"] {
            let literal = DimensionValue::parse_literal(literal);
            let (value, code) = view.canonical_literal(&severity, &literal);
            assert_eq!(value, DimensionValue::Int(2), "{literal:?}");
            assert_eq!(code, Some(Some(2)));
        }
        let (value, code) = view.canonical_literal(&severity, &DimensionValue::from("high"));
        assert_eq!(value, DimensionValue::from("high"));
        assert_eq!(code, None);

        let season = resolve_one(&view, "season").unwrap();
        let (value, code) = view.canonical_literal(&season, &DimensionValue::from("WINTER"));
        assert_eq!(value, DimensionValue::from("Winter"));
        assert_eq!(code, Some(Some(0)));
    }
}
