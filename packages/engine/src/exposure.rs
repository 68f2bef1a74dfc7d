//! Exposure (denominator) tables.
//!
//! An exposure table maps a subset of dimensions (for example `state`, or
//! `state` and `year`) to a positive baseline quantity such as population
//! or vehicle-miles travelled.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use accident_risk_engine_models::DimensionValue;
use accident_risk_schema::parsing::is_missing;
use sha2::{Digest as _, Sha256};

use crate::EngineError;
use crate::dimension::{ResolvedDimension, resolve_one};
use crate::view::CleanedView;

/// Header of the denominator column in exposure CSV files.
pub const EXPOSURE_COLUMN: &str = "exposure";

/// Denominators keyed by a tuple of dimension values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExposureTable {
    dimensions: Vec<String>,
    entries: HashMap<Vec<DimensionValue>, f64>,
}

impl ExposureTable {
    /// Creates an empty table over the given (already resolved) dimensions.
    #[must_use]
    pub fn new(dimensions: Vec<String>) -> Self {
        Self {
            dimensions,
            entries: HashMap::new(),
        }
    }

    /// Adds one denominator.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Exposure`] if the key has the wrong arity,
    /// the value is not a positive finite number, or the key already has an
    /// entry.
    pub fn insert(&mut self, key: Vec<DimensionValue>, exposure: f64) -> Result<(), EngineError> {
        if key.len() != self.dimensions.len() {
            return Err(EngineError::Exposure {
                message: format!(
                    "key has {} values, table has {} dimensions",
                    key.len(),
                    self.dimensions.len()
                ),
            });
        }
        if !exposure.is_finite() || exposure <= 0.0 {
            return Err(EngineError::Exposure {
                message: format!("exposure must be positive, got {exposure}"),
            });
        }
        if self.entries.contains_key(&key) {
            return Err(EngineError::Exposure {
                message: format!("duplicate entry for {}", format_key(&key)),
            });
        }
        self.entries.insert(key, exposure);
        Ok(())
    }

    /// Loads a CSV with one column per dimension plus an `exposure` column.
    ///
    /// Dimension headers are resolved against `view` like stratification
    /// dimensions, and key cells are canonicalized the way the view's data
    /// was, so `"california"` in the file matches `"CA"` in the data.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Exposure`] for unknown dimensions, a missing
    /// `exposure` column, or bad values, and [`EngineError::Csv`] if the
    /// file cannot be read.
    pub fn from_reader<R: Read>(reader: R, view: &CleanedView) -> Result<Self, EngineError> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = csv_reader.headers()?.clone();

        let exposure_index = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(EXPOSURE_COLUMN))
            .ok_or_else(|| EngineError::Exposure {
                message: format!("missing '{EXPOSURE_COLUMN}' column"),
            })?;

        let mut dimensions: Vec<(usize, ResolvedDimension)> = Vec::new();
        let mut unknown = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            if i == exposure_index {
                continue;
            }
            match resolve_one(view, header) {
                Some(dimension) if dimensions.iter().any(|(_, d)| d.name == dimension.name) => {
                    return Err(EngineError::Exposure {
                        message: format!("dimension '{}' appears twice", dimension.name),
                    });
                }
                Some(dimension) => dimensions.push((i, dimension)),
                None => unknown.push(header.to_string()),
            }
        }
        if !unknown.is_empty() {
            return Err(EngineError::Exposure {
                message: format!("unknown dimensions: {}", unknown.join(", ")),
            });
        }

        let mut table = Self::new(dimensions.iter().map(|(_, d)| d.name.clone()).collect());
        for (line, record) in csv_reader.records().enumerate() {
            let record = record?;
            let key = dimensions
                .iter()
                .map(|(i, dimension)| {
                    let cell = record.get(*i).unwrap_or_default();
                    if is_missing(cell) {
                        DimensionValue::Missing
                    } else {
                        view.canonical_literal(dimension, &DimensionValue::parse_literal(cell))
                            .0
                    }
                })
                .collect();
            let raw = record.get(exposure_index).unwrap_or_default();
            let exposure = raw.parse::<f64>().map_err(|_| EngineError::Exposure {
                message: format!("line {}: '{raw}' is not a number", line + 2),
            })?;
            table.insert(key, exposure).map_err(|e| match e {
                EngineError::Exposure { message } => EngineError::Exposure {
                    message: format!("line {}: {message}", line + 2),
                },
                other => other,
            })?;
        }

        log::info!(
            "Loaded {} exposure entries over [{}]",
            table.len(),
            table.dimensions.join(", ")
        );
        Ok(table)
    }

    /// Loads an exposure CSV file.
    ///
    /// # Errors
    ///
    /// See [`Self::from_reader`].
    pub fn from_path(path: &Path, view: &CleanedView) -> Result<Self, EngineError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, view)
    }

    /// Dimension names, in key order.
    #[must_use]
    pub fn dimensions(&self) -> &[String] {
        &self.dimensions
    }

    /// Looks up the denominator for a key in this table's dimension order.
    #[must_use]
    pub fn get(&self, key: &[DimensionValue]) -> Option<f64> {
        self.entries.get(key).copied()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable digest of the dimensions and entries, independent of load
    /// order.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut entries = self.entries.iter().collect::<Vec<_>>();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut hasher = Sha256::new();
        hasher.update(self.dimensions.join("\0").as_bytes());
        for (key, exposure) in entries {
            hasher.update(b"\n");
            hasher.update(format_key(key).as_bytes());
            hasher.update(exposure.to_bits().to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

fn format_key(key: &[DimensionValue]) -> String {
    let parts = key.iter().map(ToString::to_string).collect::<Vec<_>>();
    format!("({})", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::test_view;

    #[test]
    fn loads_and_canonicalizes_keys() {
        let view = test_view();
        let csv = "State,Exposure\ncalifornia,39500000\n tx ,29000000\n";
        let table = ExposureTable::from_reader(csv.as_bytes(), &view).unwrap();
        assert_eq!(table.dimensions(), ["state"]);
        assert_eq!(table.get(&[DimensionValue::from("CA")]), Some(39_500_000.0));
        assert_eq!(table.get(&[DimensionValue::from("TX")]), Some(29_000_000.0));
        assert_eq!(table.get(&[DimensionValue::from("PR")]), None);
    }

    #[test]
    fn loads_multi_dimension_keys() {
        let view = test_view();
        let csv = "year,state,exposure\n2021,CA,10\n2022,TX,20\n";
        let table = ExposureTable::from_reader(csv.as_bytes(), &view).unwrap();
        assert_eq!(table.dimensions(), ["year", "state"]);
        assert_eq!(
            table.get(&[DimensionValue::Int(2022), DimensionValue::from("TX")]),
            Some(20.0)
        );
    }

    #[test]
    fn fingerprint_ignores_row_order() {
        let view = test_view();
        let load = |csv: &str| ExposureTable::from_reader(csv.as_bytes(), &view).unwrap();
        let a = load("state,exposure\nCA,1\nTX,2\n");
        let b = load("state,exposure\nTX,2\nCA,1\n");
        let c = load("state,exposure\nTX,3\nCA,1\n");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn rejects_bad_files() {
        let view = test_view();
        let cases = [
            ("state,population\nCA,1\n", "missing 'exposure'"),
            ("planet,exposure\nMars,1\n", "unknown dimensions: planet"),
            ("state,exposure\nCA,-5\n", "line 2"),
            ("state,exposure\nCA,many\n", "not a number"),
            ("state,exposure\nCA,1\nCalifornia,2\n", "duplicate entry"),
            ("state,State,exposure\nCA,CA,1\n", "appears twice"),
        ];
        for (csv, expected) in cases {
            let err = ExposureTable::from_reader(csv.as_bytes(), &view).unwrap_err();
            assert!(err.to_string().contains(expected), "{csv}: {err}");
        }
    }
}
