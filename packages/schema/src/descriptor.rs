//! Config-driven schema descriptor.
//!
//! [`Schema`] captures, for every logical column the engine works with,
//! which raw header it comes from, what type it must parse as, and how its
//! values are canonicalized. Schemas are TOML documents so renamed upstream
//! columns are a config change, not a code change.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::SchemaError;
use crate::canonical::{Canonicalizer, synonym_key};

/// Logical name of the unique record identifier column.
pub const ID: &str = "id";
/// Logical name of the incident start timestamp column.
pub const START_TIME: &str = "start_time";
/// Logical name of the incident end timestamp column.
pub const END_TIME: &str = "end_time";
/// Logical name of the two-letter state code column.
pub const STATE: &str = "state";
/// Logical name of the ordinal severity column.
pub const SEVERITY: &str = "severity";
/// Logical name of the weather condition column.
pub const WEATHER_CONDITION: &str = "weather_condition";

/// The built-in schema for the US Accidents bulk export.
const US_ACCIDENTS_TOML: &str = include_str!("../schemas/us_accidents.toml");

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Free text, kept as canonicalized strings.
    Text,
    /// Signed integers (ordinal codes, counts).
    Integer,
    /// Floating point measurements.
    Float,
    /// Naive (zone-less) timestamps.
    Timestamp,
    /// Low-cardinality labels, dictionary encoded.
    Categorical,
}

impl ColumnKind {
    /// Whether values of this kind can be used as a stratification
    /// dimension.
    #[must_use]
    pub const fn is_groupable(self) -> bool {
        matches!(self, Self::Integer | Self::Categorical)
    }
}

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Logical name used by the engine (e.g. `"state"`).
    pub name: String,
    /// Header of the column in the raw table. Defaults to `name`.
    #[serde(default)]
    pub source: Option<String>,
    /// Declared type.
    pub kind: ColumnKind,
    /// Whether the raw table must contain this column at all.
    #[serde(default)]
    pub required: bool,
    /// Base canonicalization applied to text and categorical values.
    #[serde(default)]
    pub canonicalizer: Canonicalizer,
    /// Extra spelling folds applied after the base canonicalizer. Keys are
    /// matched case- and whitespace-insensitively.
    #[serde(default)]
    pub synonyms: BTreeMap<String, String>,
}

impl ColumnSpec {
    /// The raw header this column is read from.
    #[must_use]
    pub fn source_header(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.name)
    }

    /// Canonicalizes a non-missing raw cell for this column, applying the
    /// base canonicalizer and then the synonym map.
    ///
    /// Returns `None` when nothing is left after canonicalization.
    #[must_use]
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        self.canonicalize_with(raw, &self.synonym_index())
    }

    /// The synonym map keyed by [`synonym_key`], built once per load. When
    /// two entries fold to the same key the first in map order wins.
    #[must_use]
    pub fn synonym_index(&self) -> HashMap<String, String> {
        let mut index = HashMap::with_capacity(self.synonyms.len());
        for (from, to) in &self.synonyms {
            index.entry(synonym_key(from)).or_insert_with(|| to.clone());
        }
        index
    }

    /// [`Self::canonicalize`] against a prebuilt [`Self::synonym_index`].
    #[must_use]
    pub fn canonicalize_with(
        &self,
        raw: &str,
        synonyms: &HashMap<String, String>,
    ) -> Option<String> {
        let value = self.canonicalizer.apply(raw)?;
        if synonyms.is_empty() {
            return Some(value);
        }
        Some(synonyms.get(&synonym_key(&value)).cloned().unwrap_or(value))
    }
}

/// A complete schema: the ordered list of columns the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Human-readable schema name.
    pub name: String,
    /// Declared columns, in the order they appear in typed tables.
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    /// Parses and validates a schema from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the TOML is malformed or the declared
    /// columns are inconsistent (see [`Self::validate`]).
    pub fn from_toml(toml_str: &str) -> Result<Self, SchemaError> {
        let schema: Self = toml::de::from_str(toml_str)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Reads a schema TOML file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the file cannot be read or parsed.
    pub fn from_path(path: &std::path::Path) -> Result<Self, SchemaError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// The built-in schema for the US Accidents bulk export.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] only if the embedded TOML is broken.
    pub fn us_accidents() -> Result<Self, SchemaError> {
        Self::from_toml(US_ACCIDENTS_TOML)
    }

    /// Checks that column names are unique and that every column with a
    /// role in validation is declared with the type the validator expects.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidSchema`] describing the first problem.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::BTreeSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::InvalidSchema {
                    message: format!("column '{}' is declared twice", column.name),
                });
            }
        }

        let roles = [
            (ID, ColumnKind::Text),
            (START_TIME, ColumnKind::Timestamp),
            (END_TIME, ColumnKind::Timestamp),
            (STATE, ColumnKind::Categorical),
            (SEVERITY, ColumnKind::Integer),
        ];
        for (name, kind) in roles {
            match self.column(name) {
                Some(column) if column.kind != kind => {
                    return Err(SchemaError::InvalidSchema {
                        message: format!(
                            "column '{name}' must be declared as {kind:?}, found {:?}",
                            column.kind
                        ),
                    });
                }
                None if name != END_TIME => {
                    return Err(SchemaError::InvalidSchema {
                        message: format!("column '{name}' must be declared"),
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Looks up a column by logical name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Stable digest of the schema, used to version everything derived
    /// from data read through it.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_builtin_schema() {
        let schema = Schema::us_accidents().unwrap();
        assert_eq!(schema.name, "us_accidents");
        assert_eq!(schema.column(STATE).unwrap().source_header(), "State");
        assert!(schema.column(ID).unwrap().required);
        assert!(!schema.column(WEATHER_CONDITION).unwrap().required);
    }

    #[test]
    fn source_defaults_to_name() {
        let schema = Schema::from_toml(
            r#"
            name = "minimal"
            [[columns]]
            name = "id"
            kind = "text"
            [[columns]]
            name = "start_time"
            kind = "timestamp"
            [[columns]]
            name = "state"
            kind = "categorical"
            [[columns]]
            name = "severity"
            kind = "integer"
            "#,
        )
        .unwrap();
        assert_eq!(schema.column(ID).unwrap().source_header(), "id");
        assert_eq!(schema.column(ID).unwrap().canonicalizer, Canonicalizer::None);
    }

    #[test]
    fn rejects_wrong_role_kind() {
        let err = Schema::from_toml(
            r#"
            name = "bad"
            [[columns]]
            name = "id"
            kind = "text"
            [[columns]]
            name = "start_time"
            kind = "text"
            [[columns]]
            name = "state"
            kind = "categorical"
            [[columns]]
            name = "severity"
            kind = "integer"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("start_time"));
    }

    #[test]
    fn rejects_duplicate_columns() {
        let err = Schema::from_toml(
            r#"
            name = "dup"
            [[columns]]
            name = "id"
            kind = "text"
            [[columns]]
            name = "id"
            kind = "text"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn synonyms_apply_after_canonicalizer() {
        let schema = Schema::us_accidents().unwrap();
        let weather = schema.column(WEATHER_CONDITION).unwrap();
        assert_eq!(weather.canonicalize("  partly   sunny "), Some("Partly Cloudy".to_string()));
        assert_eq!(weather.canonicalize("Fog"), Some("Fog".to_string()));
    }

    #[test]
    fn fingerprint_tracks_changes() {
        let schema = Schema::us_accidents().unwrap();
        let mut renamed = schema.clone();
        renamed.columns[0].source = Some("Incident_ID".to_string());
        assert_eq!(schema.fingerprint(), Schema::us_accidents().unwrap().fingerprint());
        assert_ne!(schema.fingerprint(), renamed.fingerprint());
    }
}
