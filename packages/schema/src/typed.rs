//! Typed, columnar tables produced by the normalizer.
//!
//! Every declared schema column becomes one [`ColumnData`] vector with one
//! slot per raw row. Categorical columns are dictionary encoded so that a
//! multi-million-row table holds each distinct label once.

use std::collections::HashMap;

use chrono::NaiveDateTime;

use crate::descriptor::{ColumnKind, ColumnSpec, Schema};
use crate::normalize::NormalizationReport;

/// A dictionary-encoded column of canonical labels.
#[derive(Debug, Clone, Default)]
pub struct CategoricalColumn {
    labels: Vec<String>,
    index: HashMap<String, u32>,
    codes: Vec<Option<u32>>,
    /// Raw spelling to code, so each distinct spelling is canonicalized once.
    raw_codes: HashMap<String, Option<u32>>,
}

impl CategoricalColumn {
    /// Appends a value, interning it in the dictionary.
    pub fn push(&mut self, value: Option<String>) {
        let code = value.map(|label| self.intern(label));
        self.codes.push(code);
    }

    /// Appends a raw cell, running `canonicalize` only the first time a
    /// spelling is seen.
    pub fn push_raw(&mut self, raw: &str, canonicalize: impl FnOnce(&str) -> Option<String>) {
        let code = match self.raw_codes.get(raw) {
            Some(code) => *code,
            None => {
                let code = canonicalize(raw).map(|label| self.intern(label));
                self.raw_codes.insert(raw.to_string(), code);
                code
            }
        };
        self.codes.push(code);
    }

    fn intern(&mut self, label: String) -> u32 {
        if let Some(code) = self.index.get(&label) {
            return *code;
        }
        let code = u32::try_from(self.labels.len()).unwrap_or(u32::MAX);
        self.index.insert(label.clone(), code);
        self.labels.push(label);
        code
    }

    /// The label stored at `row`, if present.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<&str> {
        self.codes
            .get(row)
            .copied()
            .flatten()
            .and_then(|code| self.label(code))
    }

    /// The dictionary code stored at `row`, if present.
    #[must_use]
    pub fn code(&self, row: usize) -> Option<u32> {
        self.codes.get(row).copied().flatten()
    }

    /// Resolves a dictionary code to its label.
    #[must_use]
    pub fn label(&self, code: u32) -> Option<&str> {
        self.labels.get(code as usize).map(String::as_str)
    }

    /// Looks up the code of a label, if it occurs in the dictionary.
    #[must_use]
    pub fn code_of(&self, label: &str) -> Option<u32> {
        self.index.get(label).copied()
    }

    /// All distinct labels, in first-seen order.
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Projects the selected rows into a new column that shares this
    /// column's dictionary.
    #[must_use]
    pub fn gather(&self, rows: &[usize]) -> Self {
        Self {
            labels: self.labels.clone(),
            index: self.index.clone(),
            codes: rows.iter().map(|&row| self.code(row)).collect(),
            raw_codes: HashMap::new(),
        }
    }
}

/// The values of one typed column.
#[derive(Debug, Clone)]
pub enum ColumnData {
    /// Canonicalized free text.
    Text(Vec<Option<String>>),
    /// Signed integers.
    Integer(Vec<Option<i64>>),
    /// Finite floats.
    Float(Vec<Option<f64>>),
    /// Naive timestamps.
    Timestamp(Vec<Option<NaiveDateTime>>),
    /// Dictionary-encoded labels.
    Categorical(CategoricalColumn),
}

impl ColumnData {
    /// Creates an empty column for the given kind.
    #[must_use]
    pub fn empty(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Text => Self::Text(Vec::new()),
            ColumnKind::Integer => Self::Integer(Vec::new()),
            ColumnKind::Float => Self::Float(Vec::new()),
            ColumnKind::Timestamp => Self::Timestamp(Vec::new()),
            ColumnKind::Categorical => Self::Categorical(CategoricalColumn::default()),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(v) => v.len(),
            Self::Integer(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Timestamp(v) => v.len(),
            Self::Categorical(c) => c.len(),
        }
    }

    /// Whether the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a missing value.
    pub fn push_missing(&mut self) {
        match self {
            Self::Text(v) => v.push(None),
            Self::Integer(v) => v.push(None),
            Self::Float(v) => v.push(None),
            Self::Timestamp(v) => v.push(None),
            Self::Categorical(c) => c.push(None),
        }
    }

    /// Whether the value at `row` is missing.
    #[must_use]
    pub fn is_null(&self, row: usize) -> bool {
        match self {
            Self::Text(v) => v.get(row).is_none_or(Option::is_none),
            Self::Integer(v) => v.get(row).is_none_or(Option::is_none),
            Self::Float(v) => v.get(row).is_none_or(Option::is_none),
            Self::Timestamp(v) => v.get(row).is_none_or(Option::is_none),
            Self::Categorical(c) => c.code(row).is_none(),
        }
    }

    /// Projects the selected rows into a new column.
    #[must_use]
    pub fn gather(&self, rows: &[usize]) -> Self {
        fn pick<T: Clone>(values: &[Option<T>], rows: &[usize]) -> Vec<Option<T>> {
            rows.iter()
                .map(|&row| values.get(row).cloned().flatten())
                .collect()
        }

        match self {
            Self::Text(v) => Self::Text(pick(v, rows)),
            Self::Integer(v) => Self::Integer(pick(v, rows)),
            Self::Float(v) => Self::Float(pick(v, rows)),
            Self::Timestamp(v) => Self::Timestamp(pick(v, rows)),
            Self::Categorical(c) => Self::Categorical(c.gather(rows)),
        }
    }
}

/// A declared column together with its values.
#[derive(Debug, Clone)]
pub struct TypedColumn {
    /// The schema declaration this column was read with.
    pub spec: ColumnSpec,
    /// The typed values.
    pub data: ColumnData,
}

/// A typed, columnar view of a raw table.
#[derive(Debug, Clone)]
pub struct TypedTable {
    pub(crate) snapshot_id: String,
    pub(crate) schema: Schema,
    pub(crate) columns: Vec<TypedColumn>,
    pub(crate) len: usize,
    pub(crate) report: NormalizationReport,
}

impl TypedTable {
    /// Identifier of the raw snapshot this table was read from.
    #[must_use]
    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    /// The schema the table was read with.
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the table has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Per-column parse and coercion counts.
    #[must_use]
    pub const fn report(&self) -> &NormalizationReport {
        &self.report
    }

    /// All columns, in schema order.
    #[must_use]
    pub fn columns(&self) -> &[TypedColumn] {
        &self.columns
    }

    /// Looks up a column by logical name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&TypedColumn> {
        self.columns.iter().find(|c| c.spec.name == name)
    }

    /// The values of a text column.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&[Option<String>]> {
        match &self.column(name)?.data {
            ColumnData::Text(v) => Some(v),
            _ => None,
        }
    }

    /// The values of an integer column.
    #[must_use]
    pub fn integer(&self, name: &str) -> Option<&[Option<i64>]> {
        match &self.column(name)?.data {
            ColumnData::Integer(v) => Some(v),
            _ => None,
        }
    }

    /// The values of a float column.
    #[must_use]
    pub fn float(&self, name: &str) -> Option<&[Option<f64>]> {
        match &self.column(name)?.data {
            ColumnData::Float(v) => Some(v),
            _ => None,
        }
    }

    /// The values of a timestamp column.
    #[must_use]
    pub fn timestamp(&self, name: &str) -> Option<&[Option<NaiveDateTime>]> {
        match &self.column(name)?.data {
            ColumnData::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    /// The values of a categorical column.
    #[must_use]
    pub fn categorical(&self, name: &str) -> Option<&CategoricalColumn> {
        match &self.column(name)?.data {
            ColumnData::Categorical(c) => Some(c),
            _ => None,
        }
    }

    /// Projects the selected rows (in the given order) into a new table.
    /// The source table is left untouched.
    #[must_use]
    pub fn gather(&self, rows: &[usize]) -> Self {
        Self {
            snapshot_id: self.snapshot_id.clone(),
            schema: self.schema.clone(),
            columns: self
                .columns
                .iter()
                .map(|c| TypedColumn {
                    spec: c.spec.clone(),
                    data: c.data.gather(rows),
                })
                .collect(),
            len: rows.len(),
            report: self.report.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_categorical_labels() {
        let mut column = CategoricalColumn::default();
        column.push(Some("CA".to_string()));
        column.push(None);
        column.push(Some("TX".to_string()));
        column.push(Some("CA".to_string()));

        assert_eq!(column.len(), 4);
        assert_eq!(column.labels(), ["CA".to_string(), "TX".to_string()]);
        assert_eq!(column.get(3), Some("CA"));
        assert_eq!(column.get(1), None);
        assert_eq!(column.code(0), column.code(3));
        assert_eq!(column.code_of("TX"), Some(1));
    }

    #[test]
    fn canonicalizes_each_spelling_once() {
        let mut column = CategoricalColumn::default();
        let mut calls = 0;
        for raw in ["texas", "TX", "texas", "", "texas", "TX"] {
            column.push_raw(raw, |raw| {
                calls += 1;
                crate::canonical::Canonicalizer::StateCode.apply(raw)
            });
        }

        assert_eq!(calls, 3);
        assert_eq!(column.labels(), ["TX".to_string()]);
        assert_eq!(column.len(), 6);
        assert_eq!(column.get(3), None);
        assert!((0..6).filter(|&r| r != 3).all(|r| column.get(r) == Some("TX")));
    }

    #[test]
    fn gathers_rows_in_order() {
        let data = ColumnData::Integer(vec![Some(1), None, Some(3)]);
        let ColumnData::Integer(picked) = data.gather(&[2, 1]) else {
            panic!("kind changed");
        };
        assert_eq!(picked, vec![Some(3), None]);
        assert!(data.is_null(1));
        assert!(!data.is_null(0));
        assert!(data.is_null(9));
    }

    #[test]
    fn gathered_categorical_keeps_dictionary() {
        let mut column = CategoricalColumn::default();
        for label in ["CA", "TX", "NY"] {
            column.push(Some(label.to_string()));
        }
        let picked = column.gather(&[2]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked.get(0), Some("NY"));
        assert_eq!(picked.labels().len(), 3);
    }
}
