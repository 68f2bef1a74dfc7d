//! The schema and type normalizer.
//!
//! Turns raw string cells into a [`TypedTable`] according to a [`Schema`].
//! Missing required columns fail the whole load; individual cells that do
//! not parse become missing values and are counted in the
//! [`NormalizationReport`] rather than raised.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;

use csv::{ByteRecord, StringRecord};
use serde::{Deserialize, Serialize};

use crate::SchemaError;
use crate::descriptor::{ColumnSpec, Schema};
use crate::parsing::{Parsed, is_missing, parse_float, parse_integer, parse_timestamp};
use crate::progress::{ProgressCallback, RowTicker};
use crate::raw::RawTable;
use crate::typed::{ColumnData, TypedColumn, TypedTable};

/// Audit of everything the normalizer did not take at face value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationReport {
    /// Rows read from the raw table.
    pub rows: u64,
    /// Empty or null-literal cells per column, for columns the raw table
    /// has.
    pub missing: BTreeMap<String, u64>,
    /// Cells per column that could not be parsed as the declared type,
    /// including cells that are not valid UTF-8.
    pub unparseable: BTreeMap<String, u64>,
    /// Cells per column that parsed only through an ambiguous coercion.
    pub coerced: BTreeMap<String, u64>,
    /// Optional columns whose header was not found; they read as missing.
    pub absent_columns: Vec<String>,
}

impl NormalizationReport {
    /// Total unparseable cells across all columns.
    #[must_use]
    pub fn total_unparseable(&self) -> u64 {
        self.unparseable.values().sum()
    }

    /// Total coerced cells across all columns.
    #[must_use]
    pub fn total_coerced(&self) -> u64 {
        self.coerced.values().sum()
    }

    /// Share of rows, 0-100, whose `column` cell was empty or null.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn missing_percentage(&self, column: &str) -> f64 {
        if self.rows == 0 {
            return 0.0;
        }
        self.missing.get(column).copied().unwrap_or(0) as f64 * 100.0 / self.rows as f64
    }
}

/// Streaming normalizer: bind headers once, then push rows one at a time.
pub struct Normalizer {
    schema: Schema,
    header_indices: Vec<Option<usize>>,
    synonyms: Vec<HashMap<String, String>>,
    columns: Vec<ColumnData>,
    report: NormalizationReport,
}

impl Normalizer {
    /// Binds every schema column to a header position.
    ///
    /// Headers match exactly first, then case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::SchemaMismatch`] listing every required column
    /// whose header is absent.
    pub fn new(schema: &Schema, headers: &StringRecord) -> Result<Self, SchemaError> {
        let mut header_indices = Vec::with_capacity(schema.columns.len());
        let mut missing = Vec::new();
        let mut absent = Vec::new();

        for spec in &schema.columns {
            let wanted = spec.source_header();
            let index = headers
                .iter()
                .position(|h| h.trim() == wanted)
                .or_else(|| {
                    headers
                        .iter()
                        .position(|h| h.trim().eq_ignore_ascii_case(wanted))
                });

            if index.is_none() {
                if spec.required {
                    missing.push(wanted.to_string());
                } else {
                    absent.push(spec.name.clone());
                }
            }
            header_indices.push(index);
        }

        if !missing.is_empty() {
            return Err(SchemaError::SchemaMismatch { missing });
        }

        for name in &absent {
            log::warn!("Optional column '{name}' not found in raw table; treating as missing");
        }

        Ok(Self {
            schema: schema.clone(),
            header_indices,
            synonyms: schema.columns.iter().map(ColumnSpec::synonym_index).collect(),
            columns: schema
                .columns
                .iter()
                .map(|spec| ColumnData::empty(spec.kind))
                .collect(),
            report: NormalizationReport {
                absent_columns: absent,
                ..NormalizationReport::default()
            },
        })
    }

    /// Converts one raw row and appends it to every column.
    ///
    /// A cell that is not valid UTF-8 is counted as unparseable and read as
    /// missing; the rest of the row is kept.
    pub fn push_row(&mut self, record: &ByteRecord) {
        for (((spec, index), synonyms), column) in self
            .schema
            .columns
            .iter()
            .zip(&self.header_indices)
            .zip(&self.synonyms)
            .zip(&mut self.columns)
        {
            let Some(index) = *index else {
                column.push_missing();
                continue;
            };
            match record.get(index).map(std::str::from_utf8) {
                Some(Ok(raw)) if !is_missing(raw) => {
                    push_value(spec, synonyms, column, raw, &mut self.report);
                }
                Some(Err(_)) => {
                    *self.report.unparseable.entry(spec.name.clone()).or_default() += 1;
                    column.push_missing();
                }
                _ => {
                    *self.report.missing.entry(spec.name.clone()).or_default() += 1;
                    column.push_missing();
                }
            }
        }
        self.report.rows += 1;
    }

    /// Finishes the load and returns the typed table.
    #[must_use]
    pub fn finish(self, snapshot_id: impl Into<String>) -> TypedTable {
        let len = usize::try_from(self.report.rows).unwrap_or(usize::MAX);
        TypedTable {
            snapshot_id: snapshot_id.into(),
            columns: self
                .schema
                .columns
                .iter()
                .cloned()
                .zip(self.columns)
                .map(|(spec, data)| TypedColumn { spec, data })
                .collect(),
            schema: self.schema,
            len,
            report: self.report,
        }
    }
}

fn push_value(
    spec: &ColumnSpec,
    synonyms: &HashMap<String, String>,
    column: &mut ColumnData,
    raw: &str,
    report: &mut NormalizationReport,
) {
    fn record<T>(parsed: Parsed<T>, name: &str, report: &mut NormalizationReport) -> Option<T> {
        match parsed {
            Parsed::Exact(v) => Some(v),
            Parsed::Coerced(v) => {
                *report.coerced.entry(name.to_string()).or_default() += 1;
                Some(v)
            }
            Parsed::Invalid => {
                *report.unparseable.entry(name.to_string()).or_default() += 1;
                None
            }
        }
    }

    match column {
        ColumnData::Text(v) => v.push(spec.canonicalize_with(raw, synonyms)),
        ColumnData::Categorical(c) => {
            c.push_raw(raw, |raw| spec.canonicalize_with(raw, synonyms));
        }
        ColumnData::Integer(v) => v.push(record(parse_integer(raw), &spec.name, report)),
        ColumnData::Float(v) => v.push(record(parse_float(raw), &spec.name, report)),
        ColumnData::Timestamp(v) => v.push(record(parse_timestamp(raw), &spec.name, report)),
    }
}

/// Normalizes an in-memory raw table.
///
/// # Errors
///
/// Returns [`SchemaError::SchemaMismatch`] if a required column is absent.
pub fn normalize(raw: &RawTable, schema: &Schema) -> Result<TypedTable, SchemaError> {
    let mut normalizer = Normalizer::new(schema, raw.headers())?;
    for row in raw.rows() {
        normalizer.push_row(row);
    }
    let table = normalizer.finish(raw.snapshot_id());
    log_summary(&table);
    Ok(table)
}

/// Normalizes a CSV stream without materializing the raw rows.
///
/// # Errors
///
/// Returns [`SchemaError`] if the CSV cannot be read or a required column
/// is absent.
pub fn normalize_reader<R: Read>(
    reader: R,
    snapshot_id: &str,
    schema: &Schema,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<TypedTable, SchemaError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = StringRecord::from_byte_record_lossy(csv_reader.byte_headers()?.clone());
    let mut normalizer = Normalizer::new(schema, &headers)?;

    progress.begin("Normalizing rows", None);
    let mut ticker = RowTicker::new(&**progress);
    let mut record = ByteRecord::new();
    while csv_reader.read_byte_record(&mut record)? {
        normalizer.push_row(&record);
        ticker.tick();
    }
    ticker.flush();

    let table = normalizer.finish(snapshot_id);
    progress.finish(format!("Normalized {} rows", table.len()));
    log_summary(&table);
    Ok(table)
}

fn log_summary(table: &TypedTable) {
    let report = table.report();
    log::info!(
        "Normalized {} rows ({} missing cells, {} unparseable cells, {} coerced cells)",
        report.rows,
        report.missing.values().sum::<u64>(),
        report.total_unparseable(),
        report.total_coerced(),
    );
    for (column, count) in &report.unparseable {
        log::debug!("  {column}: {count} unparseable");
    }
}
