//! In-memory raw table handed over by the data acquisition side.
//!
//! The engine never mutates a [`RawTable`]; it is read once by the
//! normalizer. For snapshots too large to hold as raw rows, stream the CSV
//! straight through [`crate::normalize::normalize_reader`] instead.

use std::io::Read;
use std::path::Path;

use csv::{ByteRecord, StringRecord};
use sha2::{Digest as _, Sha256};

use crate::SchemaError;

/// A header row plus undecoded cells, identified by a snapshot id.
///
/// Cells stay as bytes so that a stray non-UTF-8 byte costs one cell, not
/// the load.
#[derive(Debug, Clone)]
pub struct RawTable {
    snapshot_id: String,
    headers: StringRecord,
    rows: Vec<ByteRecord>,
}

impl RawTable {
    /// Builds a table from literal headers and rows.
    #[must_use]
    pub fn new<H, R, C>(snapshot_id: impl Into<String>, headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: AsRef<str>,
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: AsRef<[u8]>,
    {
        Self {
            snapshot_id: snapshot_id.into(),
            headers: headers.into_iter().collect(),
            rows: rows.into_iter().map(|row| row.into_iter().collect()).collect(),
        }
    }

    /// Reads a whole CSV document into memory.
    ///
    /// Rows with a different number of fields than the header are kept;
    /// missing trailing cells read as empty. Headers are decoded lossily.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the CSV cannot be read.
    pub fn from_reader<R: Read>(
        snapshot_id: impl Into<String>,
        reader: R,
    ) -> Result<Self, SchemaError> {
        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = StringRecord::from_byte_record_lossy(csv_reader.byte_headers()?.clone());
        let rows = csv_reader
            .byte_records()
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            snapshot_id: snapshot_id.into(),
            headers,
            rows,
        })
    }

    /// Identifier of the snapshot this table was read from.
    #[must_use]
    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    /// The header row.
    #[must_use]
    pub const fn headers(&self) -> &StringRecord {
        &self.headers
    }

    /// All data rows in original order.
    #[must_use]
    pub fn rows(&self) -> &[ByteRecord] {
        &self.rows
    }

    /// Number of data rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Computes a snapshot id for a file from a SHA-256 of its contents.
///
/// The file is hashed in fixed-size chunks and never loaded whole.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn snapshot_id_for_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 1 << 16];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
