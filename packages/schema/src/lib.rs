#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Schema descriptors and the raw-to-typed normalizer.
//!
//! A [`descriptor::Schema`] declares which raw header feeds each logical
//! column, what type it parses as, and how categorical spellings are
//! folded. [`normalize::normalize`] applies a schema to a
//! [`raw::RawTable`] and produces a columnar [`typed::TypedTable`].

pub mod canonical;
pub mod descriptor;
pub mod normalize;
pub mod parsing;
pub mod progress;
pub mod raw;
pub mod typed;

/// Errors that can occur while loading schemas or normalizing raw data.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// One or more required columns are absent from the raw table.
    #[error("Schema mismatch: missing required columns: {}", missing.join(", "))]
    SchemaMismatch {
        /// Raw headers that were expected but not found.
        missing: Vec<String>,
    },

    /// The schema descriptor itself is inconsistent.
    #[error("Invalid schema: {message}")]
    InvalidSchema {
        /// Description of what went wrong.
        message: String,
    },

    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSV reading failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
