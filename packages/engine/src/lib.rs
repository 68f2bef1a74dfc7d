#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! The risk computation engine.
//!
//! Pipeline, leaf first:
//!
//! 1. [`validate::validate`] turns a typed table into a read-only
//!    [`view::CleanedView`] plus a [`validate::ValidationReport`].
//! 2. [`dimension::resolve`] checks requested dimension names against the
//!    view and the reserved derived temporal keys.
//! 3. [`aggregate::aggregate`] groups the view in one pass.
//! 4. [`metrics::compute_rates`] turns grouped counts into rate records.
//! 5. [`cache::RateCache`] memoizes whole result sets per view version.
//!
//! [`summary::summarize`] reports a dataset overview straight from the view.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod dimension;
pub mod exposure;
pub mod metrics;
pub mod summary;
pub mod validate;
pub mod view;

use accident_risk_schema::SchemaError;

/// Errors that can occur while computing risk metrics.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// One or more requested dimensions do not exist.
    #[error("Unknown dimensions: {}", names.join(", "))]
    UnknownDimension {
        /// Every requested name that failed to resolve.
        names: Vec<String>,
    },

    /// A dimension was requested more than once.
    #[error("Dimension '{name}' requested more than once")]
    DuplicateDimension {
        /// The repeated dimension, as resolved.
        name: String,
    },

    /// A filter condition does not fit the dimension it names.
    #[error("Invalid filter: {message}")]
    InvalidFilter {
        /// Description of what went wrong.
        message: String,
    },

    /// The exposure table could not be loaded.
    #[error("Exposure table error: {message}")]
    Exposure {
        /// Description of what went wrong.
        message: String,
    },

    /// The computation was cancelled before it completed.
    #[error("Computation cancelled")]
    Cancelled,

    /// The cache was used after [`cache::RateCache::close`].
    #[error("Rate cache is closed")]
    Closed,

    /// The persistent rate store failed.
    #[error("Rate store error: {message}")]
    Store {
        /// Description of what went wrong.
        message: String,
    },

    /// Configuration could not be loaded.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },

    /// A blocking worker task failed.
    #[error("Task join error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Schema or normalization error.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// CSV reading failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing failed.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
