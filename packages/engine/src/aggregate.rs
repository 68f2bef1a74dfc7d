//! Single-pass stratified aggregation.
//!
//! Scans a cleaned view once, encoding each matching row's dimension values
//! as a tuple of integer codes and folding it into a running accumulator.
//! Peak memory is bounded by the number of distinct tuples, not the number
//! of rows. Tuples are decoded and sorted only at the end.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use accident_risk_accident_models::AccidentSeverity;
use accident_risk_engine_models::{Condition, DimensionValue, RowFilter};
use accident_risk_schema::descriptor::ColumnKind;
use accident_risk_schema::progress::PROGRESS_BATCH;
use chrono::NaiveDateTime;

use crate::EngineError;
use crate::dimension::{DimensionSource, ResolvedDimension, resolve_one};
use crate::view::{CleanedView, KeyColumn};

/// Shared flag that asks running aggregations to stop.
///
/// Checked between row batches; a cancelled pass returns
/// [`EngineError::Cancelled`] and produces nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns [`EngineError::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] if the flag is set.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}

/// One non-empty stratum with its running totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    /// Decoded dimension values, in key order.
    pub key: Vec<DimensionValue>,
    /// Matching rows. Always at least 1.
    pub count: u64,
    /// Sum of the rows' severities.
    pub severity_sum: i64,
    /// Rows with severity 3 or 4.
    pub severe_count: u64,
}

/// Result of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    /// Resolved dimension names, in key order.
    pub dimensions: Vec<String>,
    /// Non-empty strata, strictly increasing by key.
    pub groups: Vec<Group>,
    /// Earliest and latest `start_time` among matching rows.
    pub window: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl Aggregation {
    /// Total matching rows across all strata.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.groups.iter().map(|g| g.count).sum()
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    count: u64,
    severity_sum: i64,
    severe_count: u64,
}

impl Accumulator {
    fn add(&mut self, severity: Option<i64>) {
        self.count += 1;
        if let Some(severity) = severity {
            self.severity_sum += severity;
            if AccidentSeverity::from_value(severity).is_ok_and(AccidentSeverity::is_severe) {
                self.severe_count += 1;
            }
        }
    }
}

enum Compiled<'a> {
    Codes(KeyColumn<'a>, HashSet<Option<i64>>),
    Range(KeyColumn<'a>, i64, i64),
    Window(
        &'a [Option<NaiveDateTime>],
        Option<NaiveDateTime>,
        Option<NaiveDateTime>,
    ),
}

impl Compiled<'_> {
    fn matches(&self, row: usize) -> bool {
        match self {
            Self::Codes(column, accepted) => accepted.contains(&column.code(row)),
            Self::Range(column, min, max) => column
                .code(row)
                .is_some_and(|v| (*min..=*max).contains(&v)),
            Self::Window(starts, from, to) => starts
                .get(row)
                .copied()
                .flatten()
                .is_some_and(|ts| from.is_none_or(|f| ts >= f) && to.is_none_or(|t| ts < t)),
        }
    }
}

/// A filter bound to one view.
struct CompiledFilter<'a> {
    conditions: Vec<Compiled<'a>>,
    canonical: RowFilter,
}

impl CompiledFilter<'_> {
    fn matches(&self, row: usize) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

fn resolve_filter_dimension<'a>(
    view: &'a CleanedView,
    name: &str,
) -> Result<(ResolvedDimension, KeyColumn<'a>), EngineError> {
    let unknown = || EngineError::UnknownDimension {
        names: vec![name.to_string()],
    };
    let dimension = resolve_one(view, name).ok_or_else(unknown)?;
    let column = view.key_column(&dimension).ok_or_else(unknown)?;
    Ok((dimension, column))
}

fn compile_filter<'a>(
    view: &'a CleanedView,
    filter: &RowFilter,
) -> Result<CompiledFilter<'a>, EngineError> {
    let mut conditions = Vec::with_capacity(filter.conditions().len());
    let mut canonical = RowFilter::all();

    for condition in filter.conditions() {
        match condition {
            Condition::Equals { dimension, value } => {
                let (resolved, column) = resolve_filter_dimension(view, dimension)?;
                let (value, code) = view.canonical_literal(&resolved, value);
                conditions.push(Compiled::Codes(column, code.into_iter().collect()));
                canonical = canonical.with(Condition::Equals {
                    dimension: resolved.name,
                    value,
                });
            }
            Condition::OneOf { dimension, values } => {
                let (resolved, column) = resolve_filter_dimension(view, dimension)?;
                let mut accepted = HashSet::with_capacity(values.len());
                let mut canonical_values = Vec::with_capacity(values.len());
                for value in values {
                    let (value, code) = view.canonical_literal(&resolved, value);
                    accepted.extend(code);
                    canonical_values.push(value);
                }
                canonical_values.sort();
                canonical_values.dedup();
                conditions.push(Compiled::Codes(column, accepted));
                canonical = canonical.with(Condition::OneOf {
                    dimension: resolved.name,
                    values: canonical_values,
                });
            }
            Condition::Between { dimension, min, max } => {
                let (resolved, column) = resolve_filter_dimension(view, dimension)?;
                let numeric = match resolved.source {
                    DimensionSource::Derived(key) => !key.is_labelled(),
                    DimensionSource::Column(kind) => kind == ColumnKind::Integer,
                };
                if !numeric {
                    return Err(EngineError::InvalidFilter {
                        message: format!(
                            "range condition on '{}', which is not numeric",
                            resolved.name
                        ),
                    });
                }
                conditions.push(Compiled::Range(column, *min, *max));
                canonical = canonical.with(Condition::Between {
                    dimension: resolved.name,
                    min: *min,
                    max: *max,
                });
            }
            Condition::StartTime { from, to } => {
                conditions.push(Compiled::Window(view.start_times(), *from, *to));
                canonical = canonical.with(condition.clone());
            }
        }
    }

    Ok(CompiledFilter {
        conditions,
        canonical,
    })
}

/// Rewrites a filter in the form the view stores its values in: dimension
/// names resolved, labels canonicalized, value lists sorted.
///
/// Two filters that select the same rows through different spellings
/// produce the same canonical filter and so the same cache key.
///
/// # Errors
///
/// Returns [`EngineError`] if a condition names an unknown dimension or
/// does not fit its dimension's type.
pub fn canonical_filter(view: &CleanedView, filter: &RowFilter) -> Result<RowFilter, EngineError> {
    compile_filter(view, filter).map(|compiled| compiled.canonical)
}

/// Groups the rows of `view` that match `filter` by `dimensions`.
///
/// Rows with a missing value for a dimension are grouped under
/// [`DimensionValue::Missing`]. Strata with no rows are never produced.
///
/// # Errors
///
/// * [`EngineError::Cancelled`] if `cancel` is set during the pass
/// * [`EngineError::UnknownDimension`] / [`EngineError::InvalidFilter`] for
///   filters that do not fit the view
pub fn aggregate(
    view: &CleanedView,
    dimensions: &[ResolvedDimension],
    filter: &RowFilter,
    cancel: &CancelFlag,
) -> Result<Aggregation, EngineError> {
    scan(view, dimensions, filter, cancel, PROGRESS_BATCH, |_| {})
}

/// The aggregation pass, checking `cancel` and calling `between_batches`
/// with the current row every `batch` rows.
fn scan(
    view: &CleanedView,
    dimensions: &[ResolvedDimension],
    filter: &RowFilter,
    cancel: &CancelFlag,
    batch: usize,
    mut between_batches: impl FnMut(usize),
) -> Result<Aggregation, EngineError> {
    cancel.check()?;
    let batch = batch.max(1);

    let columns = dimensions
        .iter()
        .map(|d| {
            view.key_column(d)
                .ok_or_else(|| EngineError::UnknownDimension {
                    names: vec![d.name.clone()],
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let filter = compile_filter(view, filter)?;
    let starts = view.start_times();
    let severities = view.severities();

    let mut groups = HashMap::<Box<[Option<i64>]>, Accumulator>::new();
    let mut window: Option<(NaiveDateTime, NaiveDateTime)> = None;
    let mut codes = Vec::with_capacity(columns.len());

    for row in 0..view.len() {
        if row > 0 && row % batch == 0 {
            between_batches(row);
            cancel.check()?;
        }
        if !filter.matches(row) {
            continue;
        }

        codes.clear();
        codes.extend(columns.iter().map(|c| c.code(row)));
        let severity = severities.get(row).copied().flatten();
        match groups.get_mut(codes.as_slice()) {
            Some(acc) => acc.add(severity),
            None => {
                let mut acc = Accumulator::default();
                acc.add(severity);
                groups.insert(codes.clone().into_boxed_slice(), acc);
            }
        }

        if let Some(ts) = starts.get(row).copied().flatten() {
            window = Some(window.map_or((ts, ts), |(lo, hi)| (lo.min(ts), hi.max(ts))));
        }
    }

    cancel.check()?;

    let mut groups = groups
        .into_iter()
        .map(|(codes, acc)| Group {
            key: codes
                .iter()
                .zip(&columns)
                .map(|(code, column)| column.decode(*code))
                .collect(),
            count: acc.count,
            severity_sum: acc.severity_sum,
            severe_count: acc.severe_count,
        })
        .collect::<Vec<_>>();
    groups.sort_unstable_by(|a, b| a.key.cmp(&b.key));

    log::debug!(
        "Aggregated {} strata over [{}] ({} filter)",
        groups.len(),
        dimensions
            .iter()
            .map(|d| d.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        filter.canonical.cache_key(),
    );

    Ok(Aggregation {
        dimensions: dimensions.iter().map(|d| d.name.clone()).collect(),
        groups,
        window,
    })
}
