//! Integrity validation.
//!
//! Applies a fixed, ordered list of row checks to a typed table and
//! projects the surviving rows into a [`CleanedView`]. Every dropped row is
//! counted under exactly one [`DropReason`]: the first check it fails.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use accident_risk_accident_models::AccidentSeverity;
use accident_risk_schema::descriptor::{END_TIME, ID, SEVERITY, START_TIME, STATE};
use accident_risk_schema::normalize::NormalizationReport;
use accident_risk_schema::progress::{ProgressCallback, RowTicker};
use accident_risk_schema::typed::TypedTable;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::config::{DuplicatePolicy, ValidationConfig};
use crate::view::CleanedView;

/// Bumped whenever the validation rules in this module change meaning.
pub const VALIDATOR_VERSION: &str = "1";

/// Why a row was excluded from the cleaned view, in check order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    /// The row repeats an `id` under the configured duplicate policy.
    Duplicate,
    /// `id`, `start_time`, `state`, or `severity` is missing or unparseable.
    MissingRequired,
    /// `end_time` is before `start_time`.
    TemporalInconsistency,
    /// `severity` is outside 1-4 or `state` is not a known code.
    OutOfDomain,
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Rows in the typed table.
    pub total_rows: u64,
    /// Rows in the cleaned view.
    pub kept_rows: u64,
    /// Rows dropped as duplicate ids.
    pub duplicates: u64,
    /// Rows dropped for a missing required field.
    pub missing_required: u64,
    /// Rows dropped because they end before they start.
    pub temporal_inconsistency: u64,
    /// Rows dropped for an out-of-domain severity or state.
    pub out_of_domain: u64,
    /// Out-of-domain values seen, per column and value, for auditing.
    pub out_of_domain_values: BTreeMap<String, BTreeMap<String, u64>>,
    /// What the normalizer could not read as declared.
    pub normalization: NormalizationReport,
    /// Version of the cleaned view produced alongside this report.
    pub version: String,
}

impl ValidationReport {
    /// Rows dropped across every check.
    #[must_use]
    pub const fn dropped_total(&self) -> u64 {
        self.duplicates + self.missing_required + self.temporal_inconsistency + self.out_of_domain
    }

    /// Rows dropped for one reason.
    #[must_use]
    pub const fn dropped(&self, reason: DropReason) -> u64 {
        match reason {
            DropReason::Duplicate => self.duplicates,
            DropReason::MissingRequired => self.missing_required,
            DropReason::TemporalInconsistency => self.temporal_inconsistency,
            DropReason::OutOfDomain => self.out_of_domain,
        }
    }

    fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::Duplicate => self.duplicates += 1,
            DropReason::MissingRequired => self.missing_required += 1,
            DropReason::TemporalInconsistency => self.temporal_inconsistency += 1,
            DropReason::OutOfDomain => self.out_of_domain += 1,
        }
    }
}

/// Version of the cleaned view derived from `table` under `config`.
#[must_use]
pub fn view_version(table: &TypedTable, config: &ValidationConfig) -> String {
    let rules = config.fingerprint();
    let schema = table.schema().fingerprint();
    let mut hasher = Sha256::new();
    for part in [table.snapshot_id(), VALIDATOR_VERSION, rules.as_str(), schema.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

/// Validates a typed table and builds the cleaned view.
///
/// The table is never modified; surviving rows are copied into the view in
/// their original order.
#[must_use]
pub fn validate(
    table: &TypedTable,
    config: &ValidationConfig,
    progress: &Arc<dyn ProgressCallback>,
) -> (CleanedView, ValidationReport) {
    let len = table.len();
    let ids = table.text(ID).unwrap_or_default();
    let starts = table.timestamp(START_TIME).unwrap_or_default();
    let ends = table.timestamp(END_TIME).unwrap_or_default();
    let severities = table.integer(SEVERITY).unwrap_or_default();
    let states = table.categorical(STATE);

    let known_states = config
        .known_states
        .iter()
        .map(|s| s.trim().to_uppercase())
        .collect::<HashSet<_>>();
    // Per dictionary code, whether the state label is known.
    let state_known = states.map_or_else(Vec::new, |c| {
        c.labels()
            .iter()
            .map(|label| known_states.contains(&label.to_uppercase()))
            .collect::<Vec<_>>()
    });

    let repeated = match config.duplicate_policy {
        DuplicatePolicy::KeepFirst => HashSet::new(),
        DuplicatePolicy::DropAll => {
            let mut counts = HashMap::<&str, u32>::new();
            for id in ids.iter().flatten() {
                *counts.entry(id.as_str()).or_default() += 1;
            }
            counts
                .into_iter()
                .filter(|(_, n)| *n > 1)
                .map(|(id, _)| id)
                .collect::<HashSet<_>>()
        }
    };

    let version = view_version(table, config);
    let mut report = ValidationReport {
        total_rows: len as u64,
        kept_rows: 0,
        duplicates: 0,
        missing_required: 0,
        temporal_inconsistency: 0,
        out_of_domain: 0,
        out_of_domain_values: BTreeMap::new(),
        normalization: table.report().clone(),
        version: version.clone(),
    };

    progress.begin("Validating rows", Some(len as u64));
    let mut ticker = RowTicker::new(&**progress);

    let mut seen = HashSet::<&str>::with_capacity(len);
    let mut kept = Vec::with_capacity(len);

    for row in 0..len {
        ticker.tick();

        let id = ids.get(row).and_then(Option::as_deref);
        let start = starts.get(row).copied().flatten();
        let end = ends.get(row).copied().flatten();
        let severity = severities.get(row).copied().flatten();
        let state = states.and_then(|c| c.code(row));

        let duplicate = id.is_some_and(|id| match config.duplicate_policy {
            DuplicatePolicy::KeepFirst => !seen.insert(id),
            DuplicatePolicy::DropAll => repeated.contains(id),
        });

        let reason = if duplicate {
            Some(DropReason::Duplicate)
        } else if id.is_none() || start.is_none() || state.is_none() || severity.is_none() {
            Some(DropReason::MissingRequired)
        } else if matches!((start, end), (Some(s), Some(e)) if e < s) {
            Some(DropReason::TemporalInconsistency)
        } else {
            let mut out_of_domain = false;
            if let Some(s) = severity.filter(|s| AccidentSeverity::from_value(*s).is_err()) {
                out_of_domain = true;
                note_value(&mut report, SEVERITY, &s.to_string());
            }
            if let Some(code) =
                state.filter(|c| !state_known.get(*c as usize).copied().unwrap_or(false))
            {
                out_of_domain = true;
                let label = states.and_then(|c| c.label(code)).unwrap_or_default();
                note_value(&mut report, STATE, label);
            }
            out_of_domain.then_some(DropReason::OutOfDomain)
        };

        match reason {
            Some(reason) => report.record(reason),
            None => kept.push(row),
        }
    }

    ticker.flush();
    report.kept_rows = kept.len() as u64;

    log::info!(
        "Validated {} rows: kept {}, dropped {} (duplicates {}, missing required {}, temporal {}, out of domain {})",
        report.total_rows,
        report.kept_rows,
        report.dropped_total(),
        report.duplicates,
        report.missing_required,
        report.temporal_inconsistency,
        report.out_of_domain,
    );
    progress.finish(format!("Kept {} of {} rows", report.kept_rows, report.total_rows));

    let view = CleanedView::new(table.gather(&kept), version);
    (view, report)
}

fn note_value(report: &mut ValidationReport, column: &str, value: &str) {
    *report
        .out_of_domain_values
        .entry(column.to_string())
        .or_default()
        .entry(value.to_string())
        .or_default() += 1;
}
