//! Risk metrics: rates, relative risk, and shares.
//!
//! Turns grouped counts into [`RateRecord`]s. A stratum without a matching
//! denominator gets `rate: None`, never zero, and sparse strata are flagged
//! low-confidence whether or not a rate could be computed.

use std::collections::{BTreeMap, HashSet};

use accident_risk_engine_models::{DimensionValue, RateRecord};

use crate::EngineError;
use crate::aggregate::Aggregation;
use crate::config::MetricsConfig;
use crate::exposure::ExposureTable;

/// How rates are computed for one aggregation.
enum Denominator<'a> {
    /// Look up each stratum's exposure at these key positions.
    Exposure(&'a ExposureTable, Vec<usize>),
    /// Incidents per calendar unit.
    PerUnit,
    /// No rate can be computed.
    Undefined,
}

fn project(key: &[DimensionValue], positions: &[usize]) -> Vec<DimensionValue> {
    positions.iter().map(|&i| key[i].clone()).collect()
}

fn denominator<'a>(
    aggregation: &Aggregation,
    exposure: Option<&'a ExposureTable>,
    config: &MetricsConfig,
) -> Denominator<'a> {
    match exposure {
        Some(table) => {
            let positions = table
                .dimensions()
                .iter()
                .map(|d| aggregation.dimensions.iter().position(|a| a == d))
                .collect::<Option<Vec<_>>>();
            positions.map_or_else(
                || {
                    log::warn!(
                        "Exposure dimensions [{}] are not a subset of [{}]; rates are undefined",
                        table.dimensions().join(", "),
                        aggregation.dimensions.join(", "),
                    );
                    Denominator::Undefined
                },
                |positions| Denominator::Exposure(table, positions),
            )
        }
        None if config.time_basis.is_some() => Denominator::PerUnit,
        None => Denominator::Undefined,
    }
}

/// Computes rate records for an aggregation.
///
/// * With an exposure table, `rate = count / exposure × scale`, looked up
///   by projecting each stratum's key onto the table's dimensions.
///   Strata without a matching entry have no rate.
/// * With a time basis, rates are further divided by the number of
///   calendar units in the matched rows' window. Without an exposure table
///   the rate is then simply incidents per unit.
/// * Relative risk compares each rate to the baseline over the same rows:
///   total matched incidents over total distinct matched exposure.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_rates(
    aggregation: &Aggregation,
    exposure: Option<&ExposureTable>,
    config: &MetricsConfig,
) -> Vec<RateRecord> {
    let total = aggregation.total();
    let units = match (config.time_basis, aggregation.window) {
        (Some(basis), Some((first, last))) => basis.units(first, last) as f64,
        _ => 1.0,
    };
    let denominator = denominator(aggregation, exposure, config);

    let exposures = aggregation
        .groups
        .iter()
        .map(|g| match &denominator {
            Denominator::Exposure(table, positions) => table.get(&project(&g.key, positions)),
            Denominator::PerUnit | Denominator::Undefined => None,
        })
        .collect::<Vec<_>>();

    let baseline = match &denominator {
        Denominator::Exposure(_, positions) => {
            let mut matched_count = 0_u64;
            let mut matched_exposure = 0.0;
            let mut seen = HashSet::new();
            for (group, exposure) in aggregation.groups.iter().zip(&exposures) {
                if let Some(e) = exposure {
                    matched_count += group.count;
                    if seen.insert(project(&group.key, positions)) {
                        matched_exposure += e;
                    }
                }
            }
            (matched_exposure > 0.0)
                .then(|| matched_count as f64 / matched_exposure * config.scale / units)
        }
        Denominator::PerUnit => (total > 0).then(|| total as f64 / units),
        Denominator::Undefined => None,
    };

    aggregation
        .groups
        .iter()
        .zip(exposures)
        .map(|(group, exposure)| {
            let count = group.count;
            let rate = match &denominator {
                Denominator::Exposure(..) => {
                    exposure.map(|e| count as f64 / e * config.scale / units)
                }
                Denominator::PerUnit => Some(count as f64 / units),
                Denominator::Undefined => None,
            };
            RateRecord {
                key: group.key.clone(),
                count,
                exposure,
                rate,
                relative_risk: rate
                    .zip(baseline)
                    .filter(|(_, b)| *b > 0.0)
                    .map(|(r, b)| r / b),
                share: count as f64 / total as f64,
                avg_severity: group.severity_sum as f64 / count as f64,
                severe_share: group.severe_count as f64 / count as f64,
                low_confidence: count < config.min_sample,
                rank: None,
                partition_share: None,
            }
        })
        .collect()
}

/// Ranks strata by count within each partition and keeps the `n` largest.
///
/// Partitions are the distinct projections of the records' keys onto
/// `partition`. Within a partition, ties in count keep key order. Each kept
/// record carries its `rank` and its `partition_share` of the whole
/// partition's count, truncated members included. Output is ordered by
/// partition key, then rank.
///
/// # Errors
///
/// Returns [`EngineError::UnknownDimension`] if a partition dimension is
/// not part of `dimensions`.
#[allow(clippy::cast_precision_loss)]
pub fn top_per_partition<S: AsRef<str>>(
    dimensions: &[String],
    records: &[RateRecord],
    partition: &[S],
    n: usize,
) -> Result<Vec<RateRecord>, EngineError> {
    let mut positions = Vec::with_capacity(partition.len());
    let mut unknown = Vec::new();
    for name in partition {
        match dimensions
            .iter()
            .position(|d| d.eq_ignore_ascii_case(name.as_ref()))
        {
            Some(i) => positions.push(i),
            None => unknown.push(name.as_ref().to_string()),
        }
    }
    if !unknown.is_empty() {
        return Err(EngineError::UnknownDimension { names: unknown });
    }

    let mut partitions = BTreeMap::<Vec<DimensionValue>, Vec<&RateRecord>>::new();
    for record in records {
        partitions
            .entry(project(&record.key, &positions))
            .or_default()
            .push(record);
    }

    Ok(partitions
        .into_values()
        .flat_map(|mut members| {
            let total = members.iter().map(|r| r.count).sum::<u64>() as f64;
            members.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
            members
                .into_iter()
                .take(n)
                .zip(1_u32..)
                .map(move |(record, rank)| RateRecord {
                    rank: Some(rank),
                    partition_share: Some(record.count as f64 / total),
                    ..record.clone()
                })
        })
        .collect())
}
