//! Dataset-level summary of a cleaned view.

use accident_risk_accident_models::AccidentSeverity;
use accident_risk_engine_models::{SeverityShare, StateCount, SummaryReport};
use chrono::NaiveDateTime;

use crate::view::CleanedView;

/// Summarizes a cleaned view in one pass: incident total, date range,
/// state coverage, the `top_states` busiest states, and the severity
/// distribution.
///
/// Top states are ordered by count descending, ties by state code.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize(view: &CleanedView, top_states: usize) -> SummaryReport {
    let states = view.states();
    let labels = states.map_or(0, |s| s.labels().len());
    let mut state_counts = vec![0_u64; labels];
    let mut severity_counts = [0_u64; 4];
    let mut first_start: Option<NaiveDateTime> = None;
    let mut last_start: Option<NaiveDateTime> = None;

    let starts = view.start_times();
    let severities = view.severities();
    for row in 0..view.len() {
        if let Some(start) = starts.get(row).copied().flatten() {
            first_start = Some(first_start.map_or(start, |f| f.min(start)));
            last_start = Some(last_start.map_or(start, |l| l.max(start)));
        }
        if let Some(slot) = states
            .and_then(|s| s.code(row))
            .and_then(|code| state_counts.get_mut(code as usize))
        {
            *slot += 1;
        }
        if let Some(severity) = severities
            .get(row)
            .copied()
            .flatten()
            .and_then(|v| AccidentSeverity::from_value(v).ok())
        {
            severity_counts[usize::from(severity.value() - 1)] += 1;
        }
    }

    let mut ranked = states
        .map(|s| {
            s.labels()
                .iter()
                .zip(&state_counts)
                .filter(|(_, count)| **count > 0)
                .map(|(state, &count)| StateCount {
                    state: state.clone(),
                    count,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let states_covered = ranked.len();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.state.cmp(&b.state)));
    ranked.truncate(top_states);

    let total = view.len() as u64;
    let severity_distribution = AccidentSeverity::all()
        .iter()
        .zip(severity_counts)
        .map(|(severity, count)| SeverityShare {
            severity: severity.value(),
            count,
            percentage: if total == 0 {
                0.0
            } else {
                count as f64 / total as f64 * 100.0
            },
        })
        .collect();

    log::debug!(
        "Summarized {total} incidents across {states_covered} states (view {})",
        view.version()
    );

    SummaryReport {
        version: view.version().to_string(),
        total_incidents: total,
        first_start,
        last_start,
        states_covered,
        top_states: ranked,
        severity_distribution,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::view::test_view;

    #[test]
    fn summarizes_test_view() {
        let view = test_view();
        let report = summarize(&view, 10);

        assert_eq!(report.total_incidents, 5);
        assert_eq!(report.version, view.version());
        assert_eq!(
            report.first_start,
            NaiveDate::from_ymd_opt(2021, 3, 7).and_then(|d| d.and_hms_opt(8, 15, 0))
        );
        assert_eq!(
            report.last_start,
            NaiveDate::from_ymd_opt(2022, 1, 16).and_then(|d| d.and_hms_opt(6, 30, 0))
        );
        assert_eq!(report.states_covered, 2);
        assert_eq!(
            report.top_states,
            vec![
                StateCount {
                    state: "TX".to_string(),
                    count: 3
                },
                StateCount {
                    state: "CA".to_string(),
                    count: 2
                },
            ]
        );

        let counts = report
            .severity_distribution
            .iter()
            .map(|s| (s.severity, s.count))
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![(1, 3), (2, 1), (3, 1), (4, 0)]);
        let percent = report
            .severity_distribution
            .iter()
            .map(|s| s.percentage)
            .sum::<f64>();
        assert!((percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn truncates_top_states() {
        let report = summarize(&test_view(), 1);
        assert_eq!(report.top_states.len(), 1);
        assert_eq!(report.top_states[0].state, "TX");
        assert_eq!(report.states_covered, 2);
    }
}
