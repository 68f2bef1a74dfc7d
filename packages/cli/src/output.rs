//! Rendering of rate sets and reports.

use std::io::Write;
use std::path::{Path, PathBuf};

use accident_risk_engine::validate::ValidationReport;
use accident_risk_engine_models::{RateRecord, SummaryReport};
use serde::Serialize;

/// Output encoding for rate sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// One row per stratum, one column per dimension.
    Csv,
    /// Pretty-printed JSON array of result sets.
    Json,
}

/// One stratification's records with the context needed to read them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSet {
    /// Cleaned view version.
    pub version: String,
    /// Canonical filter key.
    pub filter: String,
    /// Dimension names, matching each record's key.
    pub dimensions: Vec<String>,
    /// The strata.
    pub records: Vec<RateRecord>,
}

fn optional(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn write_csv<W: Write>(set: &ResultSet, writer: W) -> Result<(), csv::Error> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let ranked = set.records.iter().any(|r| r.rank.is_some());

    let mut header = set.dimensions.clone();
    header.extend(
        [
            "count",
            "exposure",
            "rate",
            "relative_risk",
            "share",
            "avg_severity",
            "severe_share",
            "low_confidence",
        ]
        .map(str::to_string),
    );
    if ranked {
        header.extend(["rank", "partition_share"].map(str::to_string));
    }
    csv_writer.write_record(&header)?;

    for record in &set.records {
        let mut row = record.key.iter().map(ToString::to_string).collect::<Vec<_>>();
        row.push(record.count.to_string());
        row.push(optional(record.exposure));
        row.push(optional(record.rate));
        row.push(optional(record.relative_risk));
        row.push(record.share.to_string());
        row.push(record.avg_severity.to_string());
        row.push(record.severe_share.to_string());
        row.push(record.low_confidence.to_string());
        if ranked {
            row.push(record.rank.map(|r| r.to_string()).unwrap_or_default());
            row.push(optional(record.partition_share));
        }
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Target file for one of `count` CSV sets written to `path`: the path
/// itself for a single set, else the stem suffixed with the dimensions.
fn csv_path(path: &Path, set: &ResultSet, count: usize) -> PathBuf {
    if count == 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map_or_else(|| "rates".into(), |s| s.to_string_lossy());
    let suffix = if set.dimensions.is_empty() {
        "total".to_string()
    } else {
        set.dimensions.join("_")
    };
    path.with_file_name(format!("{stem}-{suffix}.csv"))
}

/// Writes result sets to `path`, or stdout when `None`.
pub fn write_sets(
    sets: &[ResultSet],
    format: Format,
    path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    match (format, path) {
        (Format::Json, Some(path)) => {
            let file = std::io::BufWriter::new(std::fs::File::create(path)?);
            serde_json::to_writer_pretty(file, sets)?;
            log::info!("Wrote {} result sets to {}", sets.len(), path.display());
        }
        (Format::Json, None) => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            serde_json::to_writer_pretty(&mut lock, sets)?;
            writeln!(lock)?;
        }
        (Format::Csv, Some(path)) => {
            for set in sets {
                let target = csv_path(path, set, sets.len());
                write_csv(set, std::fs::File::create(&target)?)?;
                log::info!("Wrote {} strata to {}", set.records.len(), target.display());
            }
        }
        (Format::Csv, None) => {
            for (i, set) in sets.iter().enumerate() {
                if i > 0 {
                    println!();
                }
                write_csv(set, std::io::stdout().lock())?;
            }
        }
    }
    Ok(())
}

/// Prints a validation report as a table.
pub fn print_validation(report: &ValidationReport) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "View version      {}", report.version)?;
    writeln!(out, "Rows read         {}", report.total_rows)?;
    writeln!(out, "Rows kept         {}", report.kept_rows)?;
    writeln!(out, "Dropped")?;
    writeln!(out, "  duplicates      {}", report.duplicates)?;
    writeln!(out, "  missing fields  {}", report.missing_required)?;
    writeln!(out, "  end < start     {}", report.temporal_inconsistency)?;
    writeln!(out, "  out of domain   {}", report.out_of_domain)?;

    for (column, values) in &report.out_of_domain_values {
        for (value, count) in values {
            writeln!(out, "    {column}={value:<12} {count}")?;
        }
    }

    let normalization = &report.normalization;
    if !normalization.missing.is_empty() {
        writeln!(out, "Missing values")?;
        for (column, count) in &normalization.missing {
            writeln!(
                out,
                "  {column:<20} {count:>10} {:>7.2}%",
                normalization.missing_percentage(column)
            )?;
        }
    }
    if normalization.total_unparseable() > 0 || normalization.total_coerced() > 0 {
        writeln!(out, "Normalization")?;
        for (column, count) in &normalization.unparseable {
            writeln!(out, "  unparseable {column:<20} {count}")?;
        }
        for (column, count) in &normalization.coerced {
            writeln!(out, "  coerced     {column:<20} {count}")?;
        }
    }
    for column in &normalization.absent_columns {
        writeln!(out, "  absent column {column}")?;
    }
    Ok(())
}

/// Prints a summary report as a table.
pub fn print_summary(report: &SummaryReport) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "Incidents         {}", report.total_incidents)?;
    if let (Some(first), Some(last)) = (report.first_start, report.last_start) {
        writeln!(out, "Date range        {first} .. {last}")?;
    }
    writeln!(out, "States covered    {}", report.states_covered)?;
    writeln!(out)?;

    writeln!(out, "{:<8} {:>12}", "STATE", "INCIDENTS")?;
    writeln!(out, "{}", "-".repeat(21))?;
    for state in &report.top_states {
        writeln!(out, "{:<8} {:>12}", state.state, state.count)?;
    }
    writeln!(out)?;

    writeln!(out, "{:<8} {:>12} {:>8}", "SEVERITY", "INCIDENTS", "PERCENT")?;
    writeln!(out, "{}", "-".repeat(30))?;
    for share in &report.severity_distribution {
        writeln!(
            out,
            "{:<8} {:>12} {:>7.2}%",
            share.severity, share.count, share.percentage
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use accident_risk_engine_models::DimensionValue;

    use super::*;

    fn set(dimensions: &[&str]) -> ResultSet {
        ResultSet {
            version: "v".to_string(),
            filter: "*".to_string(),
            dimensions: dimensions.iter().map(ToString::to_string).collect(),
            records: vec![RateRecord {
                key: vec![DimensionValue::from("CA"), DimensionValue::Missing],
                count: 4,
                exposure: Some(2.0),
                rate: Some(2.0),
                relative_risk: None,
                share: 1.0,
                avg_severity: 1.5,
                severe_share: 0.25,
                low_confidence: true,
                rank: None,
                partition_share: None,
            }],
        }
    }

    #[test]
    fn renders_csv_rows() {
        let mut buf = Vec::new();
        write_csv(&set(&["state", "weather_condition"]), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[0],
            "state,weather_condition,count,exposure,rate,relative_risk,share,avg_severity,severe_share,low_confidence"
        );
        assert_eq!(lines[1], "CA,,4,2,2,,1,1.5,0.25,true");
    }

    #[test]
    fn renders_rank_columns_for_ranked_sets() {
        let mut ranked = set(&["state", "weather_condition"]);
        ranked.records[0].rank = Some(1);
        ranked.records[0].partition_share = Some(0.8);

        let mut buf = Vec::new();
        write_csv(&ranked, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines = text.lines().collect::<Vec<_>>();
        assert!(lines[0].ends_with(",low_confidence,rank,partition_share"));
        assert!(lines[1].ends_with(",true,1,0.8"));
    }

    #[test]
    fn names_one_csv_file_per_set() {
        let path = Path::new("out/rates.csv");
        assert_eq!(csv_path(path, &set(&["state"]), 1), PathBuf::from("out/rates.csv"));
        assert_eq!(
            csv_path(path, &set(&["state", "hour"]), 2),
            PathBuf::from("out/rates-state_hour.csv")
        );
        assert_eq!(csv_path(path, &set(&[]), 2), PathBuf::from("out/rates-total.csv"));
    }
}
