//! Snapshot loading: schema, normalization, and validation.

use std::path::Path;

use accident_risk_cli_utils::{IndicatifProgress, MultiProgress};
use accident_risk_engine::config::ValidationConfig;
use accident_risk_engine::validate::{ValidationReport, validate};
use accident_risk_engine::view::CleanedView;
use accident_risk_schema::SchemaError;
use accident_risk_schema::descriptor::Schema;
use accident_risk_schema::normalize::normalize_reader;
use accident_risk_schema::raw::snapshot_id_for_file;

/// Loads the schema descriptor at `path`, or the built-in one.
pub fn schema(path: Option<&Path>) -> Result<Schema, SchemaError> {
    match path {
        Some(path) => {
            log::info!("Using schema {}", path.display());
            Schema::from_path(path)
        }
        None => Schema::us_accidents(),
    }
}

/// Reads `input`, normalizes it against `schema`, and validates it.
pub fn cleaned_view(
    multi: &MultiProgress,
    input: &Path,
    schema: &Schema,
    config: &ValidationConfig,
) -> Result<(CleanedView, ValidationReport), Box<dyn std::error::Error>> {
    let snapshot_id = snapshot_id_for_file(input)?;
    log::info!(
        "Loading {} (snapshot {})",
        input.display(),
        snapshot_id.get(..12).unwrap_or(&snapshot_id)
    );

    let progress = IndicatifProgress::rows_bar(multi, "Normalizing");
    let file = std::fs::File::open(input)?;
    let table = normalize_reader(std::io::BufReader::new(file), &snapshot_id, schema, &progress)?;

    let progress = IndicatifProgress::rows_bar(multi, "Validating");
    let (view, report) = validate(&table, config, &progress);
    log::info!(
        "Kept {} of {} rows ({} dropped)",
        report.kept_rows,
        report.total_rows,
        report.dropped_total()
    );
    Ok((view, report))
}
