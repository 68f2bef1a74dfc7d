#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the accident risk engine.
//!
//! Loads a CSV snapshot through the schema normalizer and integrity
//! validator, then stratifies, summarizes, or reads back persisted rate
//! sets. Uses `indicatif-log-bridge` (via
//! [`accident_risk_cli_utils::init_logger`]) so log lines and progress bars
//! share the terminal.

mod load;
mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use accident_risk_cli_utils::IndicatifProgress;
use accident_risk_engine::cache::{MemoryStore, RateCache, RateStore};
use accident_risk_engine::config::{DuplicatePolicy, RiskConfig};
use accident_risk_engine::dimension::resolve;
use accident_risk_engine::exposure::ExposureTable;
use accident_risk_engine::metrics::top_per_partition;
use accident_risk_engine::summary::summarize;
use accident_risk_engine_models::{Condition, RowFilter, StratificationRequest, TimeBasis};
use accident_risk_store::DuckDbStore;
use clap::{Parser, Subcommand};

use crate::output::{Format, ResultSet};

#[derive(Parser)]
#[command(name = "accident_risk", about = "Stratified accident risk analysis")]
struct Cli {
    /// Engine configuration file (TOML). Defaults to `$ACCIDENT_RISK_CONFIG`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Schema descriptor (TOML). Defaults to the built-in US accidents schema.
    #[arg(long, global = true)]
    schema: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize and validate a snapshot, printing the validation report
    Validate {
        /// Incident snapshot (CSV)
        #[arg(long)]
        input: PathBuf,
        /// Override the duplicate id policy (`keep_first` or `drop_all`)
        #[arg(long)]
        duplicate_policy: Option<DuplicatePolicy>,
    },
    /// Compute rates for one or more stratifications
    Stratify {
        /// Incident snapshot (CSV)
        #[arg(long)]
        input: PathBuf,
        /// Comma-separated dimensions for one stratification (repeatable)
        #[arg(long = "levels", required = true)]
        levels: Vec<String>,
        /// Row filter, e.g. `state=CA|TX` or `severity=3..4` (repeatable)
        #[arg(long = "filter")]
        filters: Vec<Condition>,
        /// Exposure table (CSV): one column per dimension plus `exposure`
        #[arg(long)]
        exposure: Option<PathBuf>,
        /// Persist results in this `DuckDB` file
        #[arg(long)]
        store: Option<PathBuf>,
        /// Write results here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: Format,
        /// Override the low-confidence threshold
        #[arg(long)]
        min_sample: Option<u64>,
        /// Override the rate multiplier (e.g. 100000 for per-100k)
        #[arg(long)]
        scale: Option<f64>,
        /// Divide rates by calendar units (`day`, `month`, or `year`)
        #[arg(long)]
        time_basis: Option<TimeBasis>,
        /// Override the duplicate id policy (`keep_first` or `drop_all`)
        #[arg(long)]
        duplicate_policy: Option<DuplicatePolicy>,
        /// Keep only the N largest strata per partition
        #[arg(long, requires = "partition")]
        top: Option<usize>,
        /// Comma-separated dimensions to rank within; adds each stratum's
        /// rank and share of its partition
        #[arg(long)]
        partition: Option<String>,
        /// Maximum stratifications computed at once
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },
    /// Print a dataset overview of the cleaned view
    Summary {
        /// Incident snapshot (CSV)
        #[arg(long)]
        input: PathBuf,
        /// Number of states in the top-states table
        #[arg(long)]
        top_states: Option<usize>,
    },
    /// Print persisted unfiltered strata from the latest stored version
    Fetch {
        /// `DuckDB` rate store
        #[arg(long)]
        store: PathBuf,
        /// Comma-separated dimensions, as stored
        #[arg(long)]
        levels: String,
        /// Write results here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
        /// Output format
        #[arg(long, value_enum, default_value = "csv")]
        format: Format,
    },
}

fn split_levels(levels: &str) -> Vec<String> {
    levels
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn open_store(path: Option<&Path>) -> Result<Arc<dyn RateStore>, Box<dyn std::error::Error>> {
    Ok(match path {
        Some(path) => Arc::new(DuckDbStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    })
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = accident_risk_cli_utils::init_logger("info");
    let cli = Cli::parse();

    let mut config = RiskConfig::load(cli.config.as_deref())?;
    let schema = load::schema(cli.schema.as_deref())?;

    match cli.command {
        Commands::Validate {
            input,
            duplicate_policy,
        } => {
            if let Some(policy) = duplicate_policy {
                config.validation.duplicate_policy = policy;
            }
            let (_, report) = load::cleaned_view(&multi, &input, &schema, &config.validation)?;
            output::print_validation(&report)?;
        }
        Commands::Stratify {
            input,
            levels,
            filters,
            exposure,
            store,
            output: output_path,
            format,
            min_sample,
            scale,
            time_basis,
            duplicate_policy,
            top,
            partition,
            concurrency,
        } => {
            if let Some(policy) = duplicate_policy {
                config.validation.duplicate_policy = policy;
            }
            if let Some(min_sample) = min_sample {
                config.metrics.min_sample = min_sample;
            }
            if let Some(scale) = scale {
                if !scale.is_finite() || scale <= 0.0 {
                    return Err(format!("--scale must be positive, got {scale}").into());
                }
                config.metrics.scale = scale;
            }
            if time_basis.is_some() {
                config.metrics.time_basis = time_basis;
            }

            let (view, _) = load::cleaned_view(&multi, &input, &schema, &config.validation)?;
            let view = Arc::new(view);
            let exposure = exposure
                .map(|path| ExposureTable::from_path(&path, &view).map(Arc::new))
                .transpose()?;

            let cache = RateCache::new(
                open_store(store.as_deref())?,
                config.metrics.clone(),
                exposure,
            );
            let filter = filters.into_iter().collect::<RowFilter>();
            let requests = levels
                .iter()
                .map(|l| StratificationRequest::new(split_levels(l)).with_filter(filter.clone()))
                .collect::<Vec<_>>();

            let progress = IndicatifProgress::requests_bar(&multi, "Stratifying");
            let results = cache
                .compute_all(&view, &requests, concurrency, &progress)
                .await;
            cache.close();

            let partition = partition.as_deref().map(split_levels);
            let mut sets = Vec::with_capacity(results.len());
            for (request, result) in requests.iter().zip(results) {
                let dimensions = resolve(&view, &request.dimensions)?
                    .into_iter()
                    .map(|d| d.name)
                    .collect::<Vec<_>>();
                let mut records = result?.to_vec();
                if let Some(partition) = &partition {
                    let n = top.unwrap_or(usize::MAX);
                    records = top_per_partition(&dimensions, &records, partition, n)?;
                }
                sets.push(ResultSet {
                    version: view.version().to_string(),
                    filter: request.filter.cache_key(),
                    dimensions,
                    records,
                });
            }
            output::write_sets(&sets, format, output_path.as_deref())?;
        }
        Commands::Summary { input, top_states } => {
            let (view, _) = load::cleaned_view(&multi, &input, &schema, &config.validation)?;
            let report = summarize(&view, top_states.unwrap_or(config.summary.top_states));
            output::print_summary(&report)?;
        }
        Commands::Fetch {
            store,
            levels,
            output: output_path,
            format,
        } => {
            if !store.exists() {
                return Err(format!("No rate store at {}", store.display()).into());
            }
            let dimensions = split_levels(&levels);
            let rate_store = open_store(Some(&store))?;
            let version = rate_store.latest_version()?.unwrap_or_default();
            let cache = RateCache::new(rate_store, config.metrics.clone(), None);
            let fetched = cache.fetch(&dimensions).await?;
            cache.close();

            let Some(records) = fetched else {
                return Err(format!(
                    "No stored unfiltered result for [{}]; run `stratify --store` first",
                    dimensions.join(", ")
                )
                .into());
            };
            let sets = [ResultSet {
                version,
                filter: RowFilter::all().cache_key(),
                dimensions: dimensions.iter().map(|d| d.to_ascii_lowercase()).collect(),
                records: records.to_vec(),
            }];
            output::write_sets(&sets, format, output_path.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeated_levels_and_filters() {
        let cli = Cli::try_parse_from([
            "accident_risk",
            "stratify",
            "--input",
            "snapshot.csv",
            "--levels",
            "state,hour",
            "--levels",
            "severity",
            "--filter",
            "state=CA|TX",
            "--filter",
            "severity=3..4",
            "--time-basis",
            "year",
        ])
        .unwrap();

        let Commands::Stratify {
            levels,
            filters,
            time_basis,
            format,
            ..
        } = cli.command
        else {
            panic!("expected stratify");
        };
        assert_eq!(levels, ["state,hour", "severity"]);
        assert_eq!(split_levels(&levels[0]), ["state", "hour"]);
        assert_eq!(filters.len(), 2);
        assert_eq!(time_basis, Some(TimeBasis::Year));
        assert_eq!(format, Format::Csv);
    }

    #[test]
    fn rejects_bad_filters() {
        assert!(
            Cli::try_parse_from([
                "accident_risk",
                "stratify",
                "--input",
                "snapshot.csv",
                "--levels",
                "state",
                "--filter",
                "state",
            ])
            .is_err()
        );
    }
}
