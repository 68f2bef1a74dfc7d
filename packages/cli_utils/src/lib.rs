#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the accident risk toolchain.
//!
//! Provides `indicatif`-backed progress bars behind the [`ProgressCallback`]
//! trait, plus [`init_logger`] which sets up `indicatif-log-bridge` so that
//! `log::info!` and friends are suspended while progress bars redraw.

use std::sync::Arc;
use std::time::Duration;

use accident_risk_schema::progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] that implements [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Style to switch to once `begin()` provides a known length.
    bar_style: ProgressStyle,
    /// Unit shown after the counts, e.g. "rows".
    unit: &'static str,
}

impl IndicatifProgress {
    /// Creates a bar for row scans (normalizing, validating). Spins while
    /// the row count is unknown and becomes a full bar with percentage and
    /// ETA when a scan begins with a known total.
    #[must_use]
    pub fn rows_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::rows(multi, message))
    }

    /// Creates a bar counting finished stratification requests.
    #[must_use]
    pub fn requests_bar(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::requests(multi, message))
    }

    fn rows(multi: &MultiProgress, message: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg} {pos} rows")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let bar_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {pos}/{len} rows {percent}% [{eta}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Self {
            bar,
            bar_style,
            unit: "rows",
        }
    }

    fn requests(multi: &MultiProgress, message: &str) -> Self {
        let bar = multi.add(ProgressBar::new(0));
        let bar_style = ProgressStyle::with_template(
            "{msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        bar.set_style(bar_style.clone());
        bar.set_message(message.to_string());

        Self {
            bar,
            bar_style,
            unit: "requests",
        }
    }
}

impl ProgressCallback for IndicatifProgress {
    fn begin(&self, label: &str, total: Option<u64>) {
        self.bar.set_message(label.to_string());
        self.bar.set_position(0);
        if let Some(total) = total {
            self.bar.set_length(total);
            self.bar.set_style(self.bar_style.clone());
        }
    }

    fn advance(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn finish(&self, summary: String) {
        log::debug!("{summary} ({} {})", self.bar.position(), self.unit);
        self.bar.finish_with_message(summary);
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// `default_filter` applies when `RUST_LOG` is unset.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger(default_filter: &str) -> MultiProgress {
    let multi = MultiProgress::new();

    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filters) => builder.parse_filters(&filters),
        Err(_) => builder.parse_filters(default_filter),
    };
    let logger = builder.build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if logger was already set (e.g., in tests)

    log::set_max_level(level);

    multi
}

#[cfg(test)]
mod tests {
    use indicatif::ProgressDrawTarget;

    use super::*;

    fn hidden() -> MultiProgress {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }

    #[test]
    fn rows_bar_tracks_a_known_total() {
        let multi = hidden();
        let progress = IndicatifProgress::rows(&multi, "Validating");
        progress.begin("Validating rows", Some(10));
        progress.advance(4);
        progress.advance(3);
        assert_eq!(progress.bar.length(), Some(10));
        assert_eq!(progress.bar.position(), 7);
        assert!(!progress.bar.is_finished());

        progress.finish("Kept 7 of 10 rows".to_string());
        assert!(progress.bar.is_finished());
        assert_eq!(progress.bar.message(), "Kept 7 of 10 rows");
    }

    #[test]
    fn streamed_scan_keeps_spinning_without_a_total() {
        let multi = hidden();
        let progress = IndicatifProgress::rows(&multi, "Normalizing");
        progress.begin("Normalizing rows", None);
        progress.advance(65_536);
        assert_eq!(progress.bar.position(), 65_536);
        assert_eq!(progress.bar.length(), None);
        assert_eq!(progress.bar.message(), "Normalizing rows");
    }

    #[test]
    fn requests_bar_counts_requests() {
        let multi = hidden();
        let progress = IndicatifProgress::requests(&multi, "Stratifying");
        progress.begin("Stratifying", Some(3));
        for _ in 0..3 {
            progress.advance(1);
        }
        assert_eq!(progress.bar.position(), 3);
        assert_eq!(progress.bar.length(), Some(3));
        progress.finish("3 stratifications, 0 failed".to_string());
        assert!(progress.bar.is_finished());
    }
}
