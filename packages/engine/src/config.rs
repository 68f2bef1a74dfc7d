//! Engine configuration.
//!
//! Everything that changes which rows survive validation or how rates are
//! scaled lives here, so it can be fingerprinted into the cleaned view
//! version and loaded from a TOML file.

use std::path::{Path, PathBuf};

use accident_risk_accident_models::states;
use accident_risk_engine_models::TimeBasis;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::EngineError;

/// Environment variable naming a default configuration file.
pub const CONFIG_ENV: &str = "ACCIDENT_RISK_CONFIG";

/// What to do with rows whose `id` occurs more than once.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first occurrence in row order, drop the rest.
    #[default]
    KeepFirst,
    /// Drop every occurrence of a repeated id.
    DropAll,
}

/// Rules applied by the integrity validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Duplicate id handling.
    pub duplicate_policy: DuplicatePolicy,
    /// State codes accepted by the out-of-domain check.
    pub known_states: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::default(),
            known_states: states::known_codes()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl ValidationConfig {
    /// Stable digest of the rules, folded into the cleaned view version.
    ///
    /// State codes are compared case-insensitively and as a set, so
    /// reordering the list does not change the digest.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut codes = self
            .known_states
            .iter()
            .map(|s| s.trim().to_uppercase())
            .collect::<Vec<_>>();
        codes.sort();
        codes.dedup();

        let mut hasher = Sha256::new();
        hasher.update(self.duplicate_policy.as_ref().as_bytes());
        for code in codes {
            hasher.update(b"\0");
            hasher.update(code.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Rate computation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Strata with fewer incidents than this are flagged low-confidence.
    pub min_sample: u64,
    /// Multiplier applied to every rate (e.g. `100000` for per-100k).
    pub scale: f64,
    /// Divide rates by the number of calendar units in the window.
    pub time_basis: Option<TimeBasis>,
}

impl MetricsConfig {
    /// Stable digest of the settings, folded into persisted result keys.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(encoded))
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            min_sample: 10,
            scale: 1.0,
            time_basis: None,
        }
    }
}

/// Summary report settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Number of states listed in the top-states table.
    pub top_states: usize,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { top_states: 10 }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Integrity validator rules.
    pub validation: ValidationConfig,
    /// Rate settings.
    pub metrics: MetricsConfig,
    /// Summary report settings.
    pub summary: SummaryConfig,
}

impl RiskConfig {
    /// Parses a configuration document. Omitted fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Toml`] if the document is malformed, or
    /// [`EngineError::Config`] if a value is out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::de::from_str(toml_str)?;
        if !config.metrics.scale.is_finite() || config.metrics.scale <= 0.0 {
            return Err(EngineError::Config {
                message: format!("metrics.scale must be positive, got {}", config.metrics.scale),
            });
        }
        Ok(config)
    }

    /// Reads a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Loads `path` if given, else the file named by [`CONFIG_ENV`], else
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if a named file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        match path {
            Some(path) => {
                log::info!("Loading configuration from {}", path.display());
                Self::from_path(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = RiskConfig::from_toml("").unwrap();
        assert_eq!(config, RiskConfig::default());
        assert_eq!(config.metrics.min_sample, 10);
        assert_eq!(config.validation.duplicate_policy, DuplicatePolicy::KeepFirst);
        assert_eq!(config.validation.known_states.len(), 56);
    }

    #[test]
    fn parses_partial_sections() {
        let config = RiskConfig::from_toml(
            r#"
            [validation]
            duplicate_policy = "drop_all"

            [metrics]
            scale = 100000.0
            time_basis = "year"
            "#,
        )
        .unwrap();
        assert_eq!(config.validation.duplicate_policy, DuplicatePolicy::DropAll);
        assert_eq!(config.metrics.time_basis, Some(TimeBasis::Year));
        assert_eq!(config.metrics.min_sample, 10);
        assert_eq!(config.summary.top_states, 10);
    }

    #[test]
    fn rejects_non_positive_scale() {
        let err = RiskConfig::from_toml("[metrics]\nscale = 0.0\n").unwrap_err();
        assert!(err.to_string().contains("metrics.scale"));
    }

    #[test]
    fn fingerprint_ignores_state_order_and_case() {
        let a = ValidationConfig {
            known_states: vec!["CA".to_string(), "TX".to_string()],
            ..ValidationConfig::default()
        };
        let b = ValidationConfig {
            known_states: vec!["tx".to_string(), "ca".to_string()],
            ..ValidationConfig::default()
        };
        let c = ValidationConfig {
            duplicate_policy: DuplicatePolicy::DropAll,
            ..a.clone()
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn metrics_fingerprint_tracks_settings() {
        let base = MetricsConfig::default();
        let scaled = MetricsConfig {
            scale: 100_000.0,
            ..MetricsConfig::default()
        };
        assert_eq!(base.fingerprint(), MetricsConfig::default().fingerprint());
        assert_ne!(base.fingerprint(), scaled.fingerprint());
    }
}
