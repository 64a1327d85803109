// Configuration for competition analysis passes
//
// Loaded from the `[competition]` table of `limitador.toml`; command-line
// flags are applied on top with `CompetitionConfig::merge`.

use crate::metrics::{MetricError, MetricInfo};
use crate::stats::PercentileCalculator;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Configuration for a competition analysis pass
///
/// # Example
/// ```
/// use limitador::competition::CompetitionConfig;
///
/// let config = CompetitionConfig::default();
/// assert_eq!(config.mean_percentile, 50.0);
/// assert!(!config.adjust_limits);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompetitionConfig {
    /// Percentile used as the central estimate of a sample set
    ///
    /// Default: 50 (median)
    pub mean_percentile: f64,

    /// Half-width, in percentiles, of the measured (actual) range
    ///
    /// Default: 5, i.e. the range between the 45th and 55th percentile
    pub actual_delta: f64,

    /// Half-width, in percentiles, of a newly written limit
    ///
    /// Must be at least `actual_delta` so a new limit contains the
    /// measurement it was derived from.
    ///
    /// Default: 10
    pub limit_delta: f64,

    /// Widen limits that the measurement exceeds instead of failing
    pub adjust_limits: bool,

    /// Write adjusted limits back to source and sidecar files
    pub annotate: bool,

    /// Start from empty limits instead of the stored ones
    pub ignore_existing_annotations: bool,

    /// Extra runs requested after a limit was adjusted
    pub reruns_if_adjusted: u32,

    /// Upper bound on runs in one pass
    pub max_runs_allowed: u32,

    /// Run log (path or `file://` URI) to seed limits from
    pub previous_run_log: Option<String>,

    /// Metric ids checked in the pass
    pub metrics: Vec<String>,
}

impl Default for CompetitionConfig {
    fn default() -> Self {
        Self {
            mean_percentile: 50.0,
            actual_delta: 5.0,
            limit_delta: 10.0,
            adjust_limits: false,
            annotate: true,
            ignore_existing_annotations: false,
            reruns_if_adjusted: 2,
            max_runs_allowed: 10,
            previous_run_log: None,
            metrics: vec!["relative_time".to_string()],
        }
    }
}

/// File layout: settings live under `[competition]`
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    competition: CompetitionConfig,
}

impl CompetitionConfig {
    /// Check-only configuration: limits are never widened or written
    pub fn strict() -> Self {
        Self {
            adjust_limits: false,
            annotate: false,
            reruns_if_adjusted: 0,
            max_runs_allowed: 1,
            ..Self::default()
        }
    }

    /// Self-annotating configuration: widen and persist limits, rerun to confirm
    pub fn adjusting() -> Self {
        Self {
            adjust_limits: true,
            annotate: true,
            ..Self::default()
        }
    }

    /// Load from the `[competition]` table of a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content).context("Failed to parse TOML")?;
        file.competition
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [competition] configuration: {e}"))?;
        Ok(file.competition)
    }

    /// Apply overrides; unset fields keep their current value
    pub fn merge(mut self, overrides: &CompetitionOverrides) -> Self {
        if let Some(adjust) = overrides.adjust_limits {
            self.adjust_limits = adjust;
        }
        if let Some(annotate) = overrides.annotate {
            self.annotate = annotate;
        }
        if let Some(ignore) = overrides.ignore_existing_annotations {
            self.ignore_existing_annotations = ignore;
        }
        if let Some(reruns) = overrides.reruns_if_adjusted {
            self.reruns_if_adjusted = reruns;
        }
        if let Some(max_runs) = overrides.max_runs_allowed {
            self.max_runs_allowed = max_runs;
        }
        if let Some(log) = &overrides.previous_run_log {
            self.previous_run_log = Some(log.clone());
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("mean_percentile", self.mean_percentile),
            ("actual_delta", self.actual_delta),
            ("limit_delta", self.limit_delta),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("{name} must be in [0, 100], got {value}"));
            }
        }

        if self.limit_delta < self.actual_delta {
            return Err(format!(
                "limit_delta ({}) must be >= actual_delta ({})",
                self.limit_delta, self.actual_delta
            ));
        }

        if self.max_runs_allowed == 0 {
            return Err("max_runs_allowed must be at least 1".to_string());
        }

        if self.metrics.is_empty() {
            return Err("at least one metric must be configured".to_string());
        }
        for id in &self.metrics {
            MetricInfo::by_id(id).map_err(|e| e.to_string())?;
        }

        Ok(())
    }

    pub fn calculator(&self) -> Result<PercentileCalculator, String> {
        PercentileCalculator::new(self.mean_percentile, self.actual_delta, self.limit_delta)
            .map_err(|e| e.to_string())
    }

    /// Resolve the configured metric ids
    pub fn metric_infos(&self) -> Result<Vec<Arc<MetricInfo>>, MetricError> {
        self.metrics
            .iter()
            .map(|id| MetricInfo::by_id(id).map(Arc::new))
            .collect()
    }
}

/// Command-line overrides for [`CompetitionConfig`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompetitionOverrides {
    pub adjust_limits: Option<bool>,
    pub annotate: Option<bool>,
    pub ignore_existing_annotations: Option<bool>,
    pub reruns_if_adjusted: Option<u32>,
    pub max_runs_allowed: Option<u32>,
    pub previous_run_log: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CompetitionConfig::default();
        assert_eq!(config.mean_percentile, 50.0);
        assert_eq!(config.actual_delta, 5.0);
        assert_eq!(config.limit_delta, 10.0);
        assert!(config.annotate);
        assert_eq!(config.reruns_if_adjusted, 2);
        assert_eq!(config.max_runs_allowed, 10);
        assert_eq!(config.metrics, vec!["relative_time".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let strict = CompetitionConfig::strict();
        assert!(!strict.adjust_limits);
        assert!(!strict.annotate);
        assert_eq!(strict.max_runs_allowed, 1);
        assert!(strict.validate().is_ok());

        let adjusting = CompetitionConfig::adjusting();
        assert!(adjusting.adjust_limits);
        assert!(adjusting.validate().is_ok());
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_deltas() {
        let mut config = CompetitionConfig::default();
        config.limit_delta = 2.0;
        assert!(config.validate().is_err());

        let mut config = CompetitionConfig::default();
        config.mean_percentile = 101.0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_metrics() {
        let mut config = CompetitionConfig::default();
        config.metrics = vec!["allocations".to_string()];
        assert!(config.validate().is_err());

        config.metrics.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_competition_table() {
        let toml = r#"
            [competition]
            adjust_limits = true
            max_runs_allowed = 4
            metrics = ["relative_time", "time"]
        "#;

        let config = CompetitionConfig::from_toml_str(toml).unwrap();
        assert!(config.adjust_limits);
        assert_eq!(config.max_runs_allowed, 4);
        assert_eq!(config.limit_delta, 10.0);
        assert_eq!(config.metric_infos().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_table_uses_defaults() {
        let config = CompetitionConfig::from_toml_str("").unwrap();
        assert_eq!(config, CompetitionConfig::default());
    }

    #[test]
    fn test_parse_rejects_invalid_values() {
        let toml = r#"
            [competition]
            actual_delta = 20
            limit_delta = 10
        "#;
        assert!(CompetitionConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let overrides = CompetitionOverrides {
            adjust_limits: Some(true),
            max_runs_allowed: Some(3),
            previous_run_log: Some("file:///tmp/run.log".to_string()),
            ..CompetitionOverrides::default()
        };
        let config = CompetitionConfig::default().merge(&overrides);
        assert!(config.adjust_limits);
        assert_eq!(config.max_runs_allowed, 3);
        assert_eq!(config.reruns_if_adjusted, 2);
        assert_eq!(
            config.previous_run_log.as_deref(),
            Some("file:///tmp/run.log")
        );
    }
}
