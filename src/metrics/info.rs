use crate::metrics::{MetricError, MetricUnitScale};
use serde::{Deserialize, Serialize};

/// Raw sample key for per-iteration wall-clock time in nanoseconds
pub const TIME_SAMPLE_KEY: &str = "time_ns";

/// Keys a metric's bounds are stored under in a sidecar limits file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationKeys {
    pub min_key: String,
    pub max_key: String,
}

impl AnnotationKeys {
    pub fn new(min_key: &str, max_key: &str) -> Self {
        Self {
            min_key: min_key.to_string(),
            max_key: max_key.to_string(),
        }
    }
}

/// Definition of a checked metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricInfo {
    /// Stable identifier (`relative_time`, `time`)
    pub id: String,

    pub display_name: String,

    /// Which raw samples the harness reports for this metric
    pub sample_key: String,

    /// Relative metrics are ratios against the baseline's samples
    pub relative: bool,

    pub scale: MetricUnitScale,

    /// Sidecar keys, `None` when the metric is never persisted
    pub annotation_keys: Option<AnnotationKeys>,

    /// The primary metric is the one the inline source directive stores
    pub primary: bool,
}

impl MetricInfo {
    /// Time relative to the baseline (the competition metric)
    pub fn relative_time() -> Self {
        Self {
            id: "relative_time".to_string(),
            display_name: "Relative time".to_string(),
            sample_key: TIME_SAMPLE_KEY.to_string(),
            relative: true,
            scale: MetricUnitScale::ratio(),
            annotation_keys: Some(AnnotationKeys::new("min_ratio", "max_ratio")),
            primary: true,
        }
    }

    /// Absolute time per iteration
    pub fn absolute_time() -> Self {
        Self {
            id: "time".to_string(),
            display_name: "Time".to_string(),
            sample_key: TIME_SAMPLE_KEY.to_string(),
            relative: false,
            scale: MetricUnitScale::time(),
            annotation_keys: Some(AnnotationKeys::new("min_time_ns", "max_time_ns")),
            primary: false,
        }
    }

    /// Look up a built-in metric by id
    pub fn by_id(id: &str) -> Result<Self, MetricError> {
        match id {
            "relative_time" => Ok(Self::relative_time()),
            "time" => Ok(Self::absolute_time()),
            other => Err(MetricError::UnknownMetric(other.to_string())),
        }
    }
}
