// Per-benchmark aggregates: targets and their metric limit values

use crate::metrics::{MetricInfo, MetricRange, MetricUnit};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Programming-contract errors raised when merging target data
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("Cannot merge metric '{found}' into metric '{expected}'")]
    MetricMismatch { expected: String, found: String },

    #[error("Cannot merge target '{found}' into target '{expected}'")]
    TargetMismatch { expected: String, found: String },

    #[error("Target '{target}' has no metric '{metric}'")]
    UnknownMetric { target: String, metric: String },
}

/// Identity of a measured method: a `::`-separated path such as
/// `benches::sorting::quick_sort`
///
/// The last segment is the candidate name, everything before it is the
/// competition (group) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(String);

impl MethodId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Competition name (`benches::sorting`), empty for a bare name
    pub fn group(&self) -> &str {
        self.0.rsplit_once("::").map(|(group, _)| group).unwrap_or("")
    }

    /// Candidate name (`quick_sort`)
    pub fn name(&self) -> &str {
        self.0.rsplit_once("::").map(|(_, name)| name).unwrap_or(&self.0)
    }

    /// Path segments, used to match mangled symbol names
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split("::")
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a target's limits are persisted
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStorage {
    /// Inline directive above the method in its source file
    #[default]
    Source,

    /// Sidecar TOML limits file
    Sidecar { path: PathBuf },

    /// Kept in memory only (never written)
    Transient,
}

/// What the harness knows about a target before any measurement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub method: MethodId,

    #[serde(default)]
    pub baseline: bool,

    #[serde(default)]
    pub storage: LimitStorage,
}

impl TargetDescriptor {
    pub fn new(method: &str, baseline: bool, storage: LimitStorage) -> Self {
        Self {
            method: MethodId::new(method),
            baseline,
            storage,
        }
    }
}

/// Limit range of one metric for one target
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionMetricValue {
    metric: Arc<MetricInfo>,
    values_range: MetricRange,
    display_unit: Option<MetricUnit>,
    has_unsaved_changes: bool,
}

impl CompetitionMetricValue {
    /// An empty (unset) value
    pub fn new(metric: Arc<MetricInfo>) -> Self {
        Self::with_range(metric, MetricRange::EMPTY, None)
    }

    pub fn with_range(
        metric: Arc<MetricInfo>,
        values_range: MetricRange,
        display_unit: Option<MetricUnit>,
    ) -> Self {
        Self {
            metric,
            values_range,
            display_unit,
            has_unsaved_changes: false,
        }
    }

    pub fn metric(&self) -> &MetricInfo {
        &self.metric
    }

    pub fn metric_id(&self) -> &str {
        &self.metric.id
    }

    pub fn values_range(&self) -> MetricRange {
        self.values_range
    }

    pub fn display_unit(&self) -> Option<&MetricUnit> {
        self.display_unit.as_ref()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.has_unsaved_changes
    }

    /// Merge new evidence into this value
    ///
    /// Returns `true` if the stored range changed (and is now unsaved). The
    /// display unit is replaced only when none is set yet or
    /// `force_unit_update` is given; an incoming value without a unit gets a
    /// fresh one derived from the metric's scale for the merged range.
    pub fn union_with(
        &mut self,
        other: &CompetitionMetricValue,
        force_unit_update: bool,
    ) -> Result<bool, TargetError> {
        if other.metric.id != self.metric.id {
            return Err(TargetError::MetricMismatch {
                expected: self.metric.id.clone(),
                found: other.metric.id.clone(),
            });
        }

        if other.values_range.is_empty() {
            return Ok(false);
        }

        let merged = self.values_range.union(&other.values_range);
        let changed = merged != self.values_range;
        if changed {
            self.values_range = merged;
            self.has_unsaved_changes = true;
        }

        if self.display_unit.is_none() || force_unit_update {
            let unit = match &other.display_unit {
                Some(unit) => unit.clone(),
                None => self.metric.scale.unit_for_range(&self.values_range).clone(),
            };
            self.display_unit = Some(unit);
        }

        Ok(changed)
    }

    /// Clear the unsaved flag after a successful write
    pub fn mark_as_saved(&mut self) {
        self.has_unsaved_changes = false;
    }

    /// Render the range in its display unit
    pub fn format(&self) -> String {
        let unit = self
            .display_unit
            .as_ref()
            .unwrap_or_else(|| self.metric.scale.unit_for_range(&self.values_range));
        self.values_range.format_with(Some(unit))
    }
}

/// One measured method within a pass
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitionTarget {
    method: MethodId,
    is_baseline: bool,
    storage: LimitStorage,
    metric_values: Vec<CompetitionMetricValue>,
}

impl CompetitionTarget {
    pub fn new(descriptor: &TargetDescriptor, metrics: &[Arc<MetricInfo>]) -> Self {
        Self {
            method: descriptor.method.clone(),
            is_baseline: descriptor.baseline,
            storage: descriptor.storage.clone(),
            metric_values: metrics
                .iter()
                .map(|m| CompetitionMetricValue::new(Arc::clone(m)))
                .collect(),
        }
    }

    pub fn method(&self) -> &MethodId {
        &self.method
    }

    pub fn is_baseline(&self) -> bool {
        self.is_baseline
    }

    pub fn storage(&self) -> &LimitStorage {
        &self.storage
    }

    pub fn metric_values(&self) -> &[CompetitionMetricValue] {
        &self.metric_values
    }

    pub fn metric_value(&self, metric_id: &str) -> Option<&CompetitionMetricValue> {
        self.metric_values.iter().find(|v| v.metric_id() == metric_id)
    }

    /// Merge one metric value into the matching slot
    pub fn union_metric(
        &mut self,
        other: &CompetitionMetricValue,
        force_unit_update: bool,
    ) -> Result<bool, TargetError> {
        let method = &self.method;
        let slot = self
            .metric_values
            .iter_mut()
            .find(|v| v.metric_id() == other.metric_id())
            .ok_or_else(|| TargetError::UnknownMetric {
                target: method.to_string(),
                metric: other.metric_id().to_string(),
            })?;
        slot.union_with(other, force_unit_update)
    }

    /// Merge every metric value of another snapshot of the same target
    pub fn union_with(
        &mut self,
        other: &CompetitionTarget,
        force_unit_update: bool,
    ) -> Result<bool, TargetError> {
        if other.method != self.method {
            return Err(TargetError::TargetMismatch {
                expected: self.method.to_string(),
                found: other.method.to_string(),
            });
        }

        let mut changed = false;
        for value in &other.metric_values {
            changed |= self.union_metric(value, force_unit_update)?;
        }
        Ok(changed)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.metric_values.iter().any(|v| v.has_unsaved_changes())
    }

    pub fn mark_as_saved(&mut self) {
        for value in &mut self.metric_values {
            value.mark_as_saved();
        }
    }

    /// Clear the unsaved flag of one metric. Returns whether it was set.
    pub fn mark_metric_saved(&mut self, metric_id: &str) -> bool {
        match self.metric_values.iter_mut().find(|v| v.metric_id() == metric_id) {
            Some(value) if value.has_unsaved_changes() => {
                value.mark_as_saved();
                true
            }
            _ => false,
        }
    }
}
