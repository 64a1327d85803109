// Reads and patches persisted limits
//
// The same location logic serves reads and writes, so a check always looks
// at the place an update would write to. Patches only change the cached
// document; nothing reaches disk until `ContextScope::save`.

use super::{
    find_directive, AnnotationError, ContextScope, DirectiveArgs, SidecarLimits, SourceLocator,
    UNKNOWN_ORIGIN,
};
use crate::competition::{CompetitionTarget, LimitStorage};
use crate::metrics::{MetricInfo, MetricRange};
use std::path::Path;
use std::sync::Arc;

/// What is persisted for one target
#[derive(Debug, Clone, PartialEq)]
pub enum StoredLimits {
    /// Nothing stored yet
    None,
    /// The source marks the method as the baseline
    Baseline,
    /// Stored ranges as (metric id, range)
    Ranges(Vec<(String, MetricRange)>),
}

/// Locates, reads and patches the limit annotations of targets
pub struct AnnotationRewriter {
    locator: Box<dyn SourceLocator>,
    metrics: Vec<Arc<MetricInfo>>,
}

impl AnnotationRewriter {
    pub fn new(locator: Box<dyn SourceLocator>, metrics: Vec<Arc<MetricInfo>>) -> Self {
        Self { locator, metrics }
    }

    pub fn metrics(&self) -> &[Arc<MetricInfo>] {
        &self.metrics
    }

    /// Read the persisted limits of a target
    pub fn read_limits(
        &self,
        scope: &mut ContextScope<'_>,
        target: &CompetitionTarget,
    ) -> Result<StoredLimits, AnnotationError> {
        match target.storage() {
            LimitStorage::Transient => Ok(StoredLimits::None),
            LimitStorage::Sidecar { path } => self.read_sidecar(scope, target, path),
            LimitStorage::Source => self.read_source(scope, target),
        }
    }

    /// Patch the cached document with the target's current ranges
    ///
    /// Returns whether the document changed. Source files are refused when
    /// they no longer match the checksum recorded for the measured binary.
    pub fn update(
        &self,
        scope: &mut ContextScope<'_>,
        target: &CompetitionTarget,
    ) -> Result<bool, AnnotationError> {
        let changed = match target.storage() {
            LimitStorage::Transient => false,
            LimitStorage::Sidecar { path } => self.update_sidecar(scope, target, path)?,
            LimitStorage::Source => self.update_source(scope, target)?,
        };
        if changed {
            tracing::info!("Updated stored limits for {}", target.method());
        }
        Ok(changed)
    }

    /// Whether an update of `storage` accounts for `metric`
    ///
    /// Transient storage keeps nothing and so covers every metric. Sidecars
    /// hold each metric with annotation keys; a source directive holds only
    /// the primary metric.
    pub fn covers(&self, storage: &LimitStorage, metric: &MetricInfo) -> bool {
        match storage {
            LimitStorage::Transient => true,
            LimitStorage::Sidecar { .. } => metric.annotation_keys.is_some(),
            LimitStorage::Source => self
                .primary_metric()
                .is_some_and(|primary| primary.id == metric.id),
        }
    }

    fn primary_metric(&self) -> Option<&MetricInfo> {
        self.metrics
            .iter()
            .find(|m| m.primary)
            .or_else(|| self.metrics.first())
            .map(Arc::as_ref)
    }

    fn read_sidecar(
        &self,
        scope: &mut ContextScope<'_>,
        target: &CompetitionTarget,
        path: &Path,
    ) -> Result<StoredLimits, AnnotationError> {
        let document = scope.load_tree(path)?;
        let origin = document.origin().to_string();
        let limits = match document.tree() {
            Some(tree) => SidecarLimits::parse(tree, &self.metrics).map_err(|reason| {
                AnnotationError::InvalidSidecar {
                    origin: origin.clone(),
                    reason,
                }
            })?,
            None => SidecarLimits::new(),
        };
        scope.bind_target(target.method().path(), &origin);

        Ok(match limits.find(target.method()) {
            Some(candidate) if !candidate.ranges.is_empty() => {
                StoredLimits::Ranges(candidate.ranges.clone())
            }
            _ => StoredLimits::None,
        })
    }

    fn read_source(
        &self,
        scope: &mut ContextScope<'_>,
        target: &CompetitionTarget,
    ) -> Result<StoredLimits, AnnotationError> {
        let method = target.method();
        let info = match self.locator.locate(method) {
            Ok(info) => info,
            Err(error) => {
                scope.unknown_origin_document();
                scope.bind_target(method.path(), UNKNOWN_ORIGIN);
                return Err(error.into());
            }
        };

        let document = scope.load_lines(&info.path)?;
        let origin = document.origin().to_string();
        let lines = document.lines().unwrap_or_default();
        let found = find_directive(lines, info.method_line).ok_or_else(|| {
            AnnotationError::DirectiveNotFound {
                path: info.path.clone(),
                line: info.method_line,
                method: method.to_string(),
            }
        })?;
        scope.bind_target(method.path(), &origin);

        let args = found.args.map_err(|reason| AnnotationError::InvalidDirective {
            path: info.path.clone(),
            line: found.line_index + 1,
            reason,
        })?;
        Ok(match args {
            DirectiveArgs::None => StoredLimits::None,
            DirectiveArgs::Baseline => StoredLimits::Baseline,
            DirectiveArgs::Limits(range) => match self.primary_metric() {
                Some(metric) => StoredLimits::Ranges(vec![(metric.id.clone(), range)]),
                None => StoredLimits::None,
            },
        })
    }

    fn update_sidecar(
        &self,
        scope: &mut ContextScope<'_>,
        target: &CompetitionTarget,
        path: &Path,
    ) -> Result<bool, AnnotationError> {
        let document = scope.load_tree(path)?;
        let origin = document.origin().to_string();
        let Some(tree) = document.tree_mut() else {
            return Ok(false);
        };

        let mut changed = false;
        for value in target.metric_values() {
            let range = value.values_range();
            if range.is_empty() {
                continue;
            }
            changed |= SidecarLimits::patch(tree, target.method(), value.metric(), &range)
                .map_err(|reason| AnnotationError::InvalidSidecar {
                    origin: origin.clone(),
                    reason,
                })?;
        }

        if changed {
            document.mark_dirty();
        }
        scope.bind_target(target.method().path(), &origin);
        Ok(changed)
    }

    fn update_source(
        &self,
        scope: &mut ContextScope<'_>,
        target: &CompetitionTarget,
    ) -> Result<bool, AnnotationError> {
        let Some(metric) = self.primary_metric() else {
            return Ok(false);
        };
        let Some(range) = target
            .metric_value(&metric.id)
            .map(|value| value.values_range())
            .filter(|range| !range.is_empty())
        else {
            return Ok(false);
        };

        let method = target.method();
        let info = self.locator.locate(method)?;
        let document = scope.load_lines(&info.path)?;

        let actual = document.initial_checksum();
        if actual != Some(info.checksum) {
            return Err(AnnotationError::ChecksumMismatch {
                path: info.path.clone(),
                expected: info.checksum.to_hex(),
                actual: actual.map(|c| c.to_hex()).unwrap_or_default(),
            });
        }

        let lines = document.lines().unwrap_or_default();
        let found = find_directive(lines, info.method_line).ok_or_else(|| {
            AnnotationError::DirectiveNotFound {
                path: info.path.clone(),
                line: info.method_line,
                method: method.to_string(),
            }
        })?;

        match &found.args {
            Ok(DirectiveArgs::Baseline) => return Ok(false),
            Ok(_) => {}
            Err(reason) => {
                return Err(AnnotationError::InvalidDirective {
                    path: info.path.clone(),
                    line: found.line_index + 1,
                    reason: reason.clone(),
                })
            }
        }

        let patched = found.patch_line(&lines[found.line_index], &range);
        let origin = document.origin().to_string();
        let changed = document.replace_line(found.line_index, &patched);
        scope.bind_target(method.path(), &origin);
        Ok(changed)
    }
}
