// One verification pass over a set of competition targets
//
// Preparing -> Checking -> Annotating -> Completed | Failed
//
// `prepare` runs once per pass; `analyse_run` runs after every measurement
// and leaves the analysis in `Checking` when another run is needed.

use crate::annotations::{
    AnnotationContext, AnnotationError, AnnotationRewriter, RunLogCache, StoredLimits,
};
use crate::competition::{
    AnalysisError, CompetitionAnalysis, CompetitionConfig, CompetitionMetricValue,
    CompetitionState, CompetitionTarget, LimitStorage, MessageSeverity, MethodId,
    TargetDescriptor,
};
use crate::metrics::{MetricInfo, MetricRange};
use crate::stats::PercentileCalculator;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Decimals of a newly written limit
pub const LIMIT_ROUNDING_DIGITS: u32 = 2;

/// Raw samples of one run: method → sample key → values
pub type RunSamples = HashMap<MethodId, HashMap<String, Vec<f64>>>;

/// Runs the pass state machine against stored limits
pub struct CompetitionAnalyser<'a> {
    config: &'a CompetitionConfig,
    calculator: PercentileCalculator,
    metrics: Vec<Arc<MetricInfo>>,
    rewriter: &'a AnnotationRewriter,
}

/// Result of checking one metric of one target
enum CheckOutcome {
    NoEvidence,
    Fits,
    Adjusted { from: MetricRange, to: MetricRange },
    Exceeded { limit: MetricRange, actual: MetricRange },
    NoLimit { actual: MetricRange },
}

impl<'a> CompetitionAnalyser<'a> {
    pub fn new(
        config: &'a CompetitionConfig,
        rewriter: &'a AnnotationRewriter,
    ) -> Result<Self, AnalysisError> {
        config.validate().map_err(AnalysisError::Config)?;
        let calculator = config.calculator().map_err(AnalysisError::Config)?;
        let metrics = config.metric_infos()?;
        Ok(Self {
            config,
            calculator,
            metrics,
            rewriter,
        })
    }

    pub fn metrics(&self) -> &[Arc<MetricInfo>] {
        &self.metrics
    }

    /// Build targets and seed them from stored limits and the previous run log
    pub fn prepare(
        &self,
        analysis: &mut CompetitionAnalysis,
        descriptors: &[TargetDescriptor],
        context: &AnnotationContext,
        run_logs: &mut RunLogCache,
    ) -> Result<(), AnalysisError> {
        analysis.set_state(CompetitionState::Preparing);

        let mut seen = HashSet::new();
        for descriptor in descriptors {
            if !seen.insert(descriptor.method.clone()) {
                analysis.add_message(
                    MessageSeverity::Warning,
                    Some(&descriptor.method),
                    "duplicate target ignored",
                );
                continue;
            }
            let target = CompetitionTarget::new(descriptor, &self.metrics);
            analysis.targets_mut().push(target);
        }

        if !self.check_baseline(analysis) {
            analysis.set_state(CompetitionState::Failed);
            return Ok(());
        }

        if !self.config.ignore_existing_annotations {
            self.read_stored_limits(analysis, context)?;
        }

        let candidates: Vec<MethodId> = analysis
            .targets()
            .iter()
            .filter(|t| !t.is_baseline())
            .map(|t| t.method().clone())
            .collect();
        if !candidates.is_empty() && candidates.iter().all(|m| analysis.is_skipped(m)) {
            analysis.add_message(
                MessageSeverity::SetupError,
                None,
                "no competition target could be prepared",
            );
            analysis.set_state(CompetitionState::Failed);
            return Ok(());
        }

        if let Some(location) = &self.config.previous_run_log {
            self.seed_from_run_log(analysis, location, run_logs)?;
        }

        analysis.set_state(CompetitionState::Checking);
        Ok(())
    }

    /// Check one run's samples, adjust and persist limits, decide on reruns
    pub fn analyse_run(
        &self,
        analysis: &mut CompetitionAnalysis,
        samples: &RunSamples,
        context: &AnnotationContext,
    ) -> Result<(), AnalysisError> {
        if analysis.state().is_final() {
            return Ok(());
        }
        analysis.set_state(CompetitionState::Checking);

        let adjusted = self.check_targets(analysis, samples)?;
        if adjusted {
            analysis.mark_limits_adjusted();
        }

        self.annotate(analysis, context)?;

        if adjusted && self.config.reruns_if_adjusted > 0 {
            if analysis.is_last_allowed_run() {
                analysis.add_message(
                    MessageSeverity::TestError,
                    None,
                    format!(
                        "limits were still being adjusted on the last allowed run ({})",
                        analysis.max_runs_allowed()
                    ),
                );
            } else {
                analysis.request_reruns(self.config.reruns_if_adjusted);
            }
        }

        if self.config.annotate && !analysis.needs_rerun() {
            self.report_unsaved(analysis);
        }

        if analysis.has_errors() {
            analysis.set_state(CompetitionState::Failed);
        } else if analysis.needs_rerun() {
            analysis.set_state(CompetitionState::Checking);
        } else {
            analysis.set_state(CompetitionState::Completed);
        }
        Ok(())
    }

    fn check_baseline(&self, analysis: &mut CompetitionAnalysis) -> bool {
        let baselines = analysis.targets().iter().filter(|t| t.is_baseline()).count();
        let needs_baseline = self.metrics.iter().any(|m| m.relative);

        match baselines {
            0 if needs_baseline => {
                analysis.add_message(
                    MessageSeverity::SetupError,
                    None,
                    "relative metrics need a baseline target, none configured",
                );
                false
            }
            0 | 1 => true,
            count => {
                analysis.add_message(
                    MessageSeverity::SetupError,
                    None,
                    format!("expected one baseline target, found {count}"),
                );
                false
            }
        }
    }

    fn read_stored_limits(
        &self,
        analysis: &mut CompetitionAnalysis,
        context: &AnnotationContext,
    ) -> Result<(), AnalysisError> {
        let targets = analysis.targets().to_vec();
        let results = context.run_in_context(|scope| {
            Ok(targets
                .iter()
                .filter(|t| !t.is_baseline())
                .map(|t| (t.method().clone(), self.rewriter.read_limits(scope, t)))
                .collect::<Vec<_>>())
        })?;

        for (method, result) in results {
            match result {
                Ok(StoredLimits::None) => {
                    analysis.add_message(
                        MessageSeverity::Informational,
                        Some(&method),
                        "no stored limits",
                    );
                }
                Ok(StoredLimits::Baseline) => {
                    analysis.add_message(
                        MessageSeverity::Warning,
                        Some(&method),
                        "source marks this method as a baseline; its limits are not checked",
                    );
                    analysis.skip_target(&method);
                }
                Ok(StoredLimits::Ranges(ranges)) => {
                    self.apply_ranges(analysis, &method, &ranges, true)?;
                }
                Err(error) if error.is_critical() => return Err(error.into()),
                Err(error) => {
                    analysis.add_message(
                        MessageSeverity::Warning,
                        Some(&method),
                        format!("target skipped: {error}"),
                    );
                    analysis.skip_target(&method);
                }
            }
        }
        Ok(())
    }

    fn seed_from_run_log(
        &self,
        analysis: &mut CompetitionAnalysis,
        location: &str,
        run_logs: &mut RunLogCache,
    ) -> Result<(), AnalysisError> {
        let limits = match run_logs.load(location, &self.metrics) {
            Ok(limits) => limits,
            Err(error) => {
                analysis.add_message(
                    MessageSeverity::Warning,
                    None,
                    format!("previous run log not used: {error}"),
                );
                return Ok(());
            }
        };

        let methods: Vec<MethodId> = analysis
            .targets()
            .iter()
            .filter(|t| !t.is_baseline() && !analysis.is_skipped(t.method()))
            .map(|t| t.method().clone())
            .collect();
        let mut seeded = 0;
        for method in methods {
            if let Some(candidate) = limits.find(&method) {
                self.apply_ranges(analysis, &method, &candidate.ranges, false)?;
                seeded += 1;
            }
        }
        analysis.add_message(
            MessageSeverity::Informational,
            None,
            format!("seeded {seeded} target(s) from {location}"),
        );
        Ok(())
    }

    /// Union stored ranges into a target. Limits read from the target's own
    /// storage are already persisted and leave it clean.
    fn apply_ranges(
        &self,
        analysis: &mut CompetitionAnalysis,
        method: &MethodId,
        ranges: &[(String, MetricRange)],
        from_storage: bool,
    ) -> Result<(), AnalysisError> {
        let Some(target) = analysis
            .targets_mut()
            .iter_mut()
            .find(|t| t.method() == method)
        else {
            return Ok(());
        };

        for (metric_id, range) in ranges {
            let Some(metric) = self.metrics.iter().find(|m| &m.id == metric_id) else {
                continue;
            };
            let value = CompetitionMetricValue::with_range(Arc::clone(metric), *range, None);
            target.union_metric(&value, false)?;
            if from_storage {
                target.mark_metric_saved(metric_id);
            }
        }
        Ok(())
    }

    /// Returns whether any limit was adjusted
    fn check_targets(
        &self,
        analysis: &mut CompetitionAnalysis,
        samples: &RunSamples,
    ) -> Result<bool, AnalysisError> {
        let baseline = analysis.baseline().map(|t| t.method().clone());
        let methods: Vec<MethodId> = analysis
            .targets()
            .iter()
            .filter(|t| !t.is_baseline() && !analysis.is_skipped(t.method()))
            .map(|t| t.method().clone())
            .collect();

        let mut adjusted = false;
        for method in methods {
            for metric in &self.metrics {
                let outcome =
                    self.check_metric(analysis, &method, baseline.as_ref(), metric, samples)?;
                match outcome {
                    CheckOutcome::Fits => {}
                    CheckOutcome::NoEvidence => analysis.add_message(
                        MessageSeverity::Informational,
                        Some(&method),
                        format!("{}: not enough samples, check skipped", metric.display_name),
                    ),
                    CheckOutcome::Adjusted { from, to } => {
                        adjusted = true;
                        analysis.add_message(
                            MessageSeverity::Warning,
                            Some(&method),
                            format!(
                                "{}: limit adjusted from {} to {}",
                                metric.display_name, from, to
                            ),
                        );
                    }
                    CheckOutcome::Exceeded { limit, actual } => analysis.add_message(
                        MessageSeverity::TestError,
                        Some(&method),
                        format!(
                            "{}: measured {} does not fit limit {}",
                            metric.display_name, actual, limit
                        ),
                    ),
                    CheckOutcome::NoLimit { actual } => analysis.add_message(
                        MessageSeverity::Warning,
                        Some(&method),
                        format!(
                            "{}: no limit stored (measured {}); enable limit adjustment to record one",
                            metric.display_name, actual
                        ),
                    ),
                }
            }
        }
        Ok(adjusted)
    }

    fn check_metric(
        &self,
        analysis: &mut CompetitionAnalysis,
        method: &MethodId,
        baseline: Option<&MethodId>,
        metric: &Arc<MetricInfo>,
        samples: &RunSamples,
    ) -> Result<CheckOutcome, AnalysisError> {
        let values = sample_values(samples, method, &metric.sample_key);
        let baseline_values = baseline
            .map(|b| sample_values(samples, b, &metric.sample_key))
            .unwrap_or_default();

        let (actual, limit_values) = if metric.relative {
            (
                self.calculator
                    .try_get_relative_actual_values(values, baseline_values),
                self.calculator
                    .try_get_relative_limit_values(values, baseline_values),
            )
        } else {
            (
                self.calculator.try_get_actual_values(values),
                self.calculator.try_get_limit_values(values),
            )
        };
        if actual.is_empty() {
            return Ok(CheckOutcome::NoEvidence);
        }
        // Limits are stored at this precision
        let actual = actual.round_outward(LIMIT_ROUNDING_DIGITS);

        let Some(target) = analysis
            .targets_mut()
            .iter_mut()
            .find(|t| t.method() == method)
        else {
            return Ok(CheckOutcome::NoEvidence);
        };
        let limit = target
            .metric_value(&metric.id)
            .map(|v| v.values_range())
            .unwrap_or(MetricRange::EMPTY);

        if !limit.is_empty() && limit.fits(&actual) {
            tracing::debug!("{} {}: {} fits {}", method, metric.id, actual, limit);
            return Ok(CheckOutcome::Fits);
        }

        if !self.config.adjust_limits {
            return Ok(if limit.is_empty() {
                CheckOutcome::NoLimit { actual }
            } else {
                CheckOutcome::Exceeded { limit, actual }
            });
        }

        // The new limit always covers the measurement it was derived from
        let new_limit = limit_values
            .union(&actual)
            .round_outward(LIMIT_ROUNDING_DIGITS);
        let value = CompetitionMetricValue::with_range(Arc::clone(metric), new_limit, None);
        if !target.union_metric(&value, false)? {
            return Ok(CheckOutcome::Fits);
        }
        let to = target
            .metric_value(&metric.id)
            .map(|v| v.values_range())
            .unwrap_or(new_limit);
        tracing::info!("{} {}: limit {} -> {}", method, metric.id, limit, to);
        Ok(CheckOutcome::Adjusted { from: limit, to })
    }

    /// Persist dirty targets. Targets whose write failed stay dirty.
    fn annotate(
        &self,
        analysis: &mut CompetitionAnalysis,
        context: &AnnotationContext,
    ) -> Result<(), AnalysisError> {
        let dirty: Vec<CompetitionTarget> = analysis
            .targets()
            .iter()
            .filter(|t| !self.unsaved_metrics(t).0.is_empty())
            .cloned()
            .collect();
        if dirty.is_empty() {
            return Ok(());
        }
        if !self.config.annotate {
            analysis.add_message(
                MessageSeverity::Informational,
                None,
                format!("{} adjusted target(s) not persisted: annotation disabled", dirty.len()),
            );
            return Ok(());
        }

        analysis.set_state(CompetitionState::Annotating);

        let (updates, outcome) = context.run_in_context(|scope| {
            let updates: Vec<_> = dirty
                .iter()
                .map(|target| {
                    let result = self.rewriter.update(scope, target);
                    let origin = scope
                        .try_get_document_for_target(target.method().path())
                        .map(|d| d.origin().to_string());
                    (target.method().clone(), result, origin)
                })
                .collect();
            Ok((updates, scope.save()))
        })?;

        for (target, (method, result, origin)) in dirty.iter().zip(updates) {
            let failure = match result {
                Err(error) if error.is_critical() => return Err(error.into()),
                Err(error @ AnnotationError::ChecksumMismatch { .. }) => {
                    Some((MessageSeverity::TestError, error.to_string()))
                }
                Err(error) => Some((MessageSeverity::Warning, error.to_string())),
                Ok(_) => origin
                    .as_deref()
                    .and_then(|origin| outcome.failure_for(origin))
                    .map(|error| (MessageSeverity::Warning, error.to_string())),
            };

            match failure {
                None => {
                    let (written, _) = self.unsaved_metrics(target);
                    if let Some(target) = analysis
                        .targets_mut()
                        .iter_mut()
                        .find(|t| t.method() == &method)
                    {
                        for metric_id in &written {
                            target.mark_metric_saved(metric_id);
                        }
                    }
                }
                Some((severity, reason)) => analysis.add_message(
                    severity,
                    Some(&method),
                    format!("limits not written: {reason}"),
                ),
            }
        }
        Ok(())
    }

    /// Ids of the target's unsaved metrics, split into those its storage
    /// holds and those it has no place for
    fn unsaved_metrics(&self, target: &CompetitionTarget) -> (Vec<String>, Vec<String>) {
        let (stored, unstored): (Vec<_>, Vec<_>) = target
            .metric_values()
            .iter()
            .filter(|value| value.has_unsaved_changes())
            .partition(|value| self.rewriter.covers(target.storage(), value.metric()));
        let ids = |values: Vec<&CompetitionMetricValue>| -> Vec<String> {
            values
                .into_iter()
                .map(|value| value.metric_id().to_string())
                .collect()
        };
        (ids(stored), ids(unstored))
    }

    /// End-of-pass accounting of limits that never reached storage
    fn report_unsaved(&self, analysis: &mut CompetitionAnalysis) {
        let mut unsaved = 0;
        let mut unstorable = Vec::new();
        for target in analysis.targets() {
            let (stored, unstored) = self.unsaved_metrics(target);
            if !stored.is_empty() {
                unsaved += 1;
            }
            if !unstored.is_empty() {
                let reason = match target.storage() {
                    LimitStorage::Source => "source annotations store only the primary metric",
                    _ => "the metric has no annotation keys",
                };
                unstorable.push((target.method().clone(), unstored, reason));
            }
        }

        for (method, metric_ids, reason) in unstorable {
            analysis.add_message(
                MessageSeverity::Warning,
                Some(&method),
                format!("limits for {} not persisted: {reason}", metric_ids.join(", ")),
            );
        }
        if unsaved > 0 {
            analysis.add_message(
                MessageSeverity::TestError,
                None,
                format!("{unsaved} target(s) still have unsaved limits"),
            );
        }
    }
}

fn sample_values<'s>(samples: &'s RunSamples, method: &MethodId, key: &str) -> &'s [f64] {
    samples
        .get(method)
        .and_then(|by_key| by_key.get(key))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
