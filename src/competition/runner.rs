// Bounded rerun loop around the measurement harness

use crate::annotations::{render_block, AnnotationContext, AnnotationRewriter, SourceLocator};
use crate::competition::{
    AnalysisError, CompetitionAnalyser, CompetitionAnalysis, CompetitionConfig,
    CompetitionSession, CompetitionState, Message, MessageSeverity, RunSamples, TargetDescriptor,
};
use serde::Serialize;

/// External benchmark engine producing raw samples
pub trait MeasurementHarness {
    /// Measure every target once; `run_number` is 1-based
    fn measure(
        &mut self,
        targets: &[TargetDescriptor],
        run_number: u32,
    ) -> anyhow::Result<RunSamples>;
}

/// Final limits of one metric of one target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricLimit {
    pub metric: String,
    pub limit: String,
    pub saved: bool,
}

/// Final limits of one target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetLimits {
    pub method: String,
    pub baseline: bool,
    pub metrics: Vec<MetricLimit>,
}

/// Outcome of a whole pass
#[derive(Debug, Clone, Serialize)]
pub struct CompetitionReport {
    pub state: CompetitionState,
    pub passed: bool,
    pub runs: u32,
    pub messages: Vec<Message>,
    pub limits: Vec<TargetLimits>,
    /// Run log block with the final limits, present when limits were adjusted
    pub run_log_block: Option<String>,
}

impl CompetitionReport {
    fn from_analysis(analysis: &CompetitionAnalysis) -> Self {
        let limits = analysis
            .targets()
            .iter()
            .map(|target| TargetLimits {
                method: target.method().to_string(),
                baseline: target.is_baseline(),
                metrics: target
                    .metric_values()
                    .iter()
                    .map(|value| MetricLimit {
                        metric: value.metric_id().to_string(),
                        limit: value.format(),
                        saved: !value.has_unsaved_changes(),
                    })
                    .collect(),
            })
            .collect();

        let run_log_block = if analysis.limits_adjusted() {
            match render_block(analysis.targets()) {
                Ok(block) => Some(block),
                Err(error) => {
                    tracing::warn!("Cannot render run log block: {}", error);
                    None
                }
            }
        } else {
            None
        };

        Self {
            state: analysis.state(),
            passed: analysis.passed(),
            runs: analysis.run_number(),
            messages: analysis.messages().to_vec(),
            limits,
            run_log_block,
        }
    }

    pub fn messages_at_least(&self, severity: MessageSeverity) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.severity >= severity)
    }

    /// Generate human-readable report
    pub fn to_report_string(&self) -> String {
        let mut report = String::new();

        if self.passed {
            report.push_str(&format!("PASSED after {} run(s)\n\n", self.runs));
        } else {
            report.push_str(&format!(
                "FAILED ({:?}) after {} run(s)\n\n",
                self.state, self.runs
            ));
        }

        report.push_str("Limits:\n");
        for target in &self.limits {
            if target.baseline {
                report.push_str(&format!("  {} (baseline)\n", target.method));
                continue;
            }
            for metric in &target.metrics {
                report.push_str(&format!(
                    "  {} {}: {}{}\n",
                    target.method,
                    metric.metric,
                    metric.limit,
                    if metric.saved { "" } else { " (unsaved)" }
                ));
            }
        }

        let notable: Vec<&Message> = self.messages_at_least(MessageSeverity::Warning).collect();
        if !notable.is_empty() {
            report.push_str("\nMessages:\n");
            for message in notable {
                report.push_str(&format!("  {message}\n"));
            }
        }

        if let Some(block) = &self.run_log_block {
            report.push('\n');
            report.push_str(block);
        }

        report
    }
}

/// Drives a pass: measure, analyse, rerun while requested
pub struct CompetitionRunner {
    config: CompetitionConfig,
    rewriter: AnnotationRewriter,
    descriptors: Vec<TargetDescriptor>,
}

impl CompetitionRunner {
    pub fn new(
        config: CompetitionConfig,
        locator: Box<dyn SourceLocator>,
        descriptors: Vec<TargetDescriptor>,
    ) -> Result<Self, AnalysisError> {
        config.validate().map_err(AnalysisError::Config)?;
        let metrics = config.metric_infos()?;
        Ok(Self {
            config,
            rewriter: AnnotationRewriter::new(locator, metrics),
            descriptors,
        })
    }

    pub fn config(&self) -> &CompetitionConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &[TargetDescriptor] {
        &self.descriptors
    }

    /// Run a pass with a fresh session
    pub fn run(
        &self,
        harness: &mut dyn MeasurementHarness,
    ) -> Result<CompetitionReport, AnalysisError> {
        self.run_in_session(harness, &mut CompetitionSession::new())
    }

    /// Run a pass sharing the session's run log cache
    pub fn run_in_session(
        &self,
        harness: &mut dyn MeasurementHarness,
        session: &mut CompetitionSession,
    ) -> Result<CompetitionReport, AnalysisError> {
        let analyser = CompetitionAnalyser::new(&self.config, &self.rewriter)?;
        let mut analysis = CompetitionAnalysis::new(self.config.max_runs_allowed);
        let context = AnnotationContext::new();

        tracing::info!(
            "Starting competition pass over {} target(s)",
            self.descriptors.len()
        );

        if let Err(error) =
            analyser.prepare(&mut analysis, &self.descriptors, &context, session.run_logs_mut())
        {
            abort(&mut analysis, error);
        }

        while !analysis.state().is_final() {
            let run = analysis.begin_run();
            tracing::info!("Measurement run {} of {}", run, analysis.requested_runs());

            let samples = match harness.measure(&self.descriptors, run) {
                Ok(samples) => samples,
                Err(error) => {
                    abort(
                        &mut analysis,
                        AnalysisError::Harness {
                            run,
                            reason: format!("{error:#}"),
                        },
                    );
                    break;
                }
            };

            if let Err(error) = analyser.analyse_run(&mut analysis, &samples, &context) {
                abort(&mut analysis, error);
            }
        }

        if let Err(error) = context.dispose() {
            tracing::warn!("Failed to dispose annotation context: {}", error);
        }
        session.record_pass();

        let report = CompetitionReport::from_analysis(&analysis);
        tracing::info!(
            "Competition pass finished: {:?} after {} run(s)",
            report.state,
            report.runs
        );
        Ok(report)
    }
}

fn abort(analysis: &mut CompetitionAnalysis, error: AnalysisError) {
    analysis.add_message(MessageSeverity::CriticalError, None, error.to_string());
    analysis.set_state(CompetitionState::Failed);
}
