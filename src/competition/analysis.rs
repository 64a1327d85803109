// State of one competition analysis pass
//
// A pass spans every rerun of the same set of targets. Messages accumulate
// across runs; the pass fails as soon as any error-level message is added.

use crate::annotations::AnnotationError;
use crate::competition::{CompetitionTarget, MethodId, TargetError};
use crate::metrics::MetricError;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Errors that abort a pass
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Measurement harness failed on run {run}: {reason}")]
    Harness { run: u32, reason: String },

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    Target(#[from] TargetError),
}

/// Severity of a pass message, in increasing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSeverity {
    Informational,
    Warning,
    /// A checked limit did not hold
    TestError,
    /// Targets could not be prepared
    SetupError,
    /// The pass could not continue
    CriticalError,
}

impl MessageSeverity {
    pub fn is_error(self) -> bool {
        self >= MessageSeverity::TestError
    }
}

impl fmt::Display for MessageSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Informational => "info",
            Self::Warning => "warning",
            Self::TestError => "test error",
            Self::SetupError => "setup error",
            Self::CriticalError => "critical error",
        };
        f.write_str(label)
    }
}

/// One entry of the pass result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub severity: MessageSeverity,
    /// Run the message was raised in (0 while preparing)
    pub run: u32,
    pub target: Option<String>,
    pub text: String,
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "[{}] {}: {}", self.severity, target, self.text),
            None => write!(f, "[{}] {}", self.severity, self.text),
        }
    }
}

/// Pass state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionState {
    Preparing,
    Checking,
    Annotating,
    Completed,
    Failed,
}

impl CompetitionState {
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Everything known about a pass in progress
#[derive(Debug, Clone)]
pub struct CompetitionAnalysis {
    targets: Vec<CompetitionTarget>,
    skipped: HashSet<MethodId>,
    run_number: u32,
    max_runs_allowed: u32,
    requested_runs: u32,
    messages: Vec<Message>,
    safe_to_continue: bool,
    limits_adjusted: bool,
    state: CompetitionState,
}

impl CompetitionAnalysis {
    pub fn new(max_runs_allowed: u32) -> Self {
        let max_runs_allowed = max_runs_allowed.max(1);
        Self {
            targets: Vec::new(),
            skipped: HashSet::new(),
            run_number: 0,
            max_runs_allowed,
            requested_runs: 1,
            messages: Vec::new(),
            safe_to_continue: true,
            limits_adjusted: false,
            state: CompetitionState::Preparing,
        }
    }

    pub fn targets(&self) -> &[CompetitionTarget] {
        &self.targets
    }

    pub(crate) fn targets_mut(&mut self) -> &mut Vec<CompetitionTarget> {
        &mut self.targets
    }

    pub fn target(&self, method: &MethodId) -> Option<&CompetitionTarget> {
        self.targets.iter().find(|t| t.method() == method)
    }

    pub fn baseline(&self) -> Option<&CompetitionTarget> {
        self.targets.iter().find(|t| t.is_baseline())
    }

    /// Exclude a target from checks for the rest of the pass
    pub(crate) fn skip_target(&mut self, method: &MethodId) {
        self.skipped.insert(method.clone());
    }

    pub fn is_skipped(&self, method: &MethodId) -> bool {
        self.skipped.contains(method)
    }

    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    pub fn max_runs_allowed(&self) -> u32 {
        self.max_runs_allowed
    }

    pub fn requested_runs(&self) -> u32 {
        self.requested_runs
    }

    /// Advance to the next run and return its 1-based number
    pub(crate) fn begin_run(&mut self) -> u32 {
        self.run_number += 1;
        self.run_number
    }

    /// Ask for `reruns` more runs after the current one, within the budget
    pub(crate) fn request_reruns(&mut self, reruns: u32) {
        let wanted = self.requested_runs.max(self.run_number.saturating_add(reruns));
        let requested = wanted.min(self.max_runs_allowed);
        if requested > self.requested_runs {
            tracing::info!(
                "Requesting {} run(s) in total after run {}",
                requested,
                self.run_number
            );
        }
        self.requested_runs = requested;
    }

    pub fn is_last_allowed_run(&self) -> bool {
        self.run_number >= self.max_runs_allowed
    }

    /// Whether the runner should measure again
    pub fn needs_rerun(&self) -> bool {
        self.safe_to_continue
            && !self.state.is_final()
            && self.run_number < self.requested_runs
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn add_message(
        &mut self,
        severity: MessageSeverity,
        target: Option<&MethodId>,
        text: impl Into<String>,
    ) {
        let message = Message {
            severity,
            run: self.run_number,
            target: target.map(|t| t.to_string()),
            text: text.into(),
        };
        match severity {
            MessageSeverity::Informational => tracing::debug!("{}", message),
            MessageSeverity::Warning => tracing::warn!("{}", message),
            _ => tracing::error!("{}", message),
        }
        if severity == MessageSeverity::CriticalError {
            self.safe_to_continue = false;
        }
        self.messages.push(message);
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity.is_error())
    }

    pub fn highest_severity(&self) -> Option<MessageSeverity> {
        self.messages.iter().map(|m| m.severity).max()
    }

    pub fn safe_to_continue(&self) -> bool {
        self.safe_to_continue
    }

    pub fn limits_adjusted(&self) -> bool {
        self.limits_adjusted
    }

    pub(crate) fn mark_limits_adjusted(&mut self) {
        self.limits_adjusted = true;
    }

    pub fn state(&self) -> CompetitionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: CompetitionState) {
        if self.state != state {
            tracing::debug!("Competition state {:?} -> {:?}", self.state, state);
        }
        self.state = state;
    }

    /// Completed without any error-level message
    pub fn passed(&self) -> bool {
        self.state == CompetitionState::Completed && !self.has_errors()
    }
}
