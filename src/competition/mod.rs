// Competition analysis: check measured targets against stored limits
//
// A competition compares candidate methods against one baseline method. Each
// candidate's ratio to the baseline must stay inside the limit stored next to
// the candidate (inline directive or sidecar file). When adjustment is enabled
// an exceeded limit is widened, written back, and the measurement rerun until
// the limits hold or the run budget is spent.
//
// Module layout:
// - target:   per-method limit values
// - analysis: pass state and messages
// - analyser: one pass over the state machine
// - runner:   measurement/rerun loop and report
// - config:   pass configuration
// - session:  state shared between passes

mod analyser;
mod analysis;
mod config;
mod runner;
mod session;
mod target;

pub use analyser::{CompetitionAnalyser, RunSamples, LIMIT_ROUNDING_DIGITS};
pub use analysis::{
    AnalysisError, CompetitionAnalysis, CompetitionState, Message, MessageSeverity,
};
pub use config::{CompetitionConfig, CompetitionOverrides};
pub use runner::{
    CompetitionReport, CompetitionRunner, MeasurementHarness, MetricLimit, TargetLimits,
};
pub use session::CompetitionSession;
pub use target::{
    CompetitionMetricValue, CompetitionTarget, LimitStorage, MethodId, TargetDescriptor,
    TargetError,
};
