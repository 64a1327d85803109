// Process-level state shared by consecutive passes

use crate::annotations::RunLogCache;

/// Holds what outlives a single pass: the run log cache
///
/// Independent invocations (for example separate test suites in one
/// process) must call [`CompetitionSession::reset`] in between so a stale run
/// log is not reused.
#[derive(Debug, Default)]
pub struct CompetitionSession {
    run_logs: RunLogCache,
    passes: u32,
}

impl CompetitionSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_logs(&self) -> &RunLogCache {
        &self.run_logs
    }

    pub fn run_logs_mut(&mut self) -> &mut RunLogCache {
        &mut self.run_logs
    }

    /// Passes completed since creation or the last reset
    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub(crate) fn record_pass(&mut self) {
        self.passes += 1;
    }

    pub fn reset(&mut self) {
        tracing::debug!(
            "Resetting competition session ({} cached run logs, {} passes)",
            self.run_logs.len(),
            self.passes
        );
        self.run_logs.reset();
        self.passes = 0;
    }
}
