//! Run log reuse across consecutive passes
//!
//! These tests change the process working directory so that relative run
//! log locations resolve into a temp dir, hence `#[serial]`.

use limitador::annotations::FakeSourceLocator;
use limitador::competition::{
    CompetitionConfig, CompetitionReport, CompetitionRunner, CompetitionSession,
    LimitStorage, MeasurementHarness, MessageSeverity, MethodId, RunSamples, TargetDescriptor,
};
use serial_test::serial;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const SOURCE: &str = "#[competition_bench(baseline)]\n\
                      fn std_sort() {}\n\
                      \n\
                      #[competition_bench]\n\
                      fn quick_sort() {}\n";

const RUN_LOG: &str = "bench output before the block\n\
                       ----- limitador limits begin -----\n\
                       [[competition]]\n\
                       target = \"sorting\"\n\
                       [[competition.candidate]]\n\
                       target = \"quick_sort\"\n\
                       min_ratio = 1.9\n\
                       max_ratio = 2.1\n\
                       ----- limitador limits end -----\n";

/// Restores the working directory on drop
struct CwdGuard(PathBuf);

impl CwdGuard {
    fn enter(dir: &Path) -> Self {
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        Self(previous)
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.0);
    }
}

struct SteadyHarness;

impl MeasurementHarness for SteadyHarness {
    fn measure(&mut self, _: &[TargetDescriptor], _: u32) -> anyhow::Result<RunSamples> {
        let mut run = HashMap::new();
        for (method, values) in [
            ("sorting::std_sort", [100.0, 102.0, 98.0, 101.0, 99.0]),
            ("sorting::quick_sort", [190.0, 205.0, 198.0, 200.0, 202.0]),
        ] {
            let mut by_key = HashMap::new();
            by_key.insert("time_ns".to_string(), values.to_vec());
            run.insert(MethodId::new(method), by_key);
        }
        Ok(run)
    }
}

fn runner(dir: &Path) -> CompetitionRunner {
    let source = dir.join("sorting.rs");
    let locator = FakeSourceLocator::new()
        .with_file("sorting::std_sort", &source, 2)
        .unwrap()
        .with_file("sorting::quick_sort", &source, 5)
        .unwrap();
    let config = CompetitionConfig {
        previous_run_log: Some("previous.log".to_string()),
        ..CompetitionConfig::default()
    };
    CompetitionRunner::new(
        config,
        Box::new(locator),
        vec![
            TargetDescriptor::new("sorting::std_sort", true, LimitStorage::Source),
            TargetDescriptor::new("sorting::quick_sort", false, LimitStorage::Transient),
        ],
    )
    .unwrap()
}

fn candidate_limit(report: &CompetitionReport) -> &str {
    &report.limits[1].metrics[0].limit
}

fn warned(report: &CompetitionReport, needle: &str) -> bool {
    report
        .messages
        .iter()
        .any(|m| m.severity == MessageSeverity::Warning && m.text.contains(needle))
}

#[test]
#[serial]
fn test_run_log_is_cached_across_passes() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sorting.rs"), SOURCE).unwrap();
    fs::write(dir.path().join("previous.log"), RUN_LOG).unwrap();
    let _cwd = CwdGuard::enter(dir.path());

    let runner = runner(dir.path());
    let mut session = CompetitionSession::new();

    let first = runner.run_in_session(&mut SteadyHarness, &mut session).unwrap();
    assert!(first.passed);
    assert_eq!(candidate_limit(&first), "[1.90..2.10]");

    // Later passes reuse the cached text even if the file is gone
    fs::remove_file(dir.path().join("previous.log")).unwrap();
    let second = runner.run_in_session(&mut SteadyHarness, &mut session).unwrap();
    assert_eq!(candidate_limit(&second), "[1.90..2.10]");
    assert!(!warned(&second, "previous run log not used"));
    assert_eq!(session.passes(), 2);
}

#[test]
#[serial]
fn test_reset_forces_run_log_reload() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sorting.rs"), SOURCE).unwrap();
    fs::write(dir.path().join("previous.log"), RUN_LOG).unwrap();
    let _cwd = CwdGuard::enter(dir.path());

    let runner = runner(dir.path());
    let mut session = CompetitionSession::new();
    runner.run_in_session(&mut SteadyHarness, &mut session).unwrap();

    fs::remove_file(dir.path().join("previous.log")).unwrap();
    session.reset();
    assert!(session.run_logs().is_empty());

    let report = runner.run_in_session(&mut SteadyHarness, &mut session).unwrap();
    assert!(warned(&report, "previous run log not used"));
    assert!(warned(&report, "no limit stored"));
    assert_eq!(session.passes(), 1);
}

#[test]
#[serial]
fn test_file_uri_and_path_are_cached_separately() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("previous.log");
    fs::write(&log, RUN_LOG).unwrap();
    let _cwd = CwdGuard::enter(dir.path());

    let mut session = CompetitionSession::new();
    let by_path = session.run_logs_mut().read("previous.log").unwrap();
    let by_uri = session
        .run_logs_mut()
        .read(&format!("file://{}", log.display()))
        .unwrap();

    assert_eq!(by_path, by_uri);
    assert_eq!(session.run_logs().len(), 2);
    assert!(session.run_logs_mut().read("https://example.com/run.log").is_err());
}
