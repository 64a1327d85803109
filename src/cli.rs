//! CLI argument parsing and recorded-measurement input for limitador

use crate::annotations::{FakeSourceLocator, SourceAnnotationInfo, SourceChecksum};
use crate::competition::{
    CompetitionOverrides, LimitStorage, MeasurementHarness, MethodId, RunSamples,
    TargetDescriptor,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Output format for the pass report
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "limitador")]
#[command(version)]
#[command(
    about = "Check benchmark results against stored limits and re-baseline them",
    long_about = None
)]
pub struct Cli {
    /// Enable debug tracing on stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay recorded measurements through a competition pass
    Check(CheckArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Recorded measurements (JSON)
    #[arg(long, value_name = "FILE")]
    pub measurements: PathBuf,

    /// Configuration file with a [competition] table
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Benchmark binary with debug info, used to locate inline limits
    #[arg(long, value_name = "PATH")]
    pub binary: Option<PathBuf>,

    /// Source checksums recorded when the binary was built (JSON)
    #[arg(long, value_name = "FILE", requires = "binary")]
    pub checksums: Option<PathBuf>,

    /// Widen exceeded limits instead of failing
    #[arg(long)]
    pub adjust: bool,

    /// Do not write adjusted limits back
    #[arg(long = "no-annotate")]
    pub no_annotate: bool,

    /// Maximum number of runs in the pass
    #[arg(long = "max-runs", value_name = "N")]
    pub max_runs: Option<u32>,

    /// Extra runs after a limit was adjusted
    #[arg(long, value_name = "N")]
    pub reruns: Option<u32>,

    /// Previous run log (path or file:// URI) to seed limits from
    #[arg(long = "previous-log", value_name = "URI")]
    pub previous_log: Option<String>,

    /// Ignore limits already stored in sources and sidecar files
    #[arg(long = "ignore-existing")]
    pub ignore_existing: bool,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl CheckArgs {
    /// Flags that override the configuration file
    pub fn overrides(&self) -> CompetitionOverrides {
        CompetitionOverrides {
            adjust_limits: self.adjust.then_some(true),
            annotate: self.no_annotate.then_some(false),
            ignore_existing_annotations: self.ignore_existing.then_some(true),
            reruns_if_adjusted: self.reruns,
            max_runs_allowed: self.max_runs,
            previous_run_log: self.previous_log.clone(),
        }
    }
}

/// Source location of a method, as given in the measurements file
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedLocation {
    pub path: PathBuf,
    pub line: u32,
}

/// Measurements recorded by an external harness
///
/// ```json
/// {
///   "targets": [{ "method": "sorting::std_sort", "baseline": true }],
///   "locations": { "sorting::std_sort": { "path": "benches/sorting.rs", "line": 12 } },
///   "runs": [{ "sorting::std_sort": { "time_ns": [100.0, 102.0] } }]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedMeasurements {
    pub targets: Vec<TargetDescriptor>,

    #[serde(default)]
    pub locations: BTreeMap<String, RecordedLocation>,

    pub runs: Vec<BTreeMap<String, BTreeMap<String, Vec<f64>>>>,
}

impl RecordedMeasurements {
    /// Load from a JSON file; relative source and sidecar paths are resolved
    /// against its directory
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut recorded = Self::from_json_str(&content)?;

        if let Some(base) = path.parent() {
            for location in recorded.locations.values_mut() {
                if location.path.is_relative() {
                    location.path = base.join(&location.path);
                }
            }
            for target in &mut recorded.targets {
                if let LimitStorage::Sidecar { path } = &mut target.storage {
                    if path.is_relative() {
                        *path = base.join(&*path);
                    }
                }
            }
        }
        Ok(recorded)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let recorded: Self =
            serde_json::from_str(content).context("Failed to parse measurements JSON")?;
        if recorded.targets.is_empty() {
            anyhow::bail!("Measurements file lists no targets");
        }
        Ok(recorded)
    }

    /// Locator for the listed locations, with checksums of the files as they are now
    pub fn locator(&self) -> Result<FakeSourceLocator> {
        let mut locator = FakeSourceLocator::new();
        for (method, location) in &self.locations {
            let checksum = SourceChecksum::of_file(&location.path)
                .with_context(|| format!("Failed to hash {}", location.path.display()))?;
            locator.insert(
                MethodId::new(method.as_str()),
                SourceAnnotationInfo {
                    path: location.path.clone(),
                    method_line: location.line,
                    checksum,
                },
            );
        }
        Ok(locator)
    }

    pub fn harness(&self) -> RecordedHarness {
        let runs = self
            .runs
            .iter()
            .map(|run| {
                run.iter()
                    .map(|(method, by_key)| {
                        let samples = by_key
                            .iter()
                            .map(|(key, values)| (key.clone(), values.clone()))
                            .collect();
                        (MethodId::new(method.as_str()), samples)
                    })
                    .collect()
            })
            .collect();
        RecordedHarness { runs }
    }
}

/// Replays recorded runs; run `k` gets `runs[min(k-1, len-1)]`
#[derive(Debug, Clone)]
pub struct RecordedHarness {
    runs: Vec<RunSamples>,
}

impl MeasurementHarness for RecordedHarness {
    fn measure(
        &mut self,
        _targets: &[TargetDescriptor],
        run_number: u32,
    ) -> Result<RunSamples> {
        if self.runs.is_empty() {
            anyhow::bail!("No recorded runs to replay");
        }
        let index = (run_number.max(1) as usize - 1).min(self.runs.len() - 1);
        Ok(self.runs[index].clone())
    }
}
