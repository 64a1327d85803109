use anyhow::{Context, Result};
use clap::Parser;
use limitador::annotations::{ChecksumManifest, DwarfSourceLocator, SourceLocator};
use limitador::cli::{CheckArgs, Cli, Command, OutputFormat, RecordedMeasurements};
use limitador::competition::{CompetitionConfig, CompetitionRunner};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Build the source locator: DWARF when a binary is given, otherwise the
/// locations listed in the measurements file
fn build_locator(
    args: &CheckArgs,
    recorded: &RecordedMeasurements,
) -> Result<Box<dyn SourceLocator>> {
    match &args.binary {
        Some(binary) => {
            let mut locator = DwarfSourceLocator::load(binary)?;
            if let Some(checksums) = &args.checksums {
                locator = locator.with_manifest(ChecksumManifest::from_file(checksums)?);
            }
            Ok(Box::new(locator))
        }
        None => Ok(Box::new(recorded.locator()?)),
    }
}

/// Run one competition pass; returns whether it passed
fn run_check(args: &CheckArgs) -> Result<bool> {
    let config = match &args.config {
        Some(path) => CompetitionConfig::from_file(path)?,
        None => CompetitionConfig::default(),
    }
    .merge(&args.overrides());
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let recorded = RecordedMeasurements::from_file(&args.measurements)?;
    let locator = build_locator(args, &recorded)?;
    let runner = CompetitionRunner::new(config, locator, recorded.targets.clone())?;

    let report = runner.run(&mut recorded.harness())?;

    match args.format {
        OutputFormat::Text => print!("{}", report.to_report_string()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        ),
    }

    Ok(report.passed)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(cli.debug);

    match &cli.command {
        Command::Check(args) => {
            if !run_check(args)? {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
