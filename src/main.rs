use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use clap::Parser;
use verizip::logging::{self, Logger, TracingLogger};
use verizip::notify::{ConsoleSink, MacNotificationSink, NotificationSink};
use verizip::{HashAlgorithm, RunConfig, Verifier, report};

const EXIT_FAILED: i32 = 1;
const EXIT_MISMATCH: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "verizip",
    version,
    about = "Create a zip and verify every entry against its source by content hash"
)]
struct Cli {
    /// Items to compress.
    inputs: Vec<PathBuf>,
    /// Filename for the zip.
    #[arg(short, long, alias = "output_path")]
    output: Option<PathBuf>,
    /// Directory for a default-named zip.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Place all files in the zip within a shared parent folder.
    #[arg(short = 'd', long)]
    root_directory: bool,
    /// Ignore files and folders beginning with '.'.
    #[arg(long)]
    ignore_dotfiles: bool,
    /// Ignore folders named 'System Volume Information' and '$RECYCLE.BIN'.
    #[arg(long)]
    ignore_windows_volume_folders: bool,
    #[arg(long, value_enum)]
    algorithm: Option<HashAlgorithm>,
    /// JSON file with default run options; flags given here take precedence.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Show desktop notifications for start, success and failure.
    #[arg(long)]
    notify: bool,
    /// Print the verified archive summary as JSON.
    #[arg(long)]
    json: bool,
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    match run_cli() {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(EXIT_FAILED);
        }
    }
}

fn run_cli() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(if cli.verbose { "debug" } else { "info" })
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))?;

    let config = merge_config(&cli)?;
    let timestamp = report::run_timestamp(Local::now());
    let resolved = config
        .resolve(&timestamp)
        .context("invalid run configuration")?;

    let logger = TracingLogger;
    let notifier: Box<dyn NotificationSink + '_> = if cli.notify {
        Box::new(MacNotificationSink::new(&logger))
    } else {
        Box::new(ConsoleSink)
    };

    let mut verifier = Verifier::new(resolved, &logger, notifier.as_ref());
    match verifier.run() {
        Ok(verified) => {
            if cli.json {
                let json = serde_json::to_string_pretty(&verified)
                    .context("failed to serialize run summary")?;
                println!("{json}");
            }
            Ok(0)
        }
        Err(failure) if failure.is_mismatch() => Ok(EXIT_MISMATCH),
        Err(failure) => {
            logger.debug(&format!("run stopped during {:?}", failure.failed_in));
            Ok(EXIT_FAILED)
        }
    }
}

fn merge_config(cli: &Cli) -> Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };

    if !cli.inputs.is_empty() {
        config.inputs = cli.inputs.clone();
    }
    if cli.output.is_some() {
        config.output = cli.output.clone();
    }
    if cli.output_dir.is_some() {
        config.output_dir = cli.output_dir.clone();
    }
    config.root_directory |= cli.root_directory;
    config.ignore_dotfiles |= cli.ignore_dotfiles;
    config.ignore_windows_volume_folders |= cli.ignore_windows_volume_folders;
    if let Some(algorithm) = cli.algorithm {
        config.algorithm = algorithm;
    }
    Ok(config)
}
