//! Flux CLI - Command-line interface for Flux HSI
//!
//! Commands:
//! - convert: Convert a vendor payload into HSI daily records
//! - baselines inspect: Summarize a saved baseline snapshot
//! - version: Print the library version

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use flux_hsi::config::CONFIG_ENV_VAR;
use flux_hsi::{
    BaselineStore, ComputeError, ConfigError, FluxConfig, FluxProcessor, ProcessorConfig, Vendor,
    FLUX_VERSION, PRODUCER_NAME,
};

/// Flux - wearable payloads to HSI records with rolling baselines
#[derive(Parser)]
#[command(name = "flux")]
#[command(version = FLUX_VERSION)]
#[command(about = "Convert wearable vendor payloads into HSI records", long_about = None)]
struct Cli {
    /// Config file (TOML); falls back to $FLUX_CONFIG
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a vendor payload into a JSON array of HSI daily records
    Convert {
        /// Payload vendor (whoop or garmin)
        #[arg(long)]
        vendor: Vendor,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// User timezone (IANA format, e.g., "America/New_York")
        #[arg(long)]
        timezone: Option<String>,

        /// Device ID for provenance and baseline keys
        #[arg(long)]
        device_id: Option<String>,

        /// Baseline window in days (<= 0 selects the default)
        #[arg(long, allow_hyphen_values = true)]
        baseline_days: Option<i64>,

        /// Load baselines from file before converting
        #[arg(long)]
        load_baselines: Option<PathBuf>,

        /// Save baselines to file after converting
        #[arg(long)]
        save_baselines: Option<PathBuf>,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Work with saved baseline snapshots
    Baselines {
        #[command(subcommand)]
        command: BaselineCommands,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum BaselineCommands {
    /// Print a per-key summary of a snapshot
    Inspect { path: PathBuf },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = serde_json::to_string(&CliError::from(e))
                .unwrap_or_else(|_| "Unknown error".to_string());
            eprintln!("{error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FluxCliError> {
    match cli.command {
        Commands::Convert {
            vendor,
            input,
            output,
            timezone,
            device_id,
            baseline_days,
            load_baselines,
            save_baselines,
            pretty,
        } => {
            let config = FluxConfig::load(cli.config.as_deref())?;
            let request = ConvertRequest {
                vendor,
                timezone: timezone.unwrap_or(config.defaults.timezone),
                device_id: device_id.unwrap_or(config.defaults.device_id),
                processor: ProcessorConfig {
                    baseline_window_days: baseline_days
                        .unwrap_or(config.processor.baseline_window_days),
                    instance_id: config.processor.instance_id,
                },
                load_baselines,
                save_baselines,
                pretty,
            };
            cmd_convert(&input, &output, request)
        }
        Commands::Baselines {
            command: BaselineCommands::Inspect { path },
        } => cmd_inspect(&path),
        Commands::Version => {
            println!("{PRODUCER_NAME} {FLUX_VERSION}");
            Ok(())
        }
    }
}

struct ConvertRequest {
    vendor: Vendor,
    timezone: String,
    device_id: String,
    processor: ProcessorConfig,
    load_baselines: Option<PathBuf>,
    save_baselines: Option<PathBuf>,
    pretty: bool,
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn read_input(input: &Path) -> Result<String, FluxCliError> {
    if !is_stdio(input) {
        return Ok(fs::read_to_string(input)?);
    }
    if atty::is(atty::Stream::Stdin) {
        return Err(FluxCliError::InteractiveStdin);
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

fn cmd_convert(input: &Path, output: &Path, request: ConvertRequest) -> Result<(), FluxCliError> {
    let input_data = read_input(input)?;
    let mut processor = FluxProcessor::from_config(&request.processor);

    if let Some(path) = &request.load_baselines {
        processor.load_baselines(&fs::read_to_string(path)?)?;
    }

    let hsi_json = processor.process(
        request.vendor,
        &input_data,
        &request.timezone,
        &request.device_id,
    )?;

    if let Some(path) = &request.save_baselines {
        fs::write(path, processor.save_baselines()?)?;
    }

    let output_data = if request.pretty {
        let value: serde_json::Value = serde_json::from_str(&hsi_json)?;
        serde_json::to_string_pretty(&value)?
    } else {
        hsi_json
    };

    if is_stdio(output) {
        println!("{output_data}");
    } else {
        fs::write(output, output_data)?;
    }
    Ok(())
}

#[derive(Serialize)]
struct SnapshotSummary {
    window_days: u32,
    keys: Vec<KeySummary>,
}

#[derive(Serialize)]
struct KeySummary {
    device_id: String,
    signal: &'static str,
    sample_days: u32,
    first: String,
    last: String,
    mean: f64,
    std_dev: Option<f64>,
}

fn cmd_inspect(path: &Path) -> Result<(), FluxCliError> {
    let store = BaselineStore::from_json(&fs::read_to_string(path)?)?;

    let keys = store
        .keys()
        .filter_map(|key| {
            let stats = store.window(&key.device_id, key.signal)?.stats()?;
            Some(KeySummary {
                device_id: key.device_id.clone(),
                signal: key.signal.as_str(),
                sample_days: stats.count,
                first: stats.first.to_string(),
                last: stats.last.to_string(),
                mean: stats.mean,
                std_dev: stats.std_dev(),
            })
        })
        .collect();

    let summary = SnapshotSummary {
        window_days: store.window_days(),
        keys,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[derive(Debug, Error)]
enum FluxCliError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("refusing to read a payload from an interactive terminal")]
    InteractiveStdin,
}

#[derive(Serialize)]
struct CliError {
    code: String,
    kind: Option<&'static str>,
    message: String,
    hint: Option<String>,
}

impl From<FluxCliError> for CliError {
    fn from(e: FluxCliError) -> Self {
        let message = e.to_string();
        match e {
            FluxCliError::Io(_) => CliError {
                code: "IO_ERROR".to_string(),
                kind: None,
                message,
                hint: Some("Check file paths and permissions".to_string()),
            },
            FluxCliError::Compute(err) => CliError {
                code: "COMPUTE_ERROR".to_string(),
                kind: Some(err.kind().as_str()),
                message,
                hint: None,
            },
            FluxCliError::Json(_) => CliError {
                code: "JSON_ERROR".to_string(),
                kind: None,
                message,
                hint: Some("Check JSON syntax".to_string()),
            },
            FluxCliError::Config(_) => CliError {
                code: "CONFIG_ERROR".to_string(),
                kind: None,
                message,
                hint: Some(format!("Check the file given by --config or ${CONFIG_ENV_VAR}")),
            },
            FluxCliError::InteractiveStdin => CliError {
                code: "NO_INPUT".to_string(),
                kind: None,
                message,
                hint: Some("Pipe a payload into stdin or pass --input <path>".to_string()),
            },
        }
    }
}
