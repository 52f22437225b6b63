//! Command-line entry point.
//!
//! # Startup sequence
//!
//! 1. Initialise logging (`RUST_LOG`, default `info`).
//! 2. Load [`AppConfig`] from `--config` or the platform path (defaults on
//!    first run), then apply command-line overrides.
//! 3. Create the [`tokio`] runtime (multi-thread).
//! 4. Submit one job and block until it reports.
//! 5. Print the output reference (or a JSON report) and exit non-zero on
//!    failure.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use slowdown::audio::Strategy;
use slowdown::config::AppConfig;
use slowdown::job::JobCoordinator;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    /// Relabel the sample rate; pitch follows speed.
    Resample,
    /// Time-stretch through the processing graph; pitch is kept.
    Stretch,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Resample => Strategy::DirectResample,
            StrategyArg::Stretch => Strategy::TimeStretch,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Slow down a recorded WAV file")]
struct Args {
    /// Input WAV file, as a path or a `file://` URI.
    input: String,

    /// Processing strategy (overrides `processing.strategy`).
    #[arg(short, long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Playback speed factor (overrides `processing.rate_multiplier`).
    #[arg(short, long)]
    rate: Option<f64>,

    /// Settings file to use instead of the platform default.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the processed file (overrides `output.directory`).
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Fail when a time-stretch result was truncated.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// Print the completion report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn load_config(args: &Args) -> AppConfig {
    let loaded = match &args.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    if let Some(strategy) = args.strategy {
        config.processing.strategy = strategy.into();
    }
    if let Some(rate) = args.rate {
        config.processing.rate_multiplier = rate;
    }
    if let Some(dir) = &args.output_dir {
        config.output.directory = Some(dir.clone());
    }
    if args.strict {
        config.processing.strict_completion = true;
    }
    config
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args);
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "slowing {} to {}x ({})",
        args.input,
        config.processing.rate_multiplier,
        config.processing.strategy.label()
    );

    let coordinator = JobCoordinator::from_config(&config);
    let result = rt.block_on(async { coordinator.submit(&args.input).wait().await });

    match result {
        Ok(done) => {
            if args.json {
                match serde_json::to_string_pretty(&done) {
                    Ok(json) => println!("{json}"),
                    Err(e) => log::error!("failed to encode report: {e}"),
                }
            } else {
                println!("{}", done.output_uri);
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            if args.json {
                match serde_json::to_string_pretty(&failure) {
                    Ok(json) => println!("{json}"),
                    Err(e) => log::error!("failed to encode report: {e}"),
                }
            } else {
                eprintln!("{failure}");
            }
            ExitCode::FAILURE
        }
    }
}
