//! softlog - CPU and memory logger for a set of processes.
//!
//! Samples until interrupted with Ctrl-C, then writes the log.
//!
//! Usage:
//!   softlog 1 csv out.csv 1234 5678      # one epoch per second, CSV
//!   softlog 0.5 json out.json 1234       # two epochs per second, JSON
//!   softlog --source top 2 csv out.csv 1 # sample through `top`

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use softlog::collector::{ProcfsProbe, ProcfsSource, RealFs, SampleSource, TopSource};
use softlog::config::{DEFAULT_MAX_CATCHUP, SamplerConfig, SourceKind};
use softlog::sampler::{Sampler, StopReason, install_shutdown_flag};
use softlog::storage::save;

/// Logs CPU and memory usage of processes until interrupted.
#[derive(Parser)]
#[command(name = "softlog", about = "CPU and memory logger for processes", version)]
struct Args {
    /// Epoch length in seconds (may be fractional).
    #[arg(value_name = "INTERVAL")]
    interval: f64,

    /// Output format: "json", anything else writes CSV.
    #[arg(value_name = "FORMAT")]
    format: String,

    /// Output file, replaced when the log is saved.
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Processes to watch.
    #[arg(value_name = "PID", required = true, num_args = 1..)]
    pids: Vec<u32>,

    /// Where CPU usage comes from: "procfs" or "top".
    #[arg(long, default_value = "procfs", value_parser = parse_source)]
    source: SourceKind,

    /// Path to /proc filesystem.
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Maximum number of lagged epochs filled in at once (0 = unlimited).
    #[arg(long, default_value_t = DEFAULT_MAX_CATCHUP)]
    max_catchup: usize,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_source(s: &str) -> Result<SourceKind, String> {
    s.parse().map_err(|e: softlog::config::ConfigError| e.to_string())
}

/// Initializes the tracing subscriber on stderr; stdout carries progress.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("softlog={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version go to stdout and are not failures.
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
            let _ = e.print();
            return code;
        }
    };

    init_logging(args.verbose, args.quiet);

    let config = match SamplerConfig::new(args.interval, &args.format, args.file, args.pids)
        .with_source(args.source)
        .with_proc_path(args.proc_path)
        .with_max_catchup(args.max_catchup)
        .validate()
    {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid arguments: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("softlog {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, format={}, output={}, pids={:?}, source={}",
        config.interval,
        config.format,
        config.output.display(),
        config.pids,
        config.source
    );
    if !config.pids_sorted() {
        warn!("PIDs are not in ascending order; CSV columns follow the given order, the header is sorted");
    }

    // Ctrl-C is the only way to stop and save, so sampling without it is pointless.
    let shutdown = match install_shutdown_flag() {
        Ok(flag) => flag,
        Err(e) => {
            error!("Failed to set Ctrl-C handler: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let probe = ProcfsProbe::new(RealFs::new(), config.proc_path.clone());
    let mut source: Box<dyn SampleSource> = match config.source {
        SourceKind::Procfs => {
            let Ok(interval) = Duration::try_from_secs_f64(config.interval) else {
                error!("Interval {}s is out of range", config.interval);
                return ExitCode::FAILURE;
            };
            match ProcfsSource::new(
                ProcfsProbe::new(RealFs::new(), config.proc_path.clone()),
                &config.pids,
                interval,
            ) {
                Ok(source) => Box::new(source),
                Err(e) => {
                    error!("Failed to start sampling: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        SourceKind::Top => match TopSource::spawn(config.interval, &config.pids, probe.cpu_threads()) {
            Ok(source) => Box::new(source),
            Err(e) => {
                error!("Failed to start sampling: {}", e);
                return ExitCode::FAILURE;
            }
        },
    };

    info!("Press Ctrl+C to stop logging!");
    let outcome = Sampler::new(&config).run(source.as_mut(), &probe, &shutdown);
    drop(source);

    if outcome.reason == StopReason::Interrupted {
        println!(
            "Logging halted! Saving log to {} as {}!",
            config.output.display(),
            config.format
        );
    }

    let epochs = outcome.store.len();
    if let Err(e) = save(
        &config.output,
        config.format,
        outcome.store,
        &config.pids,
        config.interval,
    ) {
        error!("Failed to save log to {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }
    debug!("Saved {} epochs", epochs);

    match outcome.reason {
        StopReason::Interrupted => ExitCode::SUCCESS,
        StopReason::SourceClosed => {
            info!("Log saved to {}", config.output.display());
            ExitCode::FAILURE
        }
    }
}
