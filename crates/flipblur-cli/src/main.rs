//! flipblur - mirror a raw 8-bit raster and box-blur the result
//!
//! Reads `width * height` raw bytes, writes the horizontal flip and the blur
//! of the flip as raw bytes.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use flipblur_compute::Backend;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "flipblur")]
#[command(author, version, about = "Horizontal flip + box blur of raw 8-bit rasters")]
#[command(args_conflicts_with_subcommands = true)]
#[command(long_about = "
Flips a single-channel 8-bit raster left to right, then box-blurs the flipped
image. Input and outputs are raw row-major bytes with no header.

Examples:
  flipblur                                   # 1024x768, k=5, ./input_image.jpg
  flipblur -W 640 -H 480 -k 9 --backend cuda
  flipblur --input-dir in --output-dir out --verify
  flipblur backends                          # List compute backends
")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Number of threads (0 = auto)
    #[arg(short = 'j', long, global = true, default_value = "0")]
    threads: usize,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List compute backends detected on this machine
    Backends,
}

/// Flip/blur run parameters. Unset flags fall back to FLIPBLUR_* env, then defaults.
#[derive(Args, Debug)]
struct RunArgs {
    /// Image width in pixels
    #[arg(short = 'W', long)]
    width: Option<u32>,

    /// Image height in pixels
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Blur window size (odd, >= 1)
    #[arg(short = 'k', long)]
    window: Option<u32>,

    /// Input file name
    #[arg(short, long)]
    input: Option<String>,

    /// Flip output file name
    #[arg(long)]
    flip_output: Option<String>,

    /// Blur output file name
    #[arg(long)]
    blur_output: Option<String>,

    /// Directory holding the input
    #[arg(long, default_value = ".")]
    input_dir: PathBuf,

    /// Directory receiving the outputs
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Compute backend: auto, cpu, wgpu, cuda
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Cap on device memory in MB
    #[arg(long)]
    mem_mb: Option<u64>,

    /// Check results against the sequential host kernels
    #[arg(long)]
    verify: bool,
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let name = path.file_name().context("Log file path has no file name")?;
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .context("Failed to install logger")?;
            Ok(Some(guard))
        }
        None => {
            registry.try_init().context("Failed to install logger")?;
            Ok(None)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    // Configure thread pool
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    match cli.command {
        Some(Commands::Backends) => commands::backends::run(cli.verbose),
        None => commands::run::run(cli.run, cli.verbose),
    }
}
