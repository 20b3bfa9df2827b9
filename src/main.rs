//! Binary entrypoint for seam-carver.
//!
//! Delegates all logic to the library crate.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use seam_carver::batch::{BatchRequest, run_batch};
use seam_carver::config::Configuration;

#[derive(Debug, Parser)]
#[command(name = "seam-carver", about = "Content-aware image resizing on the GPU")]
struct Cli {
    /// Path to YAML config file; built-in defaults when omitted
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override the edge length of the backing storage
    #[arg(long, value_name = "PIXELS", global = true)]
    max_image_size: Option<u32>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open an interactive window
    View {
        /// Image to load at startup
        image: Option<PathBuf>,
        /// Where Ctrl+S saves the carved image
        #[arg(short, long, value_name = "FILE", default_value = "carved.png")]
        output: PathBuf,
    },
    /// Carve a file to a target size without a window
    Carve {
        input: PathBuf,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Also write the final energy map as a greyscale image
        #[arg(long, value_name = "FILE")]
        dump_energy: Option<PathBuf>,
    },
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("seam_carver={level}").parse()?)
        .add_directive("wgpu=warn".parse()?)
        .add_directive("wgpu_core=warn".parse()?)
        .add_directive("wgpu_hal=warn".parse()?)
        .add_directive("naga=warn".parse()?)
        .add_directive("winit=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Configuration> {
    let mut cfg = match &cli.config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Configuration::default(),
    };
    if let Some(max) = cli.max_image_size {
        cfg.max_image_size = max;
    }
    cfg.validated().context("validating configuration")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let cfg = load_config(&cli)?;
    info!(max_image_size = cfg.max_image_size, "configuration loaded");

    match cli.command {
        Command::View { image, output } => seam_carver::app::run_view(cfg, image, output),
        Command::Carve {
            input,
            width,
            height,
            output,
            dump_energy,
        } => {
            let request = BatchRequest {
                input,
                width,
                height,
                output,
                dump_energy,
            };
            run_batch(&cfg, &request).map(drop)
        }
    }
}
