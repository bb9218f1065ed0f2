//! advnin CLI - inspect, initialize and run Network-in-Network models
//!
//! Examples:
//!   advnin describe --arch regressor
//!   advnin init --config nin.json --output nin.safetensors
//!   advnin forward --checkpoint nin.safetensors --features conv1,classifier

use std::path::PathBuf;

use advnin_core::{
    ArchitectureConfig, AvdNinConfig, DeviceProfile, DeviceSelector, ImageType, NinConfig,
    RegressorConfig,
};
use anyhow::{Context, Result};
use candle_core::DType;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod model;
mod output;

use commands::{forward::ForwardArgs, init::InitArgs};

#[derive(Parser)]
#[command(
    name = "advnin",
    about = "Network-in-Network models with natural/adversarial batch norms",
    version = env!("CARGO_PKG_VERSION"),
    arg_required_else_help = true,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Architecture config file (JSON, tagged by "architecture")
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Architecture with default settings, used when no config file is given
    #[arg(long, global = true, value_enum, default_value = "nin")]
    pub arch: Arch,

    /// Device to run on: auto, cpu, cuda or metal
    #[arg(long, global = true, default_value = "auto", env = "ADVNIN_DEVICE")]
    pub device: String,

    /// Weight dtype on CUDA: f32, f16 or bf16 (CPU and Metal always use f32)
    #[arg(long, global = true, value_name = "DTYPE", env = "ADVNIN_DTYPE")]
    pub dtype: Option<String>,

    /// Output format
    #[arg(
        long = "output-format",
        global = true,
        value_enum,
        default_value = "table"
    )]
    pub output_format: OutputFormat,

    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the layer layout and parameter count of a model
    #[command(name = "describe", alias = "info")]
    Describe,

    /// Initialize fresh weights and save them as safetensors
    #[command(name = "init")]
    Init {
        /// Checkpoint path (defaults to <checkpoint dir>/<architecture>.safetensors)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite an existing checkpoint
        #[arg(short, long)]
        force: bool,
    },

    /// Run a random batch through a model
    #[command(name = "forward", alias = "run")]
    Forward {
        /// Load weights from this safetensors checkpoint
        #[arg(short, long, value_name = "PATH")]
        checkpoint: Option<PathBuf>,

        /// Batch size
        #[arg(short, long, default_value = "2")]
        batch: usize,

        /// Height and width of the random images
        #[arg(short, long, default_value = "32")]
        size: usize,

        /// Image type of the (first) batch: nat or adv
        #[arg(long, default_value = "nat")]
        im_type: ImageType,

        /// Image type of the second regressor batch
        #[arg(long, default_value = "adv")]
        im_type2: ImageType,

        /// Feature blocks to return, comma separated
        #[arg(short, long, value_delimiter = ',')]
        features: Vec<String>,

        /// Run in training mode (batch statistics, dropout, running-stat updates)
        #[arg(long)]
        train: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Arch {
    Nin,
    Regressor,
    AvdNin,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

impl Cli {
    fn architecture(&self) -> Result<ArchitectureConfig> {
        let arch = match &self.config {
            Some(path) => ArchitectureConfig::from_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => match self.arch {
                Arch::Nin => ArchitectureConfig::Nin(NinConfig::default()),
                Arch::Regressor => ArchitectureConfig::Regressor(RegressorConfig::default()),
                Arch::AvdNin => ArchitectureConfig::AvdNin(AvdNinConfig::default()),
            },
        };
        arch.validate()?;
        Ok(arch)
    }

    fn resolve_dtype(&self, device: &DeviceProfile) -> DType {
        device.select_dtype(self.dtype.as_deref())
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "advnin_cli=debug,advnin_core=debug"
    } else {
        "advnin_cli=info,advnin_core=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let arch = cli.architecture()?;
    let device = DeviceSelector::detect_with_preference(Some(&cli.device))?;
    let dtype = cli.resolve_dtype(&device);
    debug!(
        "Using {} on {} ({:?})",
        arch.name(),
        device.kind.as_str(),
        dtype
    );

    let report = match cli.command {
        Commands::Describe => commands::describe::execute(&arch, &device, dtype)?,
        Commands::Init { output, force } => {
            commands::init::execute(InitArgs { output, force }, &arch, &device, dtype)?
        }
        Commands::Forward {
            checkpoint,
            batch,
            size,
            im_type,
            im_type2,
            features,
            train,
        } => commands::forward::execute(
            ForwardArgs {
                checkpoint,
                batch,
                size,
                im_type,
                im_type2,
                features,
                train,
            },
            &arch,
            &device,
            dtype,
        )?,
    };

    print!("{}", report.render(cli.output_format)?);
    Ok(())
}
