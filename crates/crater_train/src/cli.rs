use crate::config::default_config;
use crate::train::TrainArgs;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Crater diffusion training toolchain", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train the denoiser
    Train(TrainArgs),

    /// Print (or write) the default training config as JSON (Default)
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Write to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

pub fn run_config(args: ConfigArgs) -> Result<()> {
    let config = default_config();
    match args.output {
        Some(path) => {
            config.save_json(&path)?;
            info!("✅ Default config written to {:?}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(&config)?),
    }
    Ok(())
}
