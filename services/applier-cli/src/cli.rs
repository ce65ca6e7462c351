//! Command-line arguments.

use anyhow::{anyhow, Context, Result};
use applier::{ApplierConfig, BlockSize, ExtentPolicy, NumWorkers, ResolutionPolicy};
use clap::{Args, Parser, Subcommand};
use geo_common::Resolution;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "applier-cli")]
#[command(about = "Blockwise raster processing from the command line", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stack all bands of the inputs on the derived grid
    Copy {
        /// Input rasters
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output raster (.bsq, .bil, .bip, .tif)
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Normalized difference (a - b) / (a + b) of two first bands
    Ndi {
        /// First input raster
        #[arg(long)]
        a: PathBuf,

        /// Second input raster
        #[arg(long)]
        b: PathBuf,

        /// Output raster
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Print grid, bands and metadata of a raster as JSON
    Info {
        /// Raster to describe
        path: PathBuf,
    },
}

/// Controls shared by all processing commands.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// YAML file with a serialized applier configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Block size: "full", "256" or "256x128"
    #[arg(long)]
    pub block_size: Option<String>,

    /// Compute workers: a count, or "auto"
    #[arg(long)]
    pub workers: Option<String>,

    /// Writer threads
    #[arg(long)]
    pub writers: Option<usize>,

    /// union or intersection
    #[arg(long)]
    pub extent_policy: Option<String>,

    /// min, max or average
    #[arg(long)]
    pub resolution_policy: Option<String>,

    /// Output pixel size in map units
    #[arg(long)]
    pub resolution: Option<f64>,
}

impl RunArgs {
    /// The configuration file (or the environment) with flags applied on top.
    pub fn config(&self) -> Result<ApplierConfig> {
        let mut config = match &self.config {
            Some(path) => ApplierConfig::from_yaml_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ApplierConfig::from_env(),
        };

        if let Some(size) = &self.block_size {
            config.block_size = size.parse::<BlockSize>().map_err(|e| anyhow!(e))?;
        }
        if let Some(workers) = &self.workers {
            config.num_workers = Some(
                NumWorkers::from_str(workers)
                    .ok_or_else(|| anyhow!("invalid worker count '{}'", workers))?,
            );
        }
        if let Some(writers) = self.writers {
            config.num_writers = Some(writers);
        }
        if let Some(policy) = &self.extent_policy {
            config.extent_policy = ExtentPolicy::from_str(policy)
                .ok_or_else(|| anyhow!("invalid extent policy '{}'", policy))?;
        }
        if let Some(policy) = &self.resolution_policy {
            config.resolution_policy = ResolutionPolicy::from_str(policy)
                .ok_or_else(|| anyhow!("invalid resolution policy '{}'", policy))?;
        }
        if let Some(resolution) = self.resolution {
            config.resolution = Some(Resolution::square(resolution)?);
        }

        config.validate().map_err(|e| anyhow!(e))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let args = RunArgs {
            block_size: Some("128x64".to_string()),
            workers: Some("auto".to_string()),
            writers: Some(2),
            extent_policy: Some("union".to_string()),
            resolution_policy: Some("max".to_string()),
            resolution: Some(20.0),
            ..Default::default()
        };
        let config = args.config().unwrap();
        assert_eq!(config.block_size, BlockSize::Size { x: 128, y: 64 });
        assert_eq!(config.num_workers, Some(NumWorkers::Auto));
        assert_eq!(config.num_writers, Some(2));
        assert_eq!(config.extent_policy, ExtentPolicy::Union);
        assert_eq!(config.resolution_policy, ResolutionPolicy::Maximum);
        assert_eq!(config.resolution.unwrap().x(), 20.0);
    }

    #[test]
    fn test_invalid_flags_are_rejected() {
        let args = RunArgs {
            extent_policy: Some("sideways".to_string()),
            ..Default::default()
        };
        assert!(args.config().is_err());

        let args = RunArgs {
            writers: Some(0),
            ..Default::default()
        };
        assert!(args.config().is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from([
            "applier-cli",
            "ndi",
            "--a",
            "nir.bsq",
            "--b",
            "red.bsq",
            "-o",
            "ndvi.tif",
            "--workers",
            "4",
        ]);
        match cli.command {
            Commands::Ndi { a, output, run, .. } => {
                assert_eq!(a, PathBuf::from("nir.bsq"));
                assert_eq!(output, PathBuf::from("ndvi.tif"));
                assert_eq!(run.workers.as_deref(), Some("4"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.log_level, "info");
    }
}
