//! Blockwise raster processing CLI.

use anyhow::Result;
use applier_cli::cli::{Cli, Commands};
use applier_cli::{raster_info, run_copy, run_ndi};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Copy { inputs, output, run } => {
            if let Some(grid) = run_copy(&inputs, &output, run.config()?)? {
                info!(output = %output.display(), grid = %grid, "wrote stack");
            }
        }
        Commands::Ndi { a, b, output, run } => {
            if let Some(valid) = run_ndi(&a, &b, &output, run.config()?)? {
                info!(output = %output.display(), valid, "wrote normalized difference");
            }
        }
        Commands::Info { path } => {
            println!("{}", serde_json::to_string_pretty(&raster_info(&path)?)?);
        }
    }

    Ok(())
}
