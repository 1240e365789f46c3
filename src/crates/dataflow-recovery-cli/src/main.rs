//! dfrecover - inspect checkpoint metadata and compute recovery lines offline

use anyhow::Result;
use clap::{Parser, Subcommand};
use dataflow_recovery_cli::Scenario;
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dfrecover")]
#[command(about = "Compute dataflow recovery lines from gathered checkpoint metadata", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a scenario file and summarize each instance's checkpoints
    Validate {
        /// Path to YAML or JSON scenario file
        file: PathBuf,
    },

    /// Print the recovery line for the failed instances as JSON
    Compute {
        /// Path to YAML or JSON scenario file
        file: PathBuf,

        /// Failed instance (repeatable, replaces the file's list)
        #[arg(short, long = "failed", value_name = "NAME")]
        failed: Vec<String>,

        /// Restore every instance instead of keeping survivors' live state
        #[arg(long)]
        no_reuse: bool,
    },

    /// List checkpoints older than the worst-case recovery line
    Prunable {
        /// Path to YAML or JSON scenario file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(rust_log)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { file } => {
            let scenario = Scenario::from_file(&file)?;
            let summaries = scenario.validate()?;

            println!("✓ Scenario is valid");
            println!("  Checkpoints: {}", scenario.checkpoints.len());
            println!("\nInstances ({}):", summaries.len());
            for summary in &summaries {
                println!(
                    "  - {}: {} checkpoints, latest {}",
                    summary.instance, summary.checkpoints, summary.latest
                );
                if !summary.upstream.is_empty() {
                    println!("    upstream: {}", summary.upstream.join(", "));
                }
            }
        }
        Commands::Compute {
            file,
            failed,
            no_reuse,
        } => {
            let scenario = Scenario::from_file(&file)?;
            let line = scenario.compute(&failed, !no_reuse)?;
            println!("{}", serde_json::to_string_pretty(&line)?);
        }
        Commands::Prunable { file } => {
            let scenario = Scenario::from_file(&file)?;
            let (line, prunable) = scenario.prunable()?;
            let ids: Vec<_> = prunable
                .iter()
                .map(|m| json!({ "id": m.id, "instance_name": m.instance_name }))
                .collect();
            let report = json!({ "recovery_line": line, "prunable": ids });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
