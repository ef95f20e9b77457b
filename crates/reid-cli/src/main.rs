use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reid_core::Observation;
use reid_engine::{EngineConfig, IngestPipeline, SourceRegistry};
use reid_store::MemoryStore;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "reid-cli")]
#[command(about = "REID catalog ingestion command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run an observation batch file through the ingest pipeline
    Ingest {
        /// JSON file holding an array of observations
        #[arg(long)]
        observations: PathBuf,
    },
    /// Summarize the most recent ingest runs
    Report {
        #[arg(long, default_value_t = 3)]
        runs: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env();

    match cli.command {
        Commands::Ingest { observations } => {
            let registry = SourceRegistry::load(&config.sources_path)?;
            let text = std::fs::read_to_string(&observations)
                .with_context(|| format!("reading {}", observations.display()))?;
            let batch: Vec<Observation> = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", observations.display()))?;

            let store = Arc::new(MemoryStore::new());
            let pipeline = IngestPipeline::new(store, registry, config);
            let outcome = pipeline.run_batch(&batch).await?;
            println!(
                "ingest complete: run_id={} sources={} reports={}",
                outcome.run_id,
                outcome.summaries.len(),
                outcome.reports_dir.display()
            );
            for summary in &outcome.summaries {
                println!(
                    "  {}: scraped={} dropped={} errors={}",
                    summary.source, summary.items_scraped, summary.items_dropped, summary.errors
                );
            }
        }
        Commands::Report { runs } => {
            let digest = reid_engine::report_recent_runs(&config.reports_dir, runs)?;
            println!("{digest}");
        }
    }

    Ok(())
}
