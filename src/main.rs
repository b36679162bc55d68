mod catalog;
mod compress;
mod config;
mod enrich;
mod fetch;
mod http;
mod keys;
mod ledger;
mod llm;
mod matcher;
mod pipeline;
mod progress;
mod search;
mod storage;

use clap::{Parser, Subcommand};
use config::Workspace;
use pipeline::{Pipeline, RunOptions};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "bodega",
    about = "Batch content refresher for product catalogs: rewrites names and \
             descriptions with an LLM, sources and compresses images, uploads \
             them, and links the results back into the catalog."
)]
struct Cli {
    /// Catalog JSON file (defaults to catalog.json / input_products.json)
    #[arg(short, long, global = true)]
    input: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one full refresh cycle over the next unprocessed batch
    Run {
        /// Remove downloaded scratch images before starting
        #[arg(long)]
        tidy_before: bool,
        /// Remove downloaded scratch images after finishing
        #[arg(long)]
        tidy_after: bool,
        /// Also delete the upload link ledger when tidying
        #[arg(long)]
        clear_links: bool,
        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Enrich one batch of names and descriptions only
    Enhance {
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Download and size images for the last recorded batch
    FetchImages,
    /// Upload scratch images to object storage and write the link ledger
    Upload,
    /// Patch catalog image fields from the link ledger
    Relink {
        /// Consider every product, not just the last recorded batch
        #[arg(long)]
        all: bool,
    },
    /// Show processed / total counts
    Progress,
    /// Remove downloaded scratch images
    Tidy {
        /// Also delete the upload link ledger
        #[arg(long)]
        clear_links: bool,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let pipeline = Pipeline::from_env(Workspace::from_env());

    match cli.command {
        Command::Run {
            tidy_before,
            tidy_after,
            clear_links,
            batch_size,
        } => {
            // A fresh scratch directory unless the caller wants leftovers
            // uploaded first.
            let options = RunOptions {
                input: cli.input,
                tidy_before: tidy_before || !tidy_after,
                tidy_after,
                clear_links,
                batch_size,
            };
            let report = pipeline.run(options).await?;
            for stage in &report.stages {
                info!(
                    target = "bodega.cli",
                    stage = %stage.name,
                    elapsed_ms = stage.elapsed_ms,
                    output = %stage.output,
                    "stage complete"
                );
            }
            println!("processed {} of {} products", report.processed, report.total);
        }
        Command::Enhance { batch_size } => {
            let updated = pipeline.enhance_only(cli.input.as_deref(), batch_size).await?;
            println!("enhanced {updated} products");
        }
        Command::FetchImages => {
            let fetched = pipeline.fetch_images_only().await?;
            println!("fetched {fetched} images");
        }
        Command::Upload => {
            let uploaded = pipeline.upload_only().await?;
            println!("uploaded {uploaded} images");
        }
        Command::Relink { all } => {
            let stats = pipeline.relink_only(cli.input.as_deref(), all).await?;
            println!(
                "updated {} products ({} without a matching link)",
                stats.updated, stats.no_link
            );
        }
        Command::Progress => {
            let (processed, total) = pipeline.progress(cli.input.as_deref())?;
            println!("{processed} of {total} products processed");
        }
        Command::Tidy { clear_links } => {
            let removed = pipeline.tidy(clear_links)?;
            println!("removed {removed} files");
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
