use clap::{Parser, Subcommand};
use pop_render::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgStore},
    pipelines::PipelineRegistry,
    services::{executor, queue::RedisQueue, reprint, storage::S3Store, sweep},
};
use chrono::Utc;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Administration for the pop-render worker fleet.
#[derive(Debug, Parser)]
#[command(name = "pop-render", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every registered style and algorithm version
    Styles,

    /// Reset a failed job to queued and put it back on the queue
    Requeue {
        job_id: Uuid,
    },

    /// Fail jobs abandoned past their budget and reconcile the processing list
    Sweep,

    /// Re-render a completed job at its recorded algorithm version
    Reprint {
        job_id: Uuid,

        /// Where to write the print TIFF
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Styles => {
            for entry in PipelineRegistry::standard().entries() {
                let identity = entry.identity;
                println!("{:<20} {:<16} {}", identity.slug, identity.name, identity.version);
            }
        }
        Command::Requeue { job_id } => {
            let state = connect().await?;
            let job = executor::requeue_job(&state, job_id).await?;
            println!("{} {}", job.id, job.status);
        }
        Command::Sweep => {
            let state = connect().await?;
            let report = sweep::sweep_stale_jobs(&state, Utc::now()).await?;
            for id in &report.failed {
                println!("{} failed", id);
            }
            println!(
                "failed {}, released {}, requeued {}",
                report.failed.len(),
                report.released,
                report.requeued
            );
        }
        Command::Reprint { job_id, output } => {
            let state = connect().await?;
            let reprint = reprint::reprint_job(&state, job_id).await?;
            tokio::fs::write(&output, &reprint.outputs.print).await?;
            println!(
                "wrote {} ({}x{}), {}",
                output.display(),
                reprint.outputs.width,
                reprint.outputs.height,
                if reprint.matches_original {
                    "matches stored output byte-for-byte"
                } else {
                    "DIFFERS from stored output"
                }
            );
        }
    }

    Ok(())
}

async fn connect() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    let db_pool = db::init_pool(&config.database_url).await?;
    let objects = S3Store::new(
        &config.s3_bucket,
        &config.s3_region,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )?;
    let queue = RedisQueue::new(&config.redis_url)?;
    Ok(AppState::new(
        PgStore::new(db_pool),
        objects,
        queue,
        config.job_timeout(),
    ))
}
