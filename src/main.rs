// src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;

use reconcile_lib::correction::ManualCorrectionWorker;
use reconcile_lib::matching::fuzzy::CandidateSnapshot;
use reconcile_lib::queue::postgres::PgJobQueue;
use reconcile_lib::queue::{parse_correction_item, parse_resolution_item, JobQueue};
use reconcile_lib::registry::postgres::PgCanonicalRegistry;
use reconcile_lib::resolver::DecisionResolver;
use reconcile_lib::store::postgres::PgDecisionStore;
use reconcile_lib::utils::config::ReconcileConfig;
use reconcile_lib::utils::db_connect::{connect, ensure_schema, get_pool_status, SCHEMA_SQL};
use reconcile_lib::utils::env::load_env;
use reconcile_lib::worker::{run_correction_worker, run_resolution_worker, WorkerOptions};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the resolution and correction workers until Ctrl+C
    Work,
    /// Push JSON-lines items onto a queue
    Enqueue {
        #[arg(long, value_enum)]
        queue: QueueKind,
        /// One JSON object per line
        #[arg(long)]
        file: PathBuf,
    },
    /// Re-resolve every non-terminal decision from its stored payload
    Replay,
    /// Print the SQL schema
    Schema,
}

#[derive(Clone, Copy, ValueEnum)]
enum QueueKind {
    Resolution,
    Correction,
}

struct Services {
    queue: PgJobQueue,
    resolver: DecisionResolver,
    corrections: ManualCorrectionWorker,
}

async fn build_services(config: &ReconcileConfig) -> Result<Services> {
    let pool = connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    ensure_schema(&pool).await?;
    let (connections, idle, in_use) = get_pool_status(&pool);
    info!(
        "Pool ready: {} connections ({} idle, {} in use)",
        connections, idle, in_use
    );

    let store = Arc::new(PgDecisionStore::new(pool.clone()));
    let registry = Arc::new(PgCanonicalRegistry::new(pool.clone()));
    // Shared so a canonical organization created by a correction is visible
    // to fuzzy matching right away.
    let snapshot = Arc::new(CandidateSnapshot::new(config.snapshot_ttl));

    Ok(Services {
        queue: PgJobQueue::new(pool),
        resolver: DecisionResolver::new(
            store.clone(),
            registry.clone(),
            snapshot.clone(),
            config.vocabulary.clone(),
        ),
        corrections: ManualCorrectionWorker::new(store, registry, snapshot, config.vocabulary.clone()),
    })
}

async fn work(config: &ReconcileConfig, services: &Services) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("🛑 Received Ctrl+C, finishing in-flight items..."),
            Err(e) => error!("❌ Error setting up signal handler: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    let resolution_options = WorkerOptions::resolution(config);
    let correction_options = WorkerOptions::correction(config);
    let (resolution_stats, correction_stats) = tokio::try_join!(
        run_resolution_worker(
            &services.resolver,
            &services.queue,
            &resolution_options,
            shutdown_rx.clone()
        ),
        run_correction_worker(
            &services.corrections,
            &services.queue,
            &correction_options,
            shutdown_rx
        ),
    )?;
    info!(
        "Resolution worker: {} processed, {} no-op, {} retried, {} failed",
        resolution_stats.processed,
        resolution_stats.noops,
        resolution_stats.retried,
        resolution_stats.failed
    );
    info!(
        "Correction worker: {} processed, {} no-op, {} retried, {} failed",
        correction_stats.processed,
        correction_stats.noops,
        correction_stats.retried,
        correction_stats.failed
    );
    Ok(())
}

async fn enqueue(
    config: &ReconcileConfig,
    services: &Services,
    kind: QueueKind,
    file: &PathBuf,
) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let queue_name = match kind {
        QueueKind::Resolution => &config.resolution_queue,
        QueueKind::Correction => &config.correction_queue,
    };

    let mut enqueued = 0usize;
    let mut rejected = 0usize;
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let payload: serde_json::Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("Line {}: not valid JSON: {}", line_no + 1, e);
                rejected += 1;
                continue;
            }
        };
        // Items that can never succeed are rejected here instead of being
        // parked as failed jobs later.
        let checked = match kind {
            QueueKind::Resolution => match parse_resolution_item(&payload) {
                Ok(record) => services.resolver.register(&record).await.map(|_| ()),
                Err(e) => Err(e),
            },
            QueueKind::Correction => parse_correction_item(&payload).map(|_| ()),
        };
        match checked {
            Ok(()) => {}
            Err(e) if e.is_retryable() => return Err(e.into()),
            Err(e) => {
                warn!("Line {}: {}", line_no + 1, e);
                rejected += 1;
                continue;
            }
        }
        services.queue.enqueue(queue_name, &payload).await?;
        enqueued += 1;
    }
    info!(
        "📥 Enqueued {} items on {} ({} rejected)",
        enqueued, queue_name, rejected
    );
    Ok(())
}

async fn replay(services: &Services) -> Result<()> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    pb.set_message("Replaying pending decisions...");
    let summary = services.resolver.replay_pending(Some(&pb)).await?;
    pb.finish_with_message(format!(
        "{} examined, {} rewritten, {} unchanged, {} failed",
        summary.examined, summary.rewritten, summary.unchanged, summary.failed
    ));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();
    let cli = Cli::parse();

    if let Command::Schema = cli.command {
        println!("{}", SCHEMA_SQL);
        return Ok(());
    }

    let config = ReconcileConfig::from_env();
    config.log_config();
    let services = build_services(&config).await?;

    match &cli.command {
        Command::Work => work(&config, &services).await,
        Command::Enqueue { queue, file } => enqueue(&config, &services, *queue, file).await,
        Command::Replay => replay(&services).await,
        Command::Schema => Ok(()),
    }
}
