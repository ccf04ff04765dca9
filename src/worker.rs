// src/worker.rs
//! Queue consumers for the resolution and manual-correction queues.
//!
//! Each claimed job ends in exactly one of three places: `done` once the
//! handler succeeds, back to `ready` for a retryable failure with attempts
//! left, or `failed` for everything else.

use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

use crate::correction::ManualCorrectionWorker;
use crate::error::Result;
use crate::models::core::DecisionStatus;
use crate::queue::{parse_correction_item, parse_resolution_item, JobQueue, QueuedJob};
use crate::resolver::DecisionResolver;
use crate::utils::config::ReconcileConfig;
use crate::utils::logging::{Component, ReconcileLogger};

/// What a handler did with one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandledItem {
    pub status: DecisionStatus,
    pub wrote: bool,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn component(&self) -> Component;

    async fn handle(&self, payload: &Value) -> Result<HandledItem>;
}

#[async_trait]
impl JobHandler for DecisionResolver {
    fn component(&self) -> Component {
        Component::Resolver
    }

    async fn handle(&self, payload: &Value) -> Result<HandledItem> {
        let record = parse_resolution_item(payload)?;
        let resolution = self.resolve(&record).await?;
        Ok(HandledItem {
            status: resolution.record.status,
            wrote: resolution.wrote(),
        })
    }
}

#[async_trait]
impl JobHandler for ManualCorrectionWorker {
    fn component(&self) -> Component {
        Component::Correction
    }

    async fn handle(&self, payload: &Value) -> Result<HandledItem> {
        let instruction = parse_correction_item(payload)?;
        let outcome = self.apply(&instruction).await?;
        Ok(HandledItem {
            status: outcome.record.status,
            wrote: outcome.wrote(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub queue: String,
    pub worker_id: String,
    pub poll_interval: Duration,
    pub max_attempts: i32,
    pub stale_claim_after: Duration,
}

impl WorkerOptions {
    pub fn resolution(config: &ReconcileConfig) -> Self {
        Self::for_queue(config, &config.resolution_queue)
    }

    pub fn correction(config: &ReconcileConfig) -> Self {
        Self::for_queue(config, &config.correction_queue)
    }

    fn for_queue(config: &ReconcileConfig, queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            worker_id: config.worker_id.clone(),
            poll_interval: config.poll_interval,
            max_attempts: config.max_attempts,
            stale_claim_after: config.stale_claim_after,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs completed, including no-ops
    pub processed: usize,
    pub by_status: HashMap<DecisionStatus, usize>,
    /// Completed jobs that wrote nothing
    pub noops: usize,
    /// Retryable failures returned to the queue
    pub retried: usize,
    /// Jobs parked as failed
    pub failed: usize,
}

impl WorkerStats {
    fn record(&mut self, item: HandledItem) {
        self.processed += 1;
        *self.by_status.entry(item.status).or_insert(0) += 1;
        if !item.wrote {
            self.noops += 1;
        }
    }

    pub fn count(&self, status: DecisionStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Runs one claimed job through `handler` and settles it on the queue.
/// Only queue bookkeeping errors are returned; handler errors are settled.
pub async fn process_job(
    handler: &dyn JobHandler,
    queue: &dyn JobQueue,
    job: &QueuedJob,
    max_attempts: i32,
    logger: &ReconcileLogger,
    stats: &mut WorkerStats,
) -> Result<()> {
    match handler.handle(&job.payload).await {
        Ok(item) => {
            queue.complete(job.id).await?;
            stats.record(item);
        }
        Err(err) if err.is_retryable() && job.attempts < max_attempts => {
            logger.log_failure(&format!("job {} (attempt {})", job.id, job.attempts), &err);
            queue.release(job.id, &err.to_string()).await?;
            stats.retried += 1;
        }
        Err(err) => {
            logger.log_failure(&format!("job {} (attempt {})", job.id, job.attempts), &err);
            queue.fail(job.id, &err.to_string()).await?;
            stats.failed += 1;
        }
    }
    Ok(())
}

/// Processes jobs until the queue has nothing ready.
pub async fn drain_queue(
    handler: &dyn JobHandler,
    queue: &dyn JobQueue,
    options: &WorkerOptions,
) -> Result<WorkerStats> {
    let logger = ReconcileLogger::new(handler.component());
    let mut stats = WorkerStats::default();
    while let Some(job) = queue.claim_next(&options.queue, &options.worker_id).await? {
        process_job(handler, queue, &job, options.max_attempts, &logger, &mut stats).await?;
    }
    logger.log_summary(stats.processed, stats.failed, stats.noops);
    Ok(stats)
}

/// Polls the queue until `shutdown` turns true or its sender goes away.
/// Jobs orphaned by a crashed worker are requeued before the first claim.
pub async fn run_worker(
    handler: &dyn JobHandler,
    queue: &dyn JobQueue,
    options: &WorkerOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<WorkerStats> {
    let logger = ReconcileLogger::new(handler.component());
    let mut stats = WorkerStats::default();
    queue
        .requeue_stale(&options.queue, options.stale_claim_after)
        .await?;
    info!(
        "🚀 Worker {} listening on queue {}",
        options.worker_id, options.queue
    );

    loop {
        if *shutdown.borrow() {
            break;
        }
        let idle = match queue.claim_next(&options.queue, &options.worker_id).await {
            Ok(Some(job)) => {
                if let Err(e) =
                    process_job(handler, queue, &job, options.max_attempts, &logger, &mut stats)
                        .await
                {
                    // The claim stays held and is picked up again as stale.
                    warn!("⚠️  Could not settle job {}: {}", job.id, e);
                    true
                } else {
                    false
                }
            }
            Ok(None) => true,
            Err(e) if e.is_retryable() => {
                warn!("⚠️  Claim on {} failed: {}", options.queue, e);
                true
            }
            Err(e) => return Err(e),
        };

        if idle {
            tokio::select! {
                _ = tokio::time::sleep(options.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }

    info!("🛑 Worker on {} stopping", options.queue);
    logger.log_summary(stats.processed, stats.failed, stats.noops);
    Ok(stats)
}

pub async fn run_resolution_worker(
    resolver: &DecisionResolver,
    queue: &dyn JobQueue,
    options: &WorkerOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<WorkerStats> {
    run_worker(resolver, queue, options, shutdown).await
}

pub async fn run_correction_worker(
    worker: &ManualCorrectionWorker,
    queue: &dyn JobQueue,
    options: &WorkerOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<WorkerStats> {
    run_worker(worker, queue, options, shutdown).await
}

pub async fn drain_resolution_queue(
    resolver: &DecisionResolver,
    queue: &dyn JobQueue,
    options: &WorkerOptions,
) -> Result<WorkerStats> {
    drain_queue(resolver, queue, options).await
}

pub async fn drain_correction_queue(
    worker: &ManualCorrectionWorker,
    queue: &dyn JobQueue,
    options: &WorkerOptions,
) -> Result<WorkerStats> {
    drain_queue(worker, queue, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::fuzzy::CandidateSnapshot;
    use crate::queue::memory::{InMemoryJobQueue, JobState};
    use crate::registry::memory::{organization, InMemoryRegistry};
    use crate::store::memory::InMemoryDecisionStore;
    use serde_json::json;
    use std::sync::Arc;

    const VOCAB: &str = "organizations";

    fn options(max_attempts: i32) -> WorkerOptions {
        WorkerOptions {
            queue: "resolve".to_string(),
            worker_id: "test-worker".to_string(),
            poll_interval: Duration::from_millis(5),
            max_attempts,
            stale_claim_after: Duration::from_secs(60),
        }
    }

    async fn resolver() -> (DecisionResolver, Arc<InMemoryRegistry>) {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(VOCAB, organization(1, "Contoso Corp")).await;
        let resolver = DecisionResolver::new(
            Arc::new(InMemoryDecisionStore::new()),
            registry.clone(),
            Arc::new(CandidateSnapshot::new(Duration::from_secs(300))),
            VOCAB,
        );
        (resolver, registry)
    }

    #[tokio::test]
    async fn test_drain_settles_every_job() {
        let (resolver, _) = resolver().await;
        let queue = InMemoryJobQueue::new();
        let item = json!({"source": "catalog_a", "id": "1", "name": "Contoso Corp"});
        queue.enqueue("resolve", &item).await.unwrap();
        queue.enqueue("resolve", &item).await.unwrap();
        queue
            .enqueue("resolve", &json!({"source": "catalog_q", "id": "2"}))
            .await
            .unwrap();

        let stats = drain_resolution_queue(&resolver, &queue, &options(3)).await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.count(DecisionStatus::Success), 2);
        assert_eq!(stats.noops, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(queue.count_in_state("resolve", JobState::Done).await, 2);
        assert_eq!(queue.count_in_state("resolve", JobState::Failed).await, 1);
    }

    #[tokio::test]
    async fn test_retryable_failure_is_released_until_attempts_run_out() {
        let (resolver, registry) = resolver().await;
        registry.set_unavailable(true);
        let queue = InMemoryJobQueue::new();
        queue
            .enqueue("resolve", &json!({"source": "catalog_a", "id": "1", "name": "Contoso Corp"}))
            .await
            .unwrap();

        let stats = drain_resolution_queue(&resolver, &queue, &options(2)).await.unwrap();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.failed, 1);
        let jobs = queue.jobs().await;
        assert_eq!(jobs[0].state, JobState::Failed);
        assert_eq!(jobs[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_run_worker_stops_on_shutdown() {
        let (resolver, _) = resolver().await;
        let queue = InMemoryJobQueue::new();
        queue
            .enqueue("resolve", &json!({"source": "catalog_a", "id": "1", "name": "Contoso Corp"}))
            .await
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let opts = options(3);

        let stop_when_done = async {
            while queue.count_in_state("resolve", JobState::Done).await == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tx.send(true).unwrap();
        };
        let (stats, _) = tokio::join!(run_resolution_worker(&resolver, &queue, &opts, rx), stop_when_done);
        let stats = stats.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.count(DecisionStatus::Success), 1);
    }

    #[tokio::test]
    async fn test_correction_queue_drains() {
        let store = Arc::new(InMemoryDecisionStore::new());
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(VOCAB, organization(5, "Fabrikam")).await;
        registry.insert(VOCAB, organization(6, "Tailspin Toys")).await;
        let snapshot = Arc::new(CandidateSnapshot::new(Duration::from_secs(300)));
        let resolver = DecisionResolver::new(store.clone(), registry.clone(), snapshot.clone(), VOCAB);
        let corrections = ManualCorrectionWorker::new(store.clone(), registry, snapshot, VOCAB);

        let queue = InMemoryJobQueue::new();
        queue
            .enqueue("resolve", &json!({"source": "catalog_b", "org_id": "b1", "name": "Fabrikam"}))
            .await
            .unwrap();
        drain_resolution_queue(&resolver, &queue, &options(3)).await.unwrap();

        let mut opts = options(3);
        opts.queue = "manual".to_string();
        queue
            .enqueue("manual", &json!({"source": "catalog_b", "id": "b1", "mode": "assign_id", "term_id": 6}))
            .await
            .unwrap();
        queue
            .enqueue("manual", &json!({"source": "catalog_b", "id": "missing", "mode": "assign_id", "term_id": 5}))
            .await
            .unwrap();
        let stats = drain_correction_queue(&corrections, &queue, &opts).await.unwrap();
        assert_eq!(stats.count(DecisionStatus::Fixed), 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(queue.count_in_state("manual", JobState::Failed).await, 1);
    }
}
