// src/queue/postgres.rs
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ReconcileError, Result};
use crate::queue::{JobQueue, QueuedJob};
use crate::utils::db_connect::PgPool;

// SKIP LOCKED lets several worker instances drain the same queue.
const CLAIM_SQL: &str = "
    UPDATE reconcile.job
    SET state = 'claimed', attempts = attempts + 1, locked_by = $2, locked_at = CURRENT_TIMESTAMP
    WHERE id = (
        SELECT id FROM reconcile.job
        WHERE queue = $1 AND state = 'ready'
        ORDER BY id
        FOR UPDATE SKIP LOCKED
        LIMIT 1
    )
    RETURNING id, queue, payload, attempts";

/// Job queue backed by `reconcile.job`.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn set_state(&self, job_id: i64, state: &str, error: Option<&str>) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for job state change")
            .map_err(ReconcileError::Storage)?;
        conn.execute(
            "UPDATE reconcile.job
             SET state = $2, last_error = COALESCE($3, last_error), locked_by = NULL, locked_at = NULL
             WHERE id = $1",
            &[&job_id, &state, &error],
        )
        .await
        .with_context(|| format!("Failed to mark job {} as {}", job_id, state))
        .map_err(ReconcileError::Storage)?;
        debug!("Job {} -> {}", job_id, state);
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, queue: &str, payload: &Value) -> Result<i64> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for enqueue")
            .map_err(ReconcileError::Storage)?;
        let row = conn
            .query_one(
                "INSERT INTO reconcile.job (queue, payload) VALUES ($1, $2) RETURNING id",
                &[&queue, payload],
            )
            .await
            .context("Failed to enqueue job")
            .map_err(ReconcileError::Storage)?;
        Ok(row.get("id"))
    }

    async fn claim_next(&self, queue: &str, worker_id: &str) -> Result<Option<QueuedJob>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for claim")
            .map_err(ReconcileError::Storage)?;
        let row = conn
            .query_opt(CLAIM_SQL, &[&queue, &worker_id])
            .await
            .with_context(|| format!("Failed to claim job from {}", queue))
            .map_err(ReconcileError::Storage)?;
        Ok(row.map(|row| QueuedJob {
            id: row.get("id"),
            queue: row.get("queue"),
            payload: row.get("payload"),
            attempts: row.get("attempts"),
        }))
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        self.set_state(job_id, "done", None).await
    }

    async fn release(&self, job_id: i64, error: &str) -> Result<()> {
        self.set_state(job_id, "ready", Some(error)).await
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<()> {
        self.set_state(job_id, "failed", Some(error)).await
    }

    async fn requeue_stale(&self, queue: &str, older_than: Duration) -> Result<u64> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for stale requeue")
            .map_err(ReconcileError::Storage)?;
        let seconds = older_than.as_secs_f64();
        let requeued = conn
            .execute(
                "UPDATE reconcile.job
                 SET state = 'ready', locked_by = NULL, locked_at = NULL
                 WHERE queue = $1 AND state = 'claimed'
                   AND locked_at < CURRENT_TIMESTAMP - make_interval(secs => $2)",
                &[&queue, &seconds],
            )
            .await
            .context("Failed to requeue stale jobs")
            .map_err(ReconcileError::Storage)?;
        if requeued > 0 {
            info!("♻️  Requeued {} stale claimed jobs on {}", requeued, queue);
        }
        Ok(requeued)
    }
}
