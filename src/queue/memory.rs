// src/queue/memory.rs
use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{ReconcileError, Result};
use crate::queue::{JobQueue, QueuedJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Ready,
    Claimed,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub queue: String,
    pub payload: Value,
    pub state: JobState,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub locked_by: Option<String>,
    locked_at: Option<Instant>,
}

/// FIFO job queue held in memory.
#[derive(Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<JobRow>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<JobRow> {
        self.jobs.lock().await.clone()
    }

    pub async fn count_in_state(&self, queue: &str, state: JobState) -> usize {
        self.jobs
            .lock()
            .await
            .iter()
            .filter(|j| j.queue == queue && j.state == state)
            .count()
    }
}

fn find(jobs: &mut [JobRow], job_id: i64) -> Result<&mut JobRow> {
    jobs.iter_mut()
        .find(|j| j.id == job_id)
        .ok_or_else(|| ReconcileError::Storage(anyhow!("job {} not found", job_id)))
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, queue: &str, payload: &Value) -> Result<i64> {
        let mut jobs = self.jobs.lock().await;
        let id = jobs.len() as i64 + 1;
        jobs.push(JobRow {
            id,
            queue: queue.to_string(),
            payload: payload.clone(),
            state: JobState::Ready,
            attempts: 0,
            last_error: None,
            locked_by: None,
            locked_at: None,
        });
        Ok(id)
    }

    async fn claim_next(&self, queue: &str, worker_id: &str) -> Result<Option<QueuedJob>> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs
            .iter_mut()
            .find(|j| j.queue == queue && j.state == JobState::Ready)
        else {
            return Ok(None);
        };
        job.state = JobState::Claimed;
        job.attempts += 1;
        job.locked_by = Some(worker_id.to_string());
        job.locked_at = Some(Instant::now());
        Ok(Some(QueuedJob {
            id: job.id,
            queue: job.queue.clone(),
            payload: job.payload.clone(),
            attempts: job.attempts,
        }))
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = find(&mut jobs, job_id)?;
        job.state = JobState::Done;
        job.locked_by = None;
        job.locked_at = None;
        Ok(())
    }

    async fn release(&self, job_id: i64, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = find(&mut jobs, job_id)?;
        job.state = JobState::Ready;
        job.last_error = Some(error.to_string());
        job.locked_by = None;
        job.locked_at = None;
        Ok(())
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let job = find(&mut jobs, job_id)?;
        job.state = JobState::Failed;
        job.last_error = Some(error.to_string());
        job.locked_by = None;
        job.locked_at = None;
        Ok(())
    }

    async fn requeue_stale(&self, queue: &str, older_than: Duration) -> Result<u64> {
        let mut jobs = self.jobs.lock().await;
        let mut requeued = 0;
        for job in jobs
            .iter_mut()
            .filter(|j| j.queue == queue && j.state == JobState::Claimed)
        {
            if job.locked_at.map(|t| t.elapsed() >= older_than).unwrap_or(true) {
                job.state = JobState::Ready;
                job.locked_by = None;
                job.locked_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fifo_claim_and_complete() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue("q", &json!({"n": 1})).await.unwrap();
        queue.enqueue("other", &json!({"n": 2})).await.unwrap();
        queue.enqueue("q", &json!({"n": 3})).await.unwrap();

        let first = queue.claim_next("q", "w1").await.unwrap().unwrap();
        assert_eq!(first.payload, json!({"n": 1}));
        assert_eq!(first.attempts, 1);
        queue.complete(first.id).await.unwrap();

        let second = queue.claim_next("q", "w1").await.unwrap().unwrap();
        assert_eq!(second.payload, json!({"n": 3}));
        assert!(queue.claim_next("q", "w1").await.unwrap().is_none());
        assert_eq!(queue.count_in_state("q", JobState::Done).await, 1);
    }

    #[tokio::test]
    async fn test_release_redelivers_and_counts_attempts() {
        let queue = InMemoryJobQueue::new();
        let id = queue.enqueue("q", &json!({})).await.unwrap();
        let job = queue.claim_next("q", "w").await.unwrap().unwrap();
        queue.release(job.id, "db down").await.unwrap();
        let again = queue.claim_next("q", "w").await.unwrap().unwrap();
        assert_eq!(again.id, id);
        assert_eq!(again.attempts, 2);
        queue.fail(again.id, "gave up").await.unwrap();
        assert!(queue.claim_next("q", "w").await.unwrap().is_none());
        assert_eq!(queue.jobs().await[0].last_error.as_deref(), Some("gave up"));
    }

    #[tokio::test]
    async fn test_stale_claims_are_requeued() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue("q", &json!({})).await.unwrap();
        queue.claim_next("q", "crashed").await.unwrap().unwrap();
        assert_eq!(queue.requeue_stale("q", Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(queue.requeue_stale("q", Duration::ZERO).await.unwrap(), 1);
        assert!(queue.claim_next("q", "w").await.unwrap().is_some());
    }
}
