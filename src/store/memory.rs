// src/store/memory.rs
use anyhow::anyhow;
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::error::{ReconcileError, Result};
use crate::models::core::{DecisionRecord, DecisionStatus, Source};
use crate::store::{plan_upsert, unix_now, DecisionStore, UpsertOutcome, WriteOrigin};

/// In-process decision store. Counts reads and writes so callers can observe
/// idempotence, and can be switched into a failing mode to exercise storage
/// error propagation.
#[derive(Default)]
pub struct InMemoryDecisionStore {
    rows: Mutex<BTreeMap<(Source, String), DecisionRecord>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    unavailable: AtomicBool,
    failing_applies: AtomicUsize,
}

impl InMemoryDecisionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` calls to `apply` fail with a storage error.
    pub fn fail_next_applies(&self, count: usize) {
        self.failing_applies.store(count, Ordering::SeqCst);
    }

    /// Seeds a row verbatim, bypassing upsert rules and counters.
    pub async fn insert_raw(&self, record: DecisionRecord) {
        let key = (record.source, record.external_id.clone());
        self.rows.lock().await.insert(key, record);
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReconcileError::Storage(anyhow!("decision store unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl DecisionStore for InMemoryDecisionStore {
    async fn get(&self, source: Source, external_id: &str) -> Result<Option<DecisionRecord>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().await;
        Ok(rows.get(&(source, external_id.to_string())).cloned())
    }

    async fn apply(&self, candidate: DecisionRecord, origin: WriteOrigin) -> Result<UpsertOutcome> {
        self.check_available()?;
        if self
            .failing_applies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ReconcileError::Storage(anyhow!("injected write failure")));
        }
        // One lock across read-plan-write keeps the logical write atomic.
        let mut rows = self.rows.lock().await;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let key = (candidate.source, candidate.external_id.clone());
        let outcome = plan_upsert(rows.get(&key), candidate, origin, unix_now())?;
        if outcome.action.wrote() {
            self.writes.fetch_add(1, Ordering::SeqCst);
            rows.insert(key, outcome.record.clone());
        }
        debug!(
            "In-memory upsert ({}, {}) -> {:?}",
            outcome.record.source, outcome.record.external_id, outcome.action
        );
        Ok(outcome)
    }

    async fn list_by_status(&self, statuses: &[DecisionStatus]) -> Result<Vec<DecisionRecord>> {
        self.check_available()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::UpsertAction;

    fn candidate(status: DecisionStatus, matched: Option<i64>) -> DecisionRecord {
        DecisionRecord::candidate(Source::CatalogA, "42", status, matched, "", "{}")
    }

    #[tokio::test]
    async fn test_upsert_then_noop_counts_one_write() {
        let store = InMemoryDecisionStore::new();
        let first = store.apply(candidate(DecisionStatus::Success, Some(3)), WriteOrigin::Automatic).await.unwrap();
        assert_eq!(first.action, UpsertAction::Inserted);

        let second = store.apply(candidate(DecisionStatus::Success, Some(3)), WriteOrigin::Automatic).await.unwrap();
        assert_eq!(second.action, UpsertAction::Unchanged);
        assert_eq!(second.record.changed, first.record.changed);
        assert_eq!(store.writes(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_terminal_row_survives_downgrade() {
        let store = InMemoryDecisionStore::new();
        store
            .apply(candidate(DecisionStatus::Fixed, Some(3)), WriteOrigin::Manual)
            .await
            .unwrap();
        let result = store.upsert(candidate(DecisionStatus::Mismatch, Some(8))).await.unwrap();
        assert_eq!(result.status, DecisionStatus::Fixed);
        assert_eq!(result.matched_id, Some(3));
        let result = store.upsert(candidate(DecisionStatus::Success, Some(8))).await.unwrap();
        assert_eq!(result.matched_id, Some(3));
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_injected_apply_failure_is_one_shot() {
        let store = InMemoryDecisionStore::new();
        store.fail_next_applies(1);
        let err = store.upsert(candidate(DecisionStatus::Skipped, None)).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.is_empty().await);
        store.upsert(candidate(DecisionStatus::Skipped, None)).await.unwrap();
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_propagates_error() {
        let store = InMemoryDecisionStore::new();
        store.set_unavailable(true);
        let err = store.get(Source::CatalogA, "42").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.upsert(candidate(DecisionStatus::Queued, None)).await.is_err());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_list_by_status_filters_rows() {
        let store = InMemoryDecisionStore::new();
        store.upsert(candidate(DecisionStatus::Skipped, None)).await.unwrap();
        let mut other = candidate(DecisionStatus::Success, Some(1));
        other.external_id = "43".to_string();
        store.upsert(other).await.unwrap();

        let pending = store
            .list_by_status(&[DecisionStatus::Skipped, DecisionStatus::Queued])
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].external_id, "42");
    }
}
