// src/store/postgres.rs
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_postgres::{Client, Row};

use crate::error::{ReconcileError, Result};
use crate::models::core::{DecisionRecord, DecisionStatus, Source};
use crate::store::{plan_upsert, unix_now, DecisionStore, UpsertAction, UpsertOutcome, WriteOrigin};
use crate::utils::db_connect::PgPool;

/// Re-read and re-plan this many times when a concurrent worker changes the
/// row between our read and our conditional write.
const MAX_CAS_ATTEMPTS: usize = 3;

const SELECT_SQL: &str = "
    SELECT source, id, status, tid, message, created, changed, csv_item
    FROM reconcile.decision
    WHERE source = $1 AND id = $2";

const INSERT_SQL: &str = "
    INSERT INTO reconcile.decision (source, id, status, tid, message, created, changed, csv_item)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (source, id) DO NOTHING";

// Conditional on the full previous content so a racing writer is detected.
const UPDATE_SQL: &str = "
    UPDATE reconcile.decision
    SET status = $3, tid = $4, message = $5, changed = $6, csv_item = $7
    WHERE source = $1 AND id = $2
      AND status = $8 AND tid IS NOT DISTINCT FROM $9 AND message = $10
      AND csv_item = $11 AND changed = $12";

/// Decision store backed by `reconcile.decision`.
#[derive(Clone)]
pub struct PgDecisionStore {
    pool: PgPool,
}

impl PgDecisionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &Row) -> anyhow::Result<DecisionRecord> {
    let source: String = row.get("source");
    let status: String = row.get("status");
    Ok(DecisionRecord {
        source: Source::parse(&source).map_err(|e| anyhow!("{}", e))?,
        external_id: row.get("id"),
        status: DecisionStatus::parse(&status).map_err(|e| anyhow!("{}", e))?,
        matched_id: row.get("tid"),
        message: row.get("message"),
        raw_payload: row.get("csv_item"),
        created: row.get("created"),
        changed: row.get("changed"),
    })
}

async fn fetch_decision(
    conn: &Client,
    source: Source,
    external_id: &str,
) -> anyhow::Result<Option<DecisionRecord>> {
    let row = conn
        .query_opt(SELECT_SQL, &[&source.as_str(), &external_id])
        .await
        .context("Failed to select decision row")?;
    row.as_ref().map(row_to_record).transpose()
}

async fn write_planned(
    conn: &Client,
    previous: Option<&DecisionRecord>,
    outcome: &UpsertOutcome,
) -> anyhow::Result<bool> {
    let r = &outcome.record;
    let affected = match (outcome.action, previous) {
        (UpsertAction::Inserted, _) => conn
            .execute(
                INSERT_SQL,
                &[
                    &r.source.as_str(),
                    &r.external_id,
                    &r.status.as_str(),
                    &r.matched_id,
                    &r.message,
                    &r.created,
                    &r.changed,
                    &r.raw_payload,
                ],
            )
            .await
            .context("Failed to insert decision row")?,
        (UpsertAction::Updated, Some(prev)) => conn
            .execute(
                UPDATE_SQL,
                &[
                    &r.source.as_str(),
                    &r.external_id,
                    &r.status.as_str(),
                    &r.matched_id,
                    &r.message,
                    &r.changed,
                    &r.raw_payload,
                    &prev.status.as_str(),
                    &prev.matched_id,
                    &prev.message,
                    &prev.raw_payload,
                    &prev.changed,
                ],
            )
            .await
            .context("Failed to update decision row")?,
        (UpsertAction::Updated, None) => {
            return Err(anyhow!("update planned without a stored row"));
        }
        _ => return Ok(true),
    };
    Ok(affected == 1)
}

/// Read and conditional-write primitives the compare-and-swap loop runs on.
#[async_trait]
pub(crate) trait CasBackend: Send + Sync {
    async fn fetch(&self, source: Source, external_id: &str) -> anyhow::Result<Option<DecisionRecord>>;

    /// `false` when the row no longer matches `previous`.
    async fn write(
        &self,
        previous: Option<&DecisionRecord>,
        outcome: &UpsertOutcome,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
impl CasBackend for Client {
    async fn fetch(&self, source: Source, external_id: &str) -> anyhow::Result<Option<DecisionRecord>> {
        fetch_decision(self, source, external_id).await
    }

    async fn write(
        &self,
        previous: Option<&DecisionRecord>,
        outcome: &UpsertOutcome,
    ) -> anyhow::Result<bool> {
        write_planned(self, previous, outcome).await
    }
}

/// Read, plan, conditional write. A lost race re-reads and re-plans against
/// the winner's row, at most [`MAX_CAS_ATTEMPTS`] times.
pub(crate) async fn apply_with_cas(
    backend: &dyn CasBackend,
    candidate: DecisionRecord,
    origin: WriteOrigin,
) -> Result<UpsertOutcome> {
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let existing = backend
            .fetch(candidate.source, &candidate.external_id)
            .await
            .map_err(ReconcileError::Storage)?;
        let outcome = plan_upsert(existing.as_ref(), candidate.clone(), origin, unix_now())?;

        let applied = backend
            .write(existing.as_ref(), &outcome)
            .await
            .map_err(ReconcileError::Storage)?;
        if applied {
            if outcome.action.wrote() {
                info!(
                    "💾 Decision ({}, {}) {:?} -> {}",
                    outcome.record.source,
                    outcome.record.external_id,
                    outcome.action,
                    outcome.record.status
                );
            } else {
                debug!(
                    "Decision ({}, {}) {:?}, no write",
                    outcome.record.source, outcome.record.external_id, outcome.action
                );
            }
            return Ok(outcome);
        }

        warn!(
            "Decision ({}, {}) changed concurrently (attempt {}/{}), re-planning",
            candidate.source, candidate.external_id, attempt, MAX_CAS_ATTEMPTS
        );
    }

    Err(ReconcileError::Storage(anyhow!(
        "gave up on ({}, {}) after {} concurrent modifications",
        candidate.source,
        candidate.external_id,
        MAX_CAS_ATTEMPTS
    )))
}

#[async_trait]
impl DecisionStore for PgDecisionStore {
    async fn get(&self, source: Source, external_id: &str) -> Result<Option<DecisionRecord>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for decision get")
            .map_err(ReconcileError::Storage)?;
        fetch_decision(&*conn, source, external_id)
            .await
            .map_err(ReconcileError::Storage)
    }

    async fn apply(&self, candidate: DecisionRecord, origin: WriteOrigin) -> Result<UpsertOutcome> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for decision upsert")
            .map_err(ReconcileError::Storage)?;
        apply_with_cas(&*conn, candidate, origin).await
    }

    async fn list_by_status(&self, statuses: &[DecisionStatus]) -> Result<Vec<DecisionRecord>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for list_by_status")
            .map_err(ReconcileError::Storage)?;
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let rows = conn
            .query(
                "SELECT source, id, status, tid, message, created, changed, csv_item
                 FROM reconcile.decision
                 WHERE status = ANY($1)
                 ORDER BY source, id",
                &[&names],
            )
            .await
            .context("Failed to list decisions by status")
            .map_err(ReconcileError::Storage)?;
        rows.iter()
            .map(row_to_record)
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(ReconcileError::Storage)
    }
}
