// src/store/mod.rs
//! Decision Store: durable table of reconciliation decisions keyed by
//! `(source, external_id)`.
//!
//! Both backends delegate the write decision to [`plan_upsert`], so the
//! terminal-status and compare-and-skip rules live in exactly one place.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{ReconcileError, Result};
use crate::models::core::{DecisionRecord, DecisionStatus, Source};

/// What an upsert did with the candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Updated,
    /// Candidate identical to the stored row; nothing written
    Unchanged,
    /// Stored row is terminal and the candidate is not; nothing written
    RejectedTerminal,
}

impl UpsertAction {
    pub fn wrote(&self) -> bool {
        matches!(self, UpsertAction::Inserted | UpsertAction::Updated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub record: DecisionRecord,
    pub action: UpsertAction,
}

/// Who produced a candidate. Only a manual correction may replace a
/// terminal row, and only with `fixed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    Automatic,
    Manual,
}

/// Decides how a candidate relates to the stored row. `record` is the row as
/// it must look after the call.
pub fn plan_upsert(
    existing: Option<&DecisionRecord>,
    mut candidate: DecisionRecord,
    origin: WriteOrigin,
    now: i64,
) -> Result<UpsertOutcome> {
    candidate.check_invariants()?;
    match (origin, candidate.status) {
        (WriteOrigin::Automatic, DecisionStatus::Fixed) => {
            return Err(ReconcileError::InvariantViolation(
                "automatic resolution cannot produce a fixed decision".to_string(),
            ));
        }
        (WriteOrigin::Manual, status) if status != DecisionStatus::Fixed => {
            return Err(ReconcileError::InvariantViolation(format!(
                "manual correction must write fixed, not {}",
                status
            )));
        }
        _ => {}
    }

    let Some(existing) = existing else {
        candidate.created = now;
        candidate.changed = now;
        return Ok(UpsertOutcome {
            record: candidate,
            action: UpsertAction::Inserted,
        });
    };

    // Checked against the row read here, not against a caller's earlier read.
    if existing.status.is_terminal() && origin == WriteOrigin::Automatic {
        return Ok(UpsertOutcome {
            record: existing.clone(),
            action: UpsertAction::RejectedTerminal,
        });
    }

    if existing.same_content(&candidate) {
        return Ok(UpsertOutcome {
            record: existing.clone(),
            action: UpsertAction::Unchanged,
        });
    }

    candidate.created = existing.created;
    candidate.changed = now;
    Ok(UpsertOutcome {
        record: candidate,
        action: UpsertAction::Updated,
    })
}

pub(crate) fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[async_trait]
pub trait DecisionStore: Send + Sync {
    async fn get(&self, source: Source, external_id: &str) -> Result<Option<DecisionRecord>>;

    /// Loads the stored row, applies [`plan_upsert`] and writes only when the
    /// plan says so. Storage failures propagate to the caller.
    async fn apply(&self, candidate: DecisionRecord, origin: WriteOrigin) -> Result<UpsertOutcome>;

    /// Rows currently in any of `statuses`, ordered by key.
    async fn list_by_status(&self, statuses: &[DecisionStatus]) -> Result<Vec<DecisionRecord>>;

    /// Automatic upsert: returns the row as stored after the call.
    async fn upsert(&self, candidate: DecisionRecord) -> Result<DecisionRecord> {
        Ok(self.apply(candidate, WriteOrigin::Automatic).await?.record)
    }
}
