// src/resolver.rs
//! Decision Resolver: exact cascade, then fuzzy fallback, then a persisted
//! decision.
//!
//! Per `(source, external_id)`:
//! - no row / `queued` / `partial` / `mismatch` / `skipped`: run the full
//!   cascade and upsert whatever it yields (identical results are no-ops).
//! - `success` / `fixed`: terminal, nothing is recomputed or written.

use indicatif::ProgressBar;
use std::sync::Arc;

use crate::error::{ReconcileError, Result};
use crate::matching::exact::find_exact_match;
use crate::matching::fuzzy::{
    classify_fuzzy_score, CandidateSnapshot, CompositeScorer, SimilarityScorer,
};
use crate::matching::normalize::normalize_exact;
use crate::models::core::{DecisionRecord, DecisionStatus, ExternalRecord};
use crate::queue::parse_resolution_item;
use crate::registry::CanonicalRegistry;
use crate::store::{DecisionStore, UpsertAction, WriteOrigin};
use crate::utils::logging::{Component, ReconcileLogger};

/// Statuses automatic reprocessing is allowed to revisit.
pub const REPROCESSABLE: [DecisionStatus; 4] = [
    DecisionStatus::Queued,
    DecisionStatus::Partial,
    DecisionStatus::Mismatch,
    DecisionStatus::Skipped,
];

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub record: DecisionRecord,
    /// `None` when a terminal row short-circuited resolution
    pub upsert: Option<UpsertAction>,
}

impl Resolution {
    pub fn wrote(&self) -> bool {
        self.upsert.map(|a| a.wrote()).unwrap_or(false)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub examined: usize,
    pub rewritten: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct DecisionResolver {
    store: Arc<dyn DecisionStore>,
    registry: Arc<dyn CanonicalRegistry>,
    scorer: Arc<dyn SimilarityScorer>,
    snapshot: Arc<CandidateSnapshot>,
    vocabulary: String,
    logger: ReconcileLogger,
}

impl DecisionResolver {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        registry: Arc<dyn CanonicalRegistry>,
        snapshot: Arc<CandidateSnapshot>,
        vocabulary: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            scorer: Arc::new(CompositeScorer::default()),
            snapshot,
            vocabulary: vocabulary.into(),
            logger: ReconcileLogger::new(Component::Resolver),
        }
    }

    /// Swaps the fuzzy scoring algorithm.
    pub fn with_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Mandatory identifying fields. Failing here is fatal for the item only.
    fn validate(record: &ExternalRecord) -> Result<()> {
        let schema = record.source.schema();
        if record.external_id.trim().is_empty() {
            return Err(ReconcileError::MissingField {
                field: schema.id_key,
                source_name: record.source.to_string(),
            });
        }
        let has_name = record
            .primary_name()
            .map(|n| !normalize_exact(n).is_empty())
            .unwrap_or(false);
        if !has_name {
            return Err(ReconcileError::MissingField {
                field: schema.display_name_key,
                source_name: record.source.to_string(),
            });
        }
        Ok(())
    }

    /// Runs the matching cascade and returns the unsaved candidate decision.
    pub async fn decide(&self, record: &ExternalRecord) -> Result<DecisionRecord> {
        Self::validate(record)?;
        let cascade = record.source.field_cascade()?;
        let raw_payload = record.raw_payload()?;
        let candidate = |status, matched_id, message: String| {
            DecisionRecord::candidate(
                record.source,
                record.external_id.clone(),
                status,
                matched_id,
                message,
                raw_payload.clone(),
            )
        };

        if let Some(hit) =
            find_exact_match(self.registry.as_ref(), &self.vocabulary, record, cascade).await?
        {
            return Ok(candidate(
                DecisionStatus::Success,
                Some(hit.organization.id),
                String::new(),
            ));
        }

        let query = record.primary_name().unwrap_or_default();
        let index = self
            .snapshot
            .get(self.registry.as_ref(), &self.vocabulary)
            .await?;
        match index.best_match(query, self.scorer.as_ref()) {
            Some(best) => Ok(candidate(
                classify_fuzzy_score(best.score),
                Some(best.id),
                format!(
                    "Fuzzy match \"{}\" ~ \"{}\" (score {:.4})",
                    query, best.display_name, best.score
                ),
            )),
            None => {
                self.logger.log_absorbed(
                    record.source,
                    &record.external_id,
                    "no fuzzy candidates in the registry snapshot",
                );
                Ok(candidate(
                    DecisionStatus::Skipped,
                    None,
                    format!("No canonical candidates for \"{}\"", query),
                ))
            }
        }
    }

    /// Resolves one queue item end to end.
    pub async fn resolve(&self, record: &ExternalRecord) -> Result<Resolution> {
        self.logger.log_item_start(record.source, &record.external_id);
        Self::validate(record)?;

        if let Some(existing) = self.store.get(record.source, &record.external_id).await? {
            if existing.status.is_terminal() {
                self.logger.log_terminal_skip(&existing);
                return Ok(Resolution {
                    record: existing,
                    upsert: None,
                });
            }
        }

        let candidate = self.decide(record).await?;
        let outcome = self.store.apply(candidate, WriteOrigin::Automatic).await?;
        self.logger.log_outcome(&outcome.record, outcome.action);
        Ok(Resolution {
            record: outcome.record,
            upsert: Some(outcome.action),
        })
    }

    /// Records first sight of an item as `queued`. Existing rows are left
    /// untouched; returns the new row when one was created.
    pub async fn register(&self, record: &ExternalRecord) -> Result<Option<DecisionRecord>> {
        Self::validate(record)?;
        if self.store.get(record.source, &record.external_id).await?.is_some() {
            return Ok(None);
        }
        let queued = DecisionRecord::candidate(
            record.source,
            record.external_id.clone(),
            DecisionStatus::Queued,
            None,
            String::new(),
            record.raw_payload()?,
        );
        let outcome = self.store.apply(queued, WriteOrigin::Automatic).await?;
        Ok(outcome.action.wrote().then_some(outcome.record))
    }

    /// Re-resolves every non-terminal row from its stored raw payload.
    /// Individual failures are logged and counted; storage failures on the
    /// listing itself propagate.
    pub async fn replay_pending(&self, progress: Option<&ProgressBar>) -> Result<ReplaySummary> {
        let logger = ReconcileLogger::new(Component::Replay);
        let pending = self.store.list_by_status(&REPROCESSABLE).await?;
        if let Some(pb) = progress {
            pb.set_length(pending.len() as u64);
        }

        let mut summary = ReplaySummary::default();
        for row in pending {
            summary.examined += 1;
            let item = format!("({}, {})", row.source, row.external_id);
            let result = match serde_json::from_str(&row.raw_payload) {
                Ok(payload) => match parse_resolution_item(&payload) {
                    Ok(record) => self.resolve(&record).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(ReconcileError::from(e)),
            };
            match result {
                Ok(resolution) if resolution.wrote() => summary.rewritten += 1,
                Ok(_) => summary.unchanged += 1,
                Err(e) if e.is_retryable() => return Err(e),
                Err(e) => {
                    logger.log_failure(&item, &e);
                    summary.failed += 1;
                }
            }
            if let Some(pb) = progress {
                pb.inc(1);
            }
        }

        logger.log_summary(summary.examined, summary.failed, summary.unchanged);
        Ok(summary)
    }
}
