// src/correction.rs
//! Manual Correction Worker.
//!
//! Applies human-curated instructions to an existing decision row. A human
//! asserts authority, so a correction may override an automatic `success`,
//! but only an instruction that actually changes the match writes anything.

use std::sync::Arc;

use crate::error::{ReconcileError, Result};
use crate::matching::exact::resolve_name_exact;
use crate::matching::fuzzy::CandidateSnapshot;
use crate::matching::normalize::normalize_exact;
use crate::models::core::{
    CanonicalField, DecisionRecord, DecisionStatus, NewCanonicalOrganization,
};
use crate::models::correction::{CorrectionInstruction, CorrectionMode};
use crate::registry::CanonicalRegistry;
use crate::store::{DecisionStore, UpsertAction, WriteOrigin};
use crate::utils::logging::{Component, ReconcileLogger};

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionOutcome {
    pub record: DecisionRecord,
    /// `None` for a no-op
    pub upsert: Option<UpsertAction>,
    /// Set when `create_new` created a new canonical organization
    pub created_id: Option<i64>,
}

impl CorrectionOutcome {
    fn noop(record: DecisionRecord) -> Self {
        Self {
            record,
            upsert: None,
            created_id: None,
        }
    }

    pub fn wrote(&self) -> bool {
        self.upsert.map(|a| a.wrote()).unwrap_or(false)
    }
}

fn describe(id: Option<i64>) -> String {
    id.map(|i| i.to_string()).unwrap_or_else(|| "none".to_string())
}

pub struct ManualCorrectionWorker {
    store: Arc<dyn DecisionStore>,
    registry: Arc<dyn CanonicalRegistry>,
    snapshot: Arc<CandidateSnapshot>,
    vocabulary: String,
    logger: ReconcileLogger,
}

impl ManualCorrectionWorker {
    pub fn new(
        store: Arc<dyn DecisionStore>,
        registry: Arc<dyn CanonicalRegistry>,
        snapshot: Arc<CandidateSnapshot>,
        vocabulary: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            snapshot,
            vocabulary: vocabulary.into(),
            logger: ReconcileLogger::new(Component::Correction),
        }
    }

    pub async fn apply(&self, instruction: &CorrectionInstruction) -> Result<CorrectionOutcome> {
        instruction.validate()?;
        self.logger
            .log_item_start(instruction.source, &instruction.external_id);

        let existing = self
            .store
            .get(instruction.source, &instruction.external_id)
            .await?
            .ok_or_else(|| ReconcileError::DecisionNotFound {
                origin: instruction.source,
                external_id: instruction.external_id.clone(),
            })?;

        match instruction.mode {
            CorrectionMode::CreateNew => self.create_new(instruction, existing).await,
            CorrectionMode::AssignId => self.assign_id(instruction, existing).await,
            CorrectionMode::ConfirmByName => self.confirm_by_name(instruction, existing).await,
        }
    }

    async fn write_fixed(
        &self,
        existing: &DecisionRecord,
        matched_id: i64,
        message: String,
    ) -> Result<(DecisionRecord, UpsertAction)> {
        let candidate = DecisionRecord::candidate(
            existing.source,
            existing.external_id.clone(),
            DecisionStatus::Fixed,
            Some(matched_id),
            message,
            existing.raw_payload.clone(),
        );
        let outcome = self.store.apply(candidate, WriteOrigin::Manual).await?;
        self.logger.log_outcome(&outcome.record, outcome.action);
        Ok((outcome.record, outcome.action))
    }

    fn required_name<'a>(&self, instruction: &'a CorrectionInstruction) -> Result<&'a str> {
        instruction.name().ok_or_else(|| ReconcileError::MissingField {
            field: "name",
            source_name: instruction.source.to_string(),
        })
    }

    async fn create_new(
        &self,
        instruction: &CorrectionInstruction,
        existing: DecisionRecord,
    ) -> Result<CorrectionOutcome> {
        let name = normalize_exact(self.required_name(instruction)?);

        // Redelivery of an already applied create_new must not create a twin.
        if existing.status == DecisionStatus::Fixed {
            if let Some(current) = existing.matched_id {
                let same_name = self
                    .registry
                    .find_by_field(&self.vocabulary, CanonicalField::Id, &current.to_string())
                    .await?
                    .map(|org| org.display_name == name)
                    .unwrap_or(false);
                if same_name {
                    self.logger.log_noop(
                        existing.source,
                        &existing.external_id,
                        "already fixed to an organization with this name",
                    );
                    return Ok(CorrectionOutcome::noop(existing));
                }
            }
        }

        let parent_id = match (instruction.parent_id, instruction.parent_name()) {
            (Some(id), _) => {
                let known = self
                    .registry
                    .find_by_field(&self.vocabulary, CanonicalField::Id, &id.to_string())
                    .await?;
                if known.is_none() {
                    return Err(ReconcileError::InvalidInput(format!(
                        "parent organization {} does not exist in {}",
                        id, self.vocabulary
                    )));
                }
                Some(id)
            }
            (None, Some(parent_name)) => {
                match resolve_name_exact(self.registry.as_ref(), &self.vocabulary, parent_name)
                    .await?
                {
                    Some(hit) => Some(hit.organization.id),
                    None => {
                        self.logger.log_absorbed(
                            existing.source,
                            &existing.external_id,
                            &format!("parent \"{}\" not found, creating without parent", parent_name),
                        );
                        None
                    }
                }
            }
            (None, None) => None,
        };

        // An organization left behind by an earlier attempt whose decision
        // write failed is picked up instead of created twice.
        let earlier = self
            .registry
            .find_by_field(&self.vocabulary, CanonicalField::DisplayName, &name)
            .await?
            .filter(|org| org.parent_id == parent_id);
        let (organization, created_id) = match earlier {
            Some(org) => {
                self.logger.log_absorbed(
                    existing.source,
                    &existing.external_id,
                    &format!("reusing canonical organization {} \"{}\"", org.id, org.display_name),
                );
                (org, None)
            }
            None => {
                let created = self
                    .registry
                    .create(
                        &self.vocabulary,
                        NewCanonicalOrganization {
                            display_name: name.clone(),
                            parent_id,
                        },
                    )
                    .await?;
                self.snapshot.invalidate().await;
                let id = created.id;
                (created, Some(id))
            }
        };

        let mut message = format!(
            "Created canonical organization {} \"{}\"",
            organization.id, organization.display_name
        );
        if let Some(pid) = parent_id {
            message.push_str(&format!(" under parent {}", pid));
        }
        let (record, action) = self.write_fixed(&existing, organization.id, message).await?;
        Ok(CorrectionOutcome {
            record,
            upsert: Some(action),
            created_id,
        })
    }

    async fn assign_id(
        &self,
        instruction: &CorrectionInstruction,
        existing: DecisionRecord,
    ) -> Result<CorrectionOutcome> {
        let term_id = instruction.term_id.ok_or_else(|| ReconcileError::MissingField {
            field: "term_id",
            source_name: instruction.source.to_string(),
        })?;
        if existing.matched_id == Some(term_id) {
            self.logger
                .log_noop(existing.source, &existing.external_id, "already matched to this id");
            return Ok(CorrectionOutcome::noop(existing));
        }

        let known = self
            .registry
            .find_by_field(&self.vocabulary, CanonicalField::Id, &term_id.to_string())
            .await?;
        if known.is_none() {
            return Err(ReconcileError::InvalidInput(format!(
                "canonical organization {} does not exist in {}",
                term_id, self.vocabulary
            )));
        }

        let message = format!(
            "Manually assigned {} (was {})",
            term_id,
            describe(existing.matched_id)
        );
        let (record, action) = self.write_fixed(&existing, term_id, message).await?;
        Ok(CorrectionOutcome {
            record,
            upsert: Some(action),
            created_id: None,
        })
    }

    async fn confirm_by_name(
        &self,
        instruction: &CorrectionInstruction,
        existing: DecisionRecord,
    ) -> Result<CorrectionOutcome> {
        let name = self.required_name(instruction)?;
        let Some(hit) = resolve_name_exact(self.registry.as_ref(), &self.vocabulary, name).await?
        else {
            self.logger.log_absorbed(
                existing.source,
                &existing.external_id,
                &format!("name \"{}\" did not resolve, decision left as is", name),
            );
            return Ok(CorrectionOutcome::noop(existing));
        };

        let resolved = hit.organization.id;
        if existing.matched_id == Some(resolved) {
            self.logger
                .log_noop(existing.source, &existing.external_id, "name resolves to current match");
            return Ok(CorrectionOutcome::noop(existing));
        }

        let message = format!(
            "Confirmed by name \"{}\" as {} (was {})",
            hit.value,
            resolved,
            describe(existing.matched_id)
        );
        let (record, action) = self.write_fixed(&existing, resolved, message).await?;
        Ok(CorrectionOutcome {
            record,
            upsert: Some(action),
            created_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::core::Source;
    use crate::registry::memory::{organization, InMemoryRegistry};
    use crate::store::memory::InMemoryDecisionStore;
    use std::time::Duration;

    const VOCAB: &str = "organizations";

    struct Fixture {
        store: Arc<InMemoryDecisionStore>,
        registry: Arc<InMemoryRegistry>,
        worker: ManualCorrectionWorker,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryDecisionStore::new());
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(VOCAB, organization(7, "Northwind Traders")).await;
        registry.insert(VOCAB, organization(99, "Contoso Corp")).await;
        let worker = ManualCorrectionWorker::new(
            store.clone(),
            registry.clone(),
            Arc::new(CandidateSnapshot::new(Duration::from_secs(300))),
            VOCAB,
        );
        Fixture {
            store,
            registry,
            worker,
        }
    }

    async fn seed(store: &InMemoryDecisionStore, status: DecisionStatus, matched: Option<i64>) -> DecisionRecord {
        let mut row = DecisionRecord::candidate(Source::CatalogA, "42", status, matched, "auto", "{\"id\":\"42\"}");
        row.created = 100;
        row.changed = 100;
        store.insert_raw(row.clone()).await;
        row
    }

    fn instruction(mode: CorrectionMode) -> CorrectionInstruction {
        CorrectionInstruction {
            source: Source::CatalogA,
            external_id: "42".to_string(),
            mode,
            name: None,
            term_id: None,
            parent_id: None,
            parent_name: None,
        }
    }

    #[tokio::test]
    async fn test_missing_decision_is_fatal() {
        let f = fixture().await;
        let mut i = instruction(CorrectionMode::AssignId);
        i.term_id = Some(7);
        let err = f.worker.apply(&i).await.unwrap_err();
        assert!(matches!(err, ReconcileError::DecisionNotFound { .. }));
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_assign_id_same_id_is_noop() {
        let f = fixture().await;
        let seeded = seed(&f.store, DecisionStatus::Partial, Some(7)).await;
        let mut i = instruction(CorrectionMode::AssignId);
        i.term_id = Some(7);
        let outcome = f.worker.apply(&i).await.unwrap();
        assert_eq!(outcome.upsert, None);
        assert_eq!(outcome.record, seeded);
        assert_eq!(f.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_assign_unknown_id_is_rejected() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Mismatch, Some(7)).await;
        let mut i = instruction(CorrectionMode::AssignId);
        i.term_id = Some(12345);
        assert!(matches!(
            f.worker.apply(&i).await,
            Err(ReconcileError::InvalidInput(_))
        ));
        assert_eq!(f.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_assign_id_overrides_success() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Success, Some(7)).await;
        let mut i = instruction(CorrectionMode::AssignId);
        i.term_id = Some(99);
        let outcome = f.worker.apply(&i).await.unwrap();
        assert_eq!(outcome.record.status, DecisionStatus::Fixed);
        assert_eq!(outcome.record.matched_id, Some(99));
        assert_eq!(outcome.record.message, "Manually assigned 99 (was 7)");
        assert_eq!(outcome.record.created, 100);
    }

    #[tokio::test]
    async fn test_confirm_by_name_unresolvable_leaves_row() {
        let f = fixture().await;
        let seeded = seed(&f.store, DecisionStatus::Mismatch, Some(7)).await;
        let mut i = instruction(CorrectionMode::ConfirmByName);
        i.name = Some("Nobody Inc".to_string());
        let outcome = f.worker.apply(&i).await.unwrap();
        assert_eq!(outcome.upsert, None);
        let stored = f.store.get(Source::CatalogA, "42").await.unwrap().unwrap();
        assert_eq!(stored, seeded);
        assert_eq!(f.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_confirm_by_name_resolves_exactly() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Mismatch, Some(7)).await;
        let mut i = instruction(CorrectionMode::ConfirmByName);
        i.name = Some("Contoso Corp (inactive)".to_string());
        let outcome = f.worker.apply(&i).await.unwrap();
        assert_eq!(outcome.record.status, DecisionStatus::Fixed);
        assert_eq!(outcome.record.matched_id, Some(99));

        // Same instruction again resolves to the current match
        let again = f.worker.apply(&i).await.unwrap();
        assert_eq!(again.upsert, None);
        assert_eq!(f.store.writes(), 1);
    }

    #[tokio::test]
    async fn test_confirm_by_name_has_no_fuzzy_fallback() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Skipped, None).await;
        let mut i = instruction(CorrectionMode::ConfirmByName);
        i.name = Some("Contoso Cor".to_string());
        let outcome = f.worker.apply(&i).await.unwrap();
        assert_eq!(outcome.record.status, DecisionStatus::Skipped);
    }

    #[tokio::test]
    async fn test_create_new_with_parent_name_and_redelivery() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Skipped, None).await;
        let mut i = instruction(CorrectionMode::CreateNew);
        i.name = Some("Fabrikam Relief".to_string());
        i.parent_name = Some("Northwind Traders".to_string());

        let outcome = f.worker.apply(&i).await.unwrap();
        let new_id = outcome.created_id.unwrap();
        assert_eq!(outcome.record.status, DecisionStatus::Fixed);
        assert_eq!(outcome.record.matched_id, Some(new_id));
        assert_eq!(
            outcome.record.message,
            format!("Created canonical organization {} \"Fabrikam Relief\" under parent 7", new_id)
        );
        let created = f.registry.get(VOCAB, new_id).await.unwrap();
        assert_eq!(created.parent_id, Some(7));

        let redelivered = f.worker.apply(&i).await.unwrap();
        assert_eq!(redelivered.upsert, None);
        assert_eq!(f.registry.creates(), 1);
    }

    #[tokio::test]
    async fn test_create_new_with_unknown_parent_name() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Mismatch, Some(7)).await;
        let mut i = instruction(CorrectionMode::CreateNew);
        i.name = Some("Orphan Org".to_string());
        i.parent_name = Some("Missing Parent".to_string());
        let outcome = f.worker.apply(&i).await.unwrap();
        let created = f.registry.get(VOCAB, outcome.created_id.unwrap()).await.unwrap();
        assert_eq!(created.parent_id, None);
    }

    #[tokio::test]
    async fn test_registry_failure_is_retryable() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Skipped, None).await;
        f.registry.set_unavailable(true);
        let mut i = instruction(CorrectionMode::ConfirmByName);
        i.name = Some("Contoso Corp".to_string());
        let err = f.worker.apply(&i).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_create_new_after_failed_write_reuses_organization() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Skipped, None).await;
        let mut i = instruction(CorrectionMode::CreateNew);
        i.name = Some("Woodgrove Bank".to_string());

        f.store.fail_next_applies(1);
        let err = f.worker.apply(&i).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.registry.creates(), 1);

        let redelivered = f.worker.apply(&i).await.unwrap();
        assert_eq!(f.registry.creates(), 1);
        assert_eq!(redelivered.created_id, None);
        assert_eq!(redelivered.record.status, DecisionStatus::Fixed);
        let matched = redelivered.record.matched_id.unwrap();
        assert_eq!(
            f.registry.get(VOCAB, matched).await.unwrap().display_name,
            "Woodgrove Bank"
        );
    }

    #[tokio::test]
    async fn test_create_new_with_unknown_parent_id_is_rejected() {
        let f = fixture().await;
        let seeded = seed(&f.store, DecisionStatus::Skipped, None).await;
        let mut i = instruction(CorrectionMode::CreateNew);
        i.name = Some("Orphan Org".to_string());
        i.parent_id = Some(4242);

        let err = f.worker.apply(&i).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidInput(_)));
        assert!(!err.is_retryable());
        assert_eq!(f.registry.creates(), 0);
        assert_eq!(f.store.get(Source::CatalogA, "42").await.unwrap().unwrap(), seeded);
    }

    #[tokio::test]
    async fn test_create_new_with_known_parent_id() {
        let f = fixture().await;
        seed(&f.store, DecisionStatus::Skipped, None).await;
        let mut i = instruction(CorrectionMode::CreateNew);
        i.name = Some("Northwind Logistics".to_string());
        i.parent_id = Some(7);

        let outcome = f.worker.apply(&i).await.unwrap();
        let created = f.registry.get(VOCAB, outcome.created_id.unwrap()).await.unwrap();
        assert_eq!(created.parent_id, Some(7));
        assert!(outcome.record.message.ends_with(" under parent 7"));
    }
}
