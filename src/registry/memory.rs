// src/registry/memory.rs
use anyhow::anyhow;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;

use crate::error::{ReconcileError, Result};
use crate::models::core::{CanonicalField, CanonicalOrganization, NewCanonicalOrganization};
use crate::registry::CanonicalRegistry;

#[derive(Default)]
struct Vocabularies {
    terms: BTreeMap<String, BTreeMap<i64, CanonicalOrganization>>,
    next_id: i64,
}

/// Registry held in memory, keyed by vocabulary then id.
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: Mutex<Vocabularies>,
    lookups: AtomicUsize,
    creates: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an organization with a caller-chosen id.
    pub async fn insert(&self, vocabulary: &str, organization: CanonicalOrganization) {
        let mut inner = self.inner.lock().await;
        inner.next_id = inner.next_id.max(organization.id);
        inner
            .terms
            .entry(vocabulary.to_string())
            .or_default()
            .insert(organization.id, organization);
    }

    pub async fn get(&self, vocabulary: &str, id: i64) -> Option<CanonicalOrganization> {
        let inner = self.inner.lock().await;
        inner.terms.get(vocabulary).and_then(|t| t.get(&id)).cloned()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReconcileError::Registry(anyhow!("registry unavailable")));
        }
        Ok(())
    }
}

/// Convenience constructor for seeding registries.
pub fn organization(id: i64, display_name: &str) -> CanonicalOrganization {
    CanonicalOrganization {
        id,
        display_name: display_name.to_string(),
        short_name: None,
        long_name: None,
        aliases: BTreeSet::new(),
        external_reference_ids: BTreeSet::new(),
        parent_id: None,
    }
}

fn field_matches(org: &CanonicalOrganization, field: CanonicalField, value: &str) -> bool {
    match field {
        CanonicalField::Id => value.parse::<i64>().map(|id| id == org.id).unwrap_or(false),
        CanonicalField::ReferenceId => org.external_reference_ids.contains(value),
        CanonicalField::DisplayName => org.display_name == value,
        CanonicalField::LongName => org.long_name.as_deref() == Some(value),
        CanonicalField::ShortName => org.short_name.as_deref() == Some(value),
        CanonicalField::Alias => org.aliases.contains(value),
    }
}

#[async_trait]
impl CanonicalRegistry for InMemoryRegistry {
    async fn find_by_field(
        &self,
        vocabulary: &str,
        field: CanonicalField,
        value: &str,
    ) -> Result<Option<CanonicalOrganization>> {
        self.check_available()?;
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().await;
        Ok(inner.terms.get(vocabulary).and_then(|terms| {
            terms
                .values()
                .find(|org| field_matches(org, field, value))
                .cloned()
        }))
    }

    async fn create(
        &self,
        vocabulary: &str,
        fields: NewCanonicalOrganization,
    ) -> Result<CanonicalOrganization> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let mut org = organization(inner.next_id, &fields.display_name);
        org.parent_id = fields.parent_id;
        inner
            .terms
            .entry(vocabulary.to_string())
            .or_default()
            .insert(org.id, org.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(org)
    }

    async fn list_names(&self, vocabulary: &str) -> Result<Vec<(i64, String)>> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .terms
            .get(vocabulary)
            .map(|terms| {
                terms
                    .values()
                    .map(|org| (org.id, org.display_name.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
