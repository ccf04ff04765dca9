// src/registry/mod.rs
//! Canonical registry seam. The registry itself is owned elsewhere; the core
//! only looks organizations up by exact field value and, on explicit human
//! instruction, creates new ones.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::core::{CanonicalField, CanonicalOrganization, NewCanonicalOrganization};

#[async_trait]
pub trait CanonicalRegistry: Send + Sync {
    /// Exact lookup. For multi-valued fields (aliases, reference ids) a hit is
    /// membership. Several hits resolve to the lowest id.
    async fn find_by_field(
        &self,
        vocabulary: &str,
        field: CanonicalField,
        value: &str,
    ) -> Result<Option<CanonicalOrganization>>;

    async fn create(
        &self,
        vocabulary: &str,
        fields: NewCanonicalOrganization,
    ) -> Result<CanonicalOrganization>;

    /// `(id, display_name)` for every organization, ordered by id.
    async fn list_names(&self, vocabulary: &str) -> Result<Vec<(i64, String)>>;
}
