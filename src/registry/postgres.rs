// src/registry/postgres.rs
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use std::collections::BTreeSet;
use tokio_postgres::Row;

use crate::error::{ReconcileError, Result};
use crate::models::core::{CanonicalField, CanonicalOrganization, NewCanonicalOrganization};
use crate::registry::CanonicalRegistry;
use crate::utils::db_connect::PgPool;

const COLUMNS: &str =
    "id, display_name, short_name, long_name, aliases, external_reference_ids, parent_id";

/// Registry view over `registry.organization`.
#[derive(Clone)]
pub struct PgCanonicalRegistry {
    pool: PgPool,
}

impl PgCanonicalRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// WHERE fragment for one field. `$1` is the vocabulary, `$2` the value.
fn field_predicate(field: CanonicalField) -> &'static str {
    match field {
        CanonicalField::Id => "id = $2::TEXT::BIGINT",
        CanonicalField::ReferenceId => "$2 = ANY(external_reference_ids)",
        CanonicalField::DisplayName => "display_name = $2",
        CanonicalField::LongName => "long_name = $2",
        CanonicalField::ShortName => "short_name = $2",
        CanonicalField::Alias => "$2 = ANY(aliases)",
    }
}

fn row_to_organization(row: &Row) -> CanonicalOrganization {
    let aliases: Vec<String> = row.get("aliases");
    let refs: Vec<String> = row.get("external_reference_ids");
    CanonicalOrganization {
        id: row.get("id"),
        display_name: row.get("display_name"),
        short_name: row.get("short_name"),
        long_name: row.get("long_name"),
        aliases: aliases.into_iter().collect::<BTreeSet<_>>(),
        external_reference_ids: refs.into_iter().collect::<BTreeSet<_>>(),
        parent_id: row.get("parent_id"),
    }
}

#[async_trait]
impl CanonicalRegistry for PgCanonicalRegistry {
    async fn find_by_field(
        &self,
        vocabulary: &str,
        field: CanonicalField,
        value: &str,
    ) -> Result<Option<CanonicalOrganization>> {
        if field == CanonicalField::Id && value.trim().parse::<i64>().is_err() {
            return Ok(None);
        }
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for registry lookup")
            .map_err(ReconcileError::Registry)?;
        let sql = format!(
            "SELECT {} FROM registry.organization
             WHERE vocabulary = $1 AND {}
             ORDER BY id
             LIMIT 1",
            COLUMNS,
            field_predicate(field)
        );
        let value = value.trim();
        let row = conn
            .query_opt(sql.as_str(), &[&vocabulary, &value])
            .await
            .with_context(|| format!("Failed registry lookup on {}", field))
            .map_err(ReconcileError::Registry)?;
        debug!(
            "Registry lookup {}={:?} in {}: {}",
            field,
            value,
            vocabulary,
            if row.is_some() { "hit" } else { "miss" }
        );
        Ok(row.as_ref().map(row_to_organization))
    }

    async fn create(
        &self,
        vocabulary: &str,
        fields: NewCanonicalOrganization,
    ) -> Result<CanonicalOrganization> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for registry create")
            .map_err(ReconcileError::Registry)?;
        let sql = format!(
            "INSERT INTO registry.organization (vocabulary, display_name, parent_id)
             VALUES ($1, $2, $3)
             RETURNING {}",
            COLUMNS
        );
        let row = conn
            .query_one(
                sql.as_str(),
                &[&vocabulary, &fields.display_name, &fields.parent_id],
            )
            .await
            .context("Failed to insert canonical organization")
            .map_err(ReconcileError::Registry)?;
        let org = row_to_organization(&row);
        info!(
            "🏢 Created canonical organization {} \"{}\" in {}",
            org.id, org.display_name, vocabulary
        );
        Ok(org)
    }

    async fn list_names(&self, vocabulary: &str) -> Result<Vec<(i64, String)>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for registry snapshot")
            .map_err(ReconcileError::Registry)?;
        let rows = conn
            .query(
                "SELECT id, display_name FROM registry.organization
                 WHERE vocabulary = $1
                 ORDER BY id",
                &[&vocabulary],
            )
            .await
            .context("Failed to load canonical name snapshot")
            .map_err(ReconcileError::Registry)?;
        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("display_name")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_valued_fields_use_membership() {
        assert!(field_predicate(CanonicalField::Alias).contains("ANY(aliases)"));
        assert!(field_predicate(CanonicalField::ReferenceId).contains("ANY(external_reference_ids)"));
        assert_eq!(field_predicate(CanonicalField::ShortName), "short_name = $2");
    }
}
