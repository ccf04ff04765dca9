// src/matching/exact.rs
use log::debug;

use crate::error::Result;
use crate::matching::normalize::normalize_exact;
use crate::models::core::{CanonicalOrganization, CascadeField, ExternalRecord};
use crate::registry::CanonicalRegistry;

/// Fields looked up when resolving a bare name, e.g. a human-supplied
/// correction or a parent organization reference.
pub const NAME_CASCADE: [CascadeField; 4] = [
    CascadeField::DisplayName,
    CascadeField::LongName,
    CascadeField::ShortName,
    CascadeField::Alias,
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExactMatch {
    pub organization: CanonicalOrganization,
    /// Cascade field that produced the hit
    pub field: CascadeField,
    /// Normalized value that was looked up
    pub value: String,
}

fn prepare(field: CascadeField, raw: &str) -> String {
    if field.is_name() {
        normalize_exact(raw)
    } else {
        raw.trim().to_string()
    }
}

async fn lookup_field(
    registry: &dyn CanonicalRegistry,
    vocabulary: &str,
    field: CascadeField,
    raw: &str,
) -> Result<Option<ExactMatch>> {
    let value = prepare(field, raw);
    if value.is_empty() {
        return Ok(None);
    }
    let hit = registry
        .find_by_field(vocabulary, field.canonical_field(), &value)
        .await?;
    debug!(
        "Exact lookup {} -> {} = {:?}: {}",
        field.as_str(),
        field.canonical_field(),
        value,
        hit.as_ref()
            .map(|o| format!("hit {}", o.id))
            .unwrap_or_else(|| "miss".to_string())
    );
    Ok(hit.map(|organization| ExactMatch {
        organization,
        field,
        value,
    }))
}

/// Walks the field cascade in order and returns the first registry hit.
/// First field wins; there is no scoring among exact matches.
pub async fn find_exact_match(
    registry: &dyn CanonicalRegistry,
    vocabulary: &str,
    record: &ExternalRecord,
    cascade: &[CascadeField],
) -> Result<Option<ExactMatch>> {
    for &field in cascade {
        for raw in record.values_for(field) {
            if let Some(hit) = lookup_field(registry, vocabulary, field, raw).await? {
                return Ok(Some(hit));
            }
        }
    }
    Ok(None)
}

/// Resolves a single name through [`NAME_CASCADE`]. No fuzzy fallback.
pub async fn resolve_name_exact(
    registry: &dyn CanonicalRegistry,
    vocabulary: &str,
    name: &str,
) -> Result<Option<ExactMatch>> {
    for field in NAME_CASCADE {
        if let Some(hit) = lookup_field(registry, vocabulary, field, name).await? {
            return Ok(Some(hit));
        }
    }
    Ok(None)
}
