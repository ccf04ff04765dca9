// src/models/core.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{ReconcileError, Result};

pub use crate::models::source::{CanonicalField, CascadeField, Source, SourceSchema};

/// One organization record as delivered by an ingestion source.
/// Immutable once queued.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRecord {
    pub source: Source,
    pub external_id: String,
    pub display_name: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub abbreviation: Option<String>,
    pub aliases: Vec<String>,
    pub reference_ids: Vec<String>,
    /// The queue payload exactly as received, kept for audit and replay
    pub raw: serde_json::Value,
}

impl ExternalRecord {
    /// The name used for fuzzy matching.
    pub fn primary_name(&self) -> Option<&str> {
        self.display_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Values this record carries for one cascade attribute, in input order.
    pub fn values_for(&self, field: CascadeField) -> Vec<&str> {
        let values: Vec<&str> = match field {
            CascadeField::ReferenceId => self.reference_ids.iter().map(String::as_str).collect(),
            CascadeField::Abbreviation => self.abbreviation.as_deref().into_iter().collect(),
            CascadeField::DisplayName => self.display_name.as_deref().into_iter().collect(),
            CascadeField::LongName => self.long_name.as_deref().into_iter().collect(),
            CascadeField::ShortName => self.short_name.as_deref().into_iter().collect(),
            CascadeField::Alias => self.aliases.iter().map(String::as_str).collect(),
        };
        values
            .into_iter()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect()
    }

    pub fn raw_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.raw)?)
    }
}

/// Authoritative organization record owned by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalOrganization {
    pub id: i64,
    pub display_name: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub external_reference_ids: BTreeSet<String>,
    pub parent_id: Option<i64>,
}

/// Fields supplied when a human asks for a new canonical organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCanonicalOrganization {
    pub display_name: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Queued,
    Success,
    Partial,
    Mismatch,
    Skipped,
    Fixed,
}

impl DecisionStatus {
    pub const ALL: [DecisionStatus; 6] = [
        DecisionStatus::Queued,
        DecisionStatus::Success,
        DecisionStatus::Partial,
        DecisionStatus::Mismatch,
        DecisionStatus::Skipped,
        DecisionStatus::Fixed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Queued => "queued",
            DecisionStatus::Success => "success",
            DecisionStatus::Partial => "partial",
            DecisionStatus::Mismatch => "mismatch",
            DecisionStatus::Skipped => "skipped",
            DecisionStatus::Fixed => "fixed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        DecisionStatus::ALL
            .into_iter()
            .find(|s| s.as_str() == value)
            .ok_or_else(|| ReconcileError::InvalidInput(format!("unknown decision status '{}'", value)))
    }

    /// Automatic reprocessing never moves a row out of a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecisionStatus::Success | DecisionStatus::Fixed)
    }

    /// Statuses that carry a matched canonical id.
    pub fn requires_match(&self) -> bool {
        matches!(
            self,
            DecisionStatus::Success
                | DecisionStatus::Partial
                | DecisionStatus::Mismatch
                | DecisionStatus::Fixed
        )
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable outcome of reconciling one `(source, external_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub source: Source,
    pub external_id: String,
    pub status: DecisionStatus,
    pub matched_id: Option<i64>,
    pub message: String,
    pub raw_payload: String,
    /// Unix seconds
    pub created: i64,
    /// Unix seconds
    pub changed: i64,
}

impl DecisionRecord {
    /// Builds an unsaved candidate. Timestamps are assigned by the store.
    pub fn candidate(
        source: Source,
        external_id: impl Into<String>,
        status: DecisionStatus,
        matched_id: Option<i64>,
        message: impl Into<String>,
        raw_payload: impl Into<String>,
    ) -> Self {
        Self {
            source,
            external_id: external_id.into(),
            status,
            matched_id,
            message: message.into(),
            raw_payload: raw_payload.into(),
            created: 0,
            changed: 0,
        }
    }

    /// `matched_id` is set if and only if the status carries a match.
    pub fn check_invariants(&self) -> Result<()> {
        if self.external_id.trim().is_empty() {
            return Err(ReconcileError::InvariantViolation(
                "decision record without external_id".to_string(),
            ));
        }
        match (self.status.requires_match(), self.matched_id) {
            (true, None) => Err(ReconcileError::InvariantViolation(format!(
                "status {} requires matched_id for ({}, {})",
                self.status, self.source, self.external_id
            ))),
            (false, Some(id)) => Err(ReconcileError::InvariantViolation(format!(
                "status {} must not carry matched_id {} for ({}, {})",
                self.status, id, self.source, self.external_id
            ))),
            _ => Ok(()),
        }
    }

    /// Field-for-field comparison ignoring the store-managed timestamps.
    pub fn same_content(&self, other: &DecisionRecord) -> bool {
        self.source == other.source
            && self.external_id == other.external_id
            && self.status == other.status
            && self.matched_id == other.matched_id
            && self.message == other.message
            && self.raw_payload == other.raw_payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> ExternalRecord {
        ExternalRecord {
            source: Source::CatalogA,
            external_id: "42".to_string(),
            display_name: Some("  Contoso Corp ".to_string()),
            long_name: Some("".to_string()),
            short_name: None,
            abbreviation: None,
            aliases: vec!["CC".to_string(), " ".to_string(), "Contoso".to_string()],
            reference_ids: vec![],
            raw: json!({"source": "catalog_a", "id": "42"}),
        }
    }

    #[test]
    fn test_values_for_skips_blank_values() {
        let r = record();
        assert_eq!(r.values_for(CascadeField::DisplayName), vec!["Contoso Corp"]);
        assert!(r.values_for(CascadeField::LongName).is_empty());
        assert_eq!(r.values_for(CascadeField::Alias), vec!["CC", "Contoso"]);
        assert!(r.values_for(CascadeField::ReferenceId).is_empty());
    }

    #[test]
    fn test_primary_name_is_trimmed() {
        assert_eq!(record().primary_name(), Some("Contoso Corp"));
        let mut blank = record();
        blank.display_name = Some("   ".to_string());
        assert_eq!(blank.primary_name(), None);
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = DecisionStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![DecisionStatus::Success, DecisionStatus::Fixed]);
    }

    #[test]
    fn test_matched_id_invariant() {
        let ok = DecisionRecord::candidate(Source::CatalogA, "1", DecisionStatus::Partial, Some(7), "", "{}");
        assert!(ok.check_invariants().is_ok());

        let missing = DecisionRecord::candidate(Source::CatalogA, "1", DecisionStatus::Success, None, "", "{}");
        assert!(matches!(
            missing.check_invariants(),
            Err(ReconcileError::InvariantViolation(_))
        ));

        let extra = DecisionRecord::candidate(Source::CatalogA, "1", DecisionStatus::Skipped, Some(3), "", "{}");
        assert!(extra.check_invariants().is_err());
    }

    #[test]
    fn test_same_content_ignores_timestamps() {
        let mut a = DecisionRecord::candidate(Source::CatalogB, "x", DecisionStatus::Queued, None, "", "{}");
        let mut b = a.clone();
        a.created = 10;
        a.changed = 20;
        b.changed = 99;
        assert!(a.same_content(&b));
        b.message = "different".to_string();
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(DecisionStatus::parse("mismatch").unwrap(), DecisionStatus::Mismatch);
        assert!(DecisionStatus::parse("done").is_err());
    }
}
