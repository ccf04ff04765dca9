// src/models/correction.rs
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{ReconcileError, Result};
use crate::models::core::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Create a new canonical organization and point the decision at it
    CreateNew,
    /// Point the decision at an explicitly supplied canonical id
    AssignId,
    /// Resolve a supplied name by exact lookup only
    ConfirmByName,
}

impl CorrectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionMode::CreateNew => "create_new",
            CorrectionMode::AssignId => "assign_id",
            CorrectionMode::ConfirmByName => "confirm_by_name",
        }
    }
}

impl fmt::Display for CorrectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-curated correction for one decision record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionInstruction {
    pub source: Source,
    #[serde(rename = "id")]
    pub external_id: String,
    pub mode: CorrectionMode,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub term_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub parent_name: Option<String>,
}

impl CorrectionInstruction {
    /// The supplied name, if any, trimmed. Empty strings count as absent.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    pub fn parent_name(&self) -> Option<&str> {
        self.parent_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }

    /// Checks that the mode-specific payload is present.
    pub fn validate(&self) -> Result<()> {
        if self.external_id.trim().is_empty() {
            return Err(ReconcileError::MissingField {
                field: "id",
                source_name: self.source.to_string(),
            });
        }
        match self.mode {
            CorrectionMode::CreateNew | CorrectionMode::ConfirmByName if self.name().is_none() => {
                Err(ReconcileError::MissingField {
                    field: "name",
                    source_name: self.source.to_string(),
                })
            }
            CorrectionMode::AssignId if self.term_id.is_none() => Err(ReconcileError::MissingField {
                field: "term_id",
                source_name: self.source.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Queue producers send ids both as JSON numbers and as numeric strings.
fn lenient_opt_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(i64),
        Str(String),
    }

    match Option::<NumOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrString::Num(n)) => Ok(Some(n)),
        Some(NumOrString::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(NumOrString::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid id '{}': {}", s, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assign_id_with_string_term() {
        let instruction: CorrectionInstruction = serde_json::from_value(json!({
            "source": "catalog_a",
            "id": "42",
            "mode": "assign_id",
            "term_id": "99"
        }))
        .unwrap();
        assert_eq!(instruction.mode, CorrectionMode::AssignId);
        assert_eq!(instruction.term_id, Some(99));
        assert!(instruction.validate().is_ok());
    }

    #[test]
    fn test_parse_numeric_parent_and_blank_name() {
        let instruction: CorrectionInstruction = serde_json::from_value(json!({
            "source": "catalog_b",
            "id": "ACME-1",
            "mode": "create_new",
            "name": "  ",
            "parent_id": 12
        }))
        .unwrap();
        assert_eq!(instruction.parent_id, Some(12));
        assert_eq!(instruction.name(), None);
        assert!(matches!(
            instruction.validate(),
            Err(ReconcileError::MissingField { field: "name", .. })
        ));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let parsed: std::result::Result<CorrectionInstruction, _> = serde_json::from_value(json!({
            "source": "catalog_a",
            "id": "1",
            "mode": "delete"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_assign_id_requires_term() {
        let instruction = CorrectionInstruction {
            source: Source::CatalogA,
            external_id: "1".to_string(),
            mode: CorrectionMode::AssignId,
            name: None,
            term_id: None,
            parent_id: None,
            parent_name: None,
        };
        assert!(matches!(
            instruction.validate(),
            Err(ReconcileError::MissingField { field: "term_id", .. })
        ));
    }
}
