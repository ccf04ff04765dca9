// src/error.rs
//! Error taxonomy for the reconciliation core.
//!
//! Matching ambiguity is never an error: it is recorded as a decision.
//! Only configuration, input and collaborator failures surface here.

use thiserror::Error;

use crate::models::core::Source;

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The queue item names a source this engine has no field cascade for
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// A known source without a cascade definition
    #[error("Missing field cascade for source {0}")]
    MissingCascade(Source),

    /// A mandatory identifying field is absent or empty
    #[error("Missing mandatory field '{field}' for source {source_name}")]
    MissingField {
        field: &'static str,
        source_name: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Manual correction only upgrades an existing decision
    #[error("No decision record for ({origin}, {external_id})")]
    DecisionNotFound { origin: Source, external_id: String },

    #[error("Decision invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Decision store error: {0:#}")]
    Storage(anyhow::Error),

    #[error("Canonical registry error: {0:#}")]
    Registry(anyhow::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Collaborator failures may succeed on redelivery; everything else is
    /// structural and would fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Storage(_) | ReconcileError::Registry(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::UnsupportedSource(_) | ReconcileError::MissingCascade(_) => {
                "configuration"
            }
            ReconcileError::MissingField { .. }
            | ReconcileError::InvalidInput(_)
            | ReconcileError::DecisionNotFound { .. }
            | ReconcileError::Serialization(_) => "input",
            ReconcileError::InvariantViolation(_) => "invariant",
            ReconcileError::Storage(_) => "storage",
            ReconcileError::Registry(_) => "registry",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_collaborator_failures_are_retryable() {
        assert!(ReconcileError::Storage(anyhow::anyhow!("down")).is_retryable());
        assert!(ReconcileError::Registry(anyhow::anyhow!("down")).is_retryable());
        assert!(!ReconcileError::UnsupportedSource("x".into()).is_retryable());
        assert!(!ReconcileError::MissingField {
            field: "id",
            source_name: "catalog_a".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ReconcileError::UnsupportedSource("x".into()).kind(),
            "configuration"
        );
        assert_eq!(ReconcileError::InvalidInput("x".into()).kind(), "input");
        assert_eq!(
            ReconcileError::Storage(anyhow::anyhow!("x")).kind(),
            "storage"
        );
    }
}
