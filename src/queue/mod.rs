// src/queue/mod.rs
//! Queue items and the job queue seam that delivers them.
//!
//! Delivery is at-least-once with no ordering guarantee across records;
//! processing is made safe by the decision store's upsert rules, not here.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::{ReconcileError, Result};
use crate::models::core::{ExternalRecord, Source};
use crate::models::correction::CorrectionInstruction;

/// Separator for multi-valued fields delivered as one string.
const MULTI_VALUE_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: i64,
    pub queue: String,
    pub payload: Value,
    /// Deliveries so far, including this one
    pub attempts: i32,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, queue: &str, payload: &Value) -> Result<i64>;

    /// Claims the oldest ready job and counts the delivery attempt.
    async fn claim_next(&self, queue: &str, worker_id: &str) -> Result<Option<QueuedJob>>;

    async fn complete(&self, job_id: i64) -> Result<()>;

    /// Returns a claimed job to the queue for redelivery.
    async fn release(&self, job_id: i64, error: &str) -> Result<()>;

    /// Parks a job permanently.
    async fn fail(&self, job_id: i64, error: &str) -> Result<()>;

    /// Makes jobs claimed longer than `older_than` ago ready again, so items
    /// held by a crashed worker are redelivered.
    async fn requeue_stale(&self, queue: &str, older_than: Duration) -> Result<u64>;
}

fn as_object(payload: &Value) -> Result<&Map<String, Value>> {
    payload
        .as_object()
        .ok_or_else(|| ReconcileError::InvalidInput("queue item is not a JSON object".to_string()))
}

fn source_of(obj: &Map<String, Value>) -> Result<Source> {
    match obj.get("source").and_then(Value::as_str) {
        Some(s) => Source::parse(s),
        None => Err(ReconcileError::MissingField {
            field: "source",
            source_name: "unknown".to_string(),
        }),
    }
}

/// Scalar text value. Numbers are accepted for id-like columns.
fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    let value = match obj.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

fn optional_text(obj: &Map<String, Value>, key: Option<&str>) -> Option<String> {
    key.and_then(|k| text(obj, k))
}

/// A list given either as a JSON array or as one `|`-separated string.
fn list(obj: &Map<String, Value>, key: Option<&str>) -> Vec<String> {
    let Some(value) = key.and_then(|k| obj.get(k)) else {
        return Vec::new();
    };
    let items: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => s.split(MULTI_VALUE_SEPARATOR).map(str::to_string).collect(),
        Value::Number(n) => vec![n.to_string()],
        _ => Vec::new(),
    };
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Turns an automatic-resolution queue item into an [`ExternalRecord`] using
/// the source's payload keys. Unknown sources and missing ids are fatal.
pub fn parse_resolution_item(payload: &Value) -> Result<ExternalRecord> {
    let obj = as_object(payload)?;
    let source = source_of(obj)?;
    let schema = source.schema();

    let external_id = text(obj, schema.id_key).ok_or_else(|| ReconcileError::MissingField {
        field: schema.id_key,
        source_name: source.to_string(),
    })?;

    Ok(ExternalRecord {
        source,
        external_id,
        display_name: text(obj, schema.display_name_key),
        long_name: optional_text(obj, schema.long_name_key),
        short_name: optional_text(obj, schema.short_name_key),
        abbreviation: optional_text(obj, schema.abbreviation_key),
        aliases: list(obj, schema.alias_key),
        reference_ids: list(obj, schema.reference_id_key),
        raw: payload.clone(),
    })
}

/// Parses a manual-correction queue item. The source is checked before the
/// rest of the payload so an unknown source reports as a configuration error.
pub fn parse_correction_item(payload: &Value) -> Result<CorrectionInstruction> {
    let obj = as_object(payload)?;
    source_of(obj)?;
    let instruction: CorrectionInstruction = serde_json::from_value(payload.clone())?;
    instruction.validate()?;
    Ok(instruction)
}
