// src/utils/logging.rs - Logging helpers shared by the resolution and correction workers
use log::{debug, error, info, warn};
use std::time::Instant;

use crate::error::ReconcileError;
use crate::models::core::{DecisionRecord, Source};
use crate::store::UpsertAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Resolver,
    Correction,
    Replay,
}

#[derive(Clone)]
pub struct ReconcileLogger {
    component_name: &'static str,
    component_emoji: &'static str,
    start_time: Instant,
}

impl ReconcileLogger {
    pub fn new(component: Component) -> Self {
        let (component_name, component_emoji) = match component {
            Component::Resolver => ("RESOLVE", "🧭"),
            Component::Correction => ("CORRECT", "✍️"),
            Component::Replay => ("REPLAY", "🔁"),
        };
        Self {
            component_name,
            component_emoji,
            start_time: Instant::now(),
        }
    }

    pub fn log_item_start(&self, source: Source, external_id: &str) {
        debug!(
            "[{}] {} ▶️  ({}, {}) [+{:.1}s]",
            self.component_name,
            self.component_emoji,
            source,
            external_id,
            self.start_time.elapsed().as_secs_f32()
        );
    }

    pub fn log_terminal_skip(&self, record: &DecisionRecord) {
        info!(
            "[{}] {} ⏭️  ({}, {}) already {} → no reprocessing",
            self.component_name, self.component_emoji, record.source, record.external_id, record.status
        );
    }

    pub fn log_outcome(&self, record: &DecisionRecord, action: UpsertAction) {
        match action {
            UpsertAction::Inserted | UpsertAction::Updated => info!(
                "[{}] {} ✅ ({}, {}) → {} (matched {:?}) {:?}{}",
                self.component_name,
                self.component_emoji,
                record.source,
                record.external_id,
                record.status,
                record.matched_id,
                action,
                if record.message.is_empty() {
                    String::new()
                } else {
                    format!(": {}", record.message)
                }
            ),
            UpsertAction::Unchanged => info!(
                "[{}] {} 💤 ({}, {}) unchanged at {}",
                self.component_name, self.component_emoji, record.source, record.external_id, record.status
            ),
            UpsertAction::RejectedTerminal => warn!(
                "[{}] {} 🛡️  ({}, {}) kept terminal {} (concurrent update reached it first)",
                self.component_name, self.component_emoji, record.source, record.external_id, record.status
            ),
        }
    }

    pub fn log_noop(&self, source: Source, external_id: &str, reason: &str) {
        info!(
            "[{}] {} 💤 ({}, {}) no-op: {}",
            self.component_name, self.component_emoji, source, external_id, reason
        );
    }

    pub fn log_absorbed(&self, source: Source, external_id: &str, detail: &str) {
        warn!(
            "[{}] {} ⚠️  ({}, {}) {}",
            self.component_name, self.component_emoji, source, external_id, detail
        );
    }

    pub fn log_failure(&self, item: &str, err: &ReconcileError) {
        error!(
            "[{}] {} ❌ {} failed ({} error, {}): {}",
            self.component_name,
            self.component_emoji,
            item,
            err.kind(),
            if err.is_retryable() { "retryable" } else { "permanent" },
            err
        );
    }

    pub fn log_summary(&self, processed: usize, failed: usize, noops: usize) {
        info!(
            "[{}] {} 📊 processed {} items ({} no-op, {} failed) in {:.2?}",
            self.component_name,
            self.component_emoji,
            processed,
            noops,
            failed,
            self.start_time.elapsed()
        );
    }
}
