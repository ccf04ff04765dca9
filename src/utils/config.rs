//! Runtime configuration for the reconciliation workers

use log::info;
use std::env;
use std::time::Duration;
use uuid::Uuid;

use crate::utils::db_connect::DbSettings;

pub const DEFAULT_VOCABULARY: &str = "organizations";
pub const DEFAULT_RESOLUTION_QUEUE: &str = "org_reconcile";
pub const DEFAULT_CORRECTION_QUEUE: &str = "org_reconcile_manual";

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Registry vocabulary holding canonical organizations
    pub vocabulary: String,
    /// Lifetime of the cached fuzzy candidate snapshot
    pub snapshot_ttl: Duration,
    /// Idle sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Retryable failures after which a job is parked
    pub max_attempts: i32,
    /// Claimed jobs older than this are assumed orphaned
    pub stale_claim_after: Duration,
    pub resolution_queue: String,
    pub correction_queue: String,
    pub worker_id: String,
    pub database: DbSettings,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            vocabulary: DEFAULT_VOCABULARY.to_string(),
            snapshot_ttl: Duration::from_secs(300),
            poll_interval: Duration::from_millis(1000),
            max_attempts: 5,
            stale_claim_after: Duration::from_secs(900),
            resolution_queue: DEFAULT_RESOLUTION_QUEUE.to_string(),
            correction_queue: DEFAULT_CORRECTION_QUEUE.to_string(),
            worker_id: Uuid::new_v4().to_string(),
            database: DbSettings::default(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ReconcileConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            vocabulary: non_empty_var("RECONCILE_VOCABULARY").unwrap_or(defaults.vocabulary),
            snapshot_ttl: env::var("FUZZY_SNAPSHOT_TTL_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.snapshot_ttl),
            poll_interval: env::var("QUEUE_POLL_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            max_attempts: env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse::<i32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            stale_claim_after: env::var("QUEUE_STALE_CLAIM_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_claim_after),
            resolution_queue: non_empty_var("RESOLUTION_QUEUE").unwrap_or(defaults.resolution_queue),
            correction_queue: non_empty_var("CORRECTION_QUEUE").unwrap_or(defaults.correction_queue),
            worker_id: non_empty_var("WORKER_ID").unwrap_or(defaults.worker_id),
            database: DbSettings::from_env(),
        }
    }

    pub fn log_config(&self) {
        info!("⚙️  Reconciliation configuration:");
        info!("   • vocabulary: {}", self.vocabulary);
        info!("   • fuzzy snapshot TTL: {:?}", self.snapshot_ttl);
        info!("   • poll interval: {:?}", self.poll_interval);
        info!("   • max attempts per job: {}", self.max_attempts);
        info!("   • stale claim after: {:?}", self.stale_claim_after);
        info!(
            "   • queues: {} (resolution), {} (correction)",
            self.resolution_queue, self.correction_queue
        );
        info!("   • worker id: {}", self.worker_id);
        info!(
            "   • database: {}@{}:{}/{}",
            self.database.user, self.database.host, self.database.port, self.database.dbname
        );
        info!(
            "   • pool: max {}, min idle {}, connect timeout {:?}",
            self.database.pool_max_size, self.database.pool_min_idle, self.database.connect_timeout
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    const KEYS: [&str; 12] = [
        "RECONCILE_VOCABULARY",
        "FUZZY_SNAPSHOT_TTL_SECS",
        "QUEUE_POLL_INTERVAL_MS",
        "QUEUE_MAX_ATTEMPTS",
        "QUEUE_STALE_CLAIM_SECS",
        "RESOLUTION_QUEUE",
        "CORRECTION_QUEUE",
        "WORKER_ID",
        "POSTGRES_PORT",
        "DB_POOL_MAX_SIZE",
        "DB_POOL_MIN_IDLE",
        "DB_CONNECT_TIMEOUT_SECS",
    ];

    // Both cases live in one test so parallel test threads never see each
    // other's environment.
    #[test]
    fn test_config_from_env() {
        for key in KEYS {
            env::remove_var(key);
        }
        let config = ReconcileConfig::from_env();
        assert_eq!(config.vocabulary, "organizations");
        assert_eq!(config.snapshot_ttl, Duration::from_secs(300));
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.resolution_queue, "org_reconcile");
        assert_eq!(config.correction_queue, "org_reconcile_manual");
        assert!(Uuid::parse_str(&config.worker_id).is_ok());
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.pool_max_size, 16);
        assert_eq!(config.database.pool_min_idle, 1);
        assert_eq!(config.database.connect_timeout, Duration::from_secs(10));

        env::set_var("RECONCILE_VOCABULARY", "partners");
        env::set_var("FUZZY_SNAPSHOT_TTL_SECS", "60");
        env::set_var("QUEUE_POLL_INTERVAL_MS", "250");
        env::set_var("QUEUE_MAX_ATTEMPTS", "0");
        env::set_var("WORKER_ID", "worker-7");
        env::set_var("POSTGRES_PORT", "6432");
        env::set_var("DB_POOL_MAX_SIZE", "4");
        env::set_var("DB_POOL_MIN_IDLE", "9");
        env::set_var("DB_CONNECT_TIMEOUT_SECS", "0");

        let config = ReconcileConfig::from_env();
        assert_eq!(config.vocabulary, "partners");
        assert_eq!(config.snapshot_ttl, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.worker_id, "worker-7");
        assert_eq!(config.database.port, 6432);
        assert_eq!(config.database.pool_max_size, 4);
        // Idle floor is clamped to the pool size; a zero timeout falls back.
        assert_eq!(config.database.pool_min_idle, 4);
        assert_eq!(config.database.connect_timeout, Duration::from_secs(10));

        // Cleanup
        for key in KEYS {
            env::remove_var(key);
        }
    }
}
