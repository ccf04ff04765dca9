// src/utils/db_connect.rs
use anyhow::{Context, Result};
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use log::info;
use std::fmt;
use std::time::Duration;
use tokio_postgres::{Config, NoTls};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// DDL for the decision table, the job queues and the registry table.
pub const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

/// Connection and pool settings, read from `POSTGRES_*` and `DB_POOL_*`.
#[derive(Clone)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub pool_max_size: u32,
    pub pool_min_idle: u32,
    pub connect_timeout: Duration,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            dbname: "dataplatform".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            pool_max_size: 16,
            pool_min_idle: 1,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// Keeps the password out of `{:?}` output.
impl fmt::Debug for DbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("pool_max_size", &self.pool_max_size)
            .field("pool_min_idle", &self.pool_min_idle)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

fn parsed_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl DbSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let pool_max_size = parsed_var::<u32>("DB_POOL_MAX_SIZE")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.pool_max_size);
        Self {
            host: std::env::var("POSTGRES_HOST").unwrap_or(defaults.host),
            port: parsed_var("POSTGRES_PORT").unwrap_or(defaults.port),
            dbname: std::env::var("POSTGRES_DB").unwrap_or(defaults.dbname),
            user: std::env::var("POSTGRES_USER").unwrap_or(defaults.user),
            password: std::env::var("POSTGRES_PASSWORD").unwrap_or(defaults.password),
            pool_max_size,
            pool_min_idle: parsed_var::<u32>("DB_POOL_MIN_IDLE")
                .unwrap_or(defaults.pool_min_idle)
                .min(pool_max_size),
            connect_timeout: parsed_var::<u64>("DB_CONNECT_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
        }
    }

    fn pg_config(&self) -> Config {
        let mut config = Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(&self.password)
            .application_name("org_reconcile")
            .connect_timeout(self.connect_timeout);
        config
    }
}

/// Builds the pool and checks it with one round trip.
pub async fn connect(settings: &DbSettings) -> Result<PgPool> {
    info!(
        "Connecting to PostgreSQL {}@{}:{}/{} (pool max {})...",
        settings.user, settings.host, settings.port, settings.dbname, settings.pool_max_size
    );
    let manager = PostgresConnectionManager::new(settings.pg_config(), NoTls);

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .min_idle(Some(settings.pool_min_idle))
        .idle_timeout(Some(Duration::from_secs(180)))
        .connection_timeout(settings.connect_timeout + Duration::from_secs(5))
        .build(manager)
        .await
        .context("Failed to build database connection pool")?;

    let conn = pool
        .get()
        .await
        .context("Failed to get test connection from pool")?;
    conn.query_one("SELECT 1", &[])
        .await
        .context("Test query 'SELECT 1' failed")?;
    drop(conn);
    info!("Database connection pool initialized successfully.");
    Ok(pool)
}

/// Creates the reconciliation schema objects if they are missing.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for ensure_schema")?;
    conn.batch_execute(SCHEMA_SQL)
        .await
        .context("Failed to apply reconciliation schema")?;
    info!("Reconciliation schema is in place");
    Ok(())
}

/// Returns (connections, idle_connections, in_use).
pub fn get_pool_status(pool: &PgPool) -> (u32, u32, u32) {
    let state = pool.state();
    (
        state.connections,
        state.idle_connections,
        state.connections - state.idle_connections,
    )
}
