//! Database connection management using sqlx

use crate::config::DatabaseConfig;
use crate::error::{PipelineError, Result};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Executor;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Lazily connected Postgres handle.
///
/// The pool is created on first use and re-created when the held one has been
/// closed. Statements run outside explicit transactions, so every statement
/// auto-commits.
pub struct Database {
    options: PgConnectOptions,
    max_connections: u32,
    acquire_timeout: Duration,
    read_only: bool,
    pool: Mutex<Option<PgPool>>,
}

impl Database {
    pub fn new(options: PgConnectOptions) -> Self {
        Self {
            options,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            read_only: true,
            pool: Mutex::new(None),
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let options = match &config.url {
            Some(url) => PgConnectOptions::from_str(url)
                .map_err(|e| PipelineError::Config(format!("Invalid DATABASE_URL: {}", e)))?,
            None => PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .password(&config.password)
                .database(&config.database),
        };

        Ok(Self {
            options,
            max_connections: config.max_connections,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            read_only: config.read_only,
            pool: Mutex::new(None),
        })
    }

    /// Get the pool, connecting (or reconnecting) when needed.
    pub async fn pool(&self) -> Result<PgPool> {
        let mut guard = self.pool.lock().await;

        if let Some(pool) = guard.as_ref() {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
            warn!("Database pool was closed, reconnecting");
        }

        let pool = self.connect().await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn connect(&self) -> Result<PgPool> {
        let read_only = self.read_only;
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if read_only {
                        conn.execute("SET default_transaction_read_only = on").await?;
                    }
                    Ok(())
                })
            })
            .connect_with(self.options.clone())
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to connect to database: {}", e)))?;

        // Test the connection
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| PipelineError::Connection(format!("Database not reachable: {}", e)))?;

        info!("Database connection established");
        Ok(pool)
    }

    /// Close the held pool, if any. The next `pool()` call reconnects.
    pub async fn close(&self) {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.take() {
            pool.close().await;
            info!("Database connection closed");
        }
    }

    /// Whether a live pool is currently held.
    pub async fn is_connected(&self) -> bool {
        self.pool
            .lock()
            .await
            .as_ref()
            .map(|pool| !pool.is_closed())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_from_config_rejects_bad_url() {
        let mut config = AppConfig::from_lookup(|_| None).unwrap().database;
        config.url = Some("this is not a url".to_string());
        assert!(matches!(
            Database::from_config(&config),
            Err(PipelineError::Config(_))
        ));
    }

    fn unreachable() -> Database {
        let mut db = Database::new(
            PgConnectOptions::new()
                .host("127.0.0.1")
                .port(1)
                .username("postgres")
                .database("bike_share"),
        );
        db.acquire_timeout = Duration::from_secs(1);
        db
    }

    #[tokio::test]
    async fn test_open_pool_is_reused() {
        let db = unreachable();
        let lazy = PgPoolOptions::new().connect_lazy_with(db.options.clone());
        *db.pool.lock().await = Some(lazy);

        assert!(db.is_connected().await);
        assert!(db.pool().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_pool_triggers_reconnect() {
        let db = unreachable();
        let lazy = PgPoolOptions::new().connect_lazy_with(db.options.clone());
        lazy.close().await;
        *db.pool.lock().await = Some(lazy);
        assert!(!db.is_connected().await);

        // The closed pool is not handed out; a fresh connect is attempted
        let err = db.pool().await.unwrap_err();
        assert!(matches!(err, PipelineError::Connection(_)), "{}", err);
        assert!(!db.is_connected().await);
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let config = AppConfig::from_lookup(|_| None).unwrap().database;
        let db = Database::from_config(&config).unwrap();
        assert!(!db.is_connected().await);
        db.close().await;
        assert!(!db.is_connected().await);
    }
}
