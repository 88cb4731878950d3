use arc_swap::ArcSwap;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::AppConfig;
use crate::error::{AppError, Result};

const CONFIG_KEY: &str = "app_config";

/// Configuration store backed by SQLite
///
/// The whole `AppConfig` is kept as one JSON row, seeded with defaults on
/// first open. Reads go through an `ArcSwap` cache and never touch the
/// database.
#[derive(Clone)]
pub struct ConfigStore {
    pool: Pool<Sqlite>,
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Open (or create) the configuration database
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        Self::init_schema(&pool).await?;

        let config = Self::load_config(&pool).await?;
        let cache = Arc::new(ArcSwap::from_pointee(config));

        Ok(Self { pool, cache })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_config(pool: &Pool<Sqlite>) -> Result<AppConfig> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(CONFIG_KEY)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((json,)) => {
                serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string()))
            }
            None => {
                let config = AppConfig::default();
                Self::save_config_to_db(pool, &config).await?;
                Ok(config)
            }
        }
    }

    async fn save_config_to_db(pool: &Pool<Sqlite>, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;

        sqlx::query(
            r#"
            INSERT INTO config (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(CONFIG_KEY)
        .bind(&json)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Apply overrides to the cached copy only, leaving the database untouched
    ///
    /// Used for command line flags that should last for one run.
    pub fn override_runtime<F>(&self, f: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);
        self.cache.store(Arc::new(config));
    }
}
