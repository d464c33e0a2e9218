//! Device-local settings kept in a small SQLite key/value table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info, warn};
use wtd_core::{CoreError, DistanceBand, DistancePreference, SettingsError};

pub const DISTANCE_BAND_KEY: &str = "distance_band";

const CREATE_SETTINGS_TABLE: &str = "CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

#[derive(Debug)]
pub struct SettingsStore {
    connection_string: String,
    pool: Option<SqlitePool>,
}

impl SettingsStore {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            pool: None,
        }
    }

    /// Connects and migrates in one step.
    pub async fn open(connection_string: impl Into<String>) -> Result<Self, CoreError> {
        let mut store = Self::new(connection_string);
        store.connect().await?;
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn connect(&mut self) -> Result<(), CoreError> {
        let options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| SettingsError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| SettingsError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Opened settings store at {}", self.connection_string);
        self.pool = Some(pool);
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::query(CREATE_SETTINGS_TABLE)
            .execute(self.pool()?)
            .await
            .map_err(|e| SettingsError::MigrationFailed {
                migration: format!("create settings table: {}", e),
            })?;
        Ok(())
    }

    pub async fn close(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }

    fn pool(&self) -> Result<&SqlitePool, SettingsError> {
        self.pool.as_ref().ok_or(SettingsError::NotConnected)
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool()?)
            .await
            .map_err(SettingsError::from)?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    pub async fn save_setting(&self, key: &str, value: &str) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(self.pool()?)
        .await
        .map_err(SettingsError::from)?;

        debug!("Saved setting {} = {}", key, value);
        Ok(())
    }

    /// Near when nothing usable has been stored yet.
    pub async fn distance_band(&self) -> Result<DistanceBand, CoreError> {
        let Some(raw) = self.get_setting(DISTANCE_BAND_KEY).await? else {
            return Ok(DistanceBand::default());
        };

        Ok(DistanceBand::from_str(&raw).unwrap_or_else(|_| {
            warn!("Ignoring stored distance band {:?}", raw);
            DistanceBand::default()
        }))
    }

    pub async fn set_distance_band(&self, band: DistanceBand) -> Result<(), CoreError> {
        self.save_setting(DISTANCE_BAND_KEY, band.as_str()).await
    }
}

#[async_trait]
impl DistancePreference for SettingsStore {
    async fn load(&self) -> Result<DistanceBand, CoreError> {
        self.distance_band().await
    }

    async fn store(&self, band: DistanceBand) -> Result<(), CoreError> {
        self.set_distance_band(band).await
    }
}
