//! Database connection management

use crate::{Error, Result, WeightLogStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Environment variable overriding the default database location
pub const DB_PATH_ENV: &str = "WEIGHIN_DB";

/// Database handle
///
/// Owns the SQLite connection pool that persists imported
/// observations.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path
    ///
    /// # Example
    ///
    /// ```no_run
    /// use weighin_core::Database;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let db = Database::open("~/.weighin/weighin.db").await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = Self::expand_path(path)?;
        info!("Opening database at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Open a private in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Open database at the default location
    pub async fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        Self::open(path).await
    }

    /// `$WEIGHIN_DB`, or `~/.weighin/weighin.db`
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(DB_PATH_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        let home = std::env::var("HOME")
            .map_err(|_| Error::Other("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home).join(".weighin").join("weighin.db"))
    }

    async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;

        debug!("Migrations completed successfully");
        Ok(())
    }

    /// Weight log persistence
    pub fn store(&self) -> WeightLogStore {
        WeightLogStore::new(self.pool.clone())
    }

    /// Get the underlying pool (for advanced usage)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Expand tilde in path
    fn expand_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Other(format!("Invalid path: {}", path.display())))?;

        if let Some(stripped) = path_str.strip_prefix("~/") {
            let home = std::env::var("HOME")
                .map_err(|_| Error::Other("HOME environment variable not set".to_string()))?;
            Ok(PathBuf::from(home).join(stripped))
        } else {
            Ok(path.to_path_buf())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let db = Database::open(&db_path).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_migrations_run() {
        let db = Database::open_in_memory().await.unwrap();

        for table in ["imports", "weight_logs"] {
            let result: (i64,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
            )
            .bind(table)
            .fetch_one(db.pool())
            .await
            .unwrap();

            assert_eq!(result.0, 1, "{} table should exist", table);
        }

        db.close().await;
    }

    #[test]
    fn test_expand_path() {
        let expanded = Database::expand_path("~/test/path").unwrap();
        assert!(!expanded.to_str().unwrap().starts_with("~"));

        let normal = Database::expand_path("/absolute/path").unwrap();
        assert_eq!(normal.to_str().unwrap(), "/absolute/path");
    }
}
