//! Persistence of imported weight observations

use crate::normalize::to_iso_string;
use crate::{Error, Result, WeightObservation, WeightUnit};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Provenance recorded alongside an import batch
#[derive(Debug, Clone, Default)]
pub struct ImportRecord {
    /// Handler ID, or `ai-fallback`
    pub source: String,
    /// SHA-256 of the imported file, if known
    pub file_hash: Option<String>,
}

/// An observation as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObservation {
    pub id: i64,
    pub import_id: String,
    pub profile_id: String,
    #[serde(flatten)]
    pub observation: WeightObservation,
}

/// List options
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Limit results
    pub limit: Option<usize>,
    /// Only observations recorded at or after this ISO timestamp
    pub since: Option<String>,
}

impl ListOptions {
    /// Create a new ListOptions
    pub fn new() -> Self {
        Self::default()
    }

    /// Set limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set lower bound on `recorded_at`
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(to_iso_string(since));
        self
    }
}

/// Weight log persistence interface
#[async_trait]
pub trait WeightLogOperations {
    /// Store a whole import in one transaction and return its import ID
    async fn insert_batch(
        &self,
        profile_id: &str,
        observations: &[WeightObservation],
        record: ImportRecord,
    ) -> Result<String>;

    /// Observations for a profile, newest first
    async fn list(&self, profile_id: &str, options: ListOptions) -> Result<Vec<StoredObservation>>;

    /// Number of observations stored for a profile
    async fn count(&self, profile_id: &str) -> Result<i64>;

    /// Import ID of an earlier import of the same file for this profile
    async fn find_import_by_hash(&self, profile_id: &str, file_hash: &str) -> Result<Option<String>>;

    /// Remove an import batch and its observations, returning how many
    /// observations were removed
    async fn delete_import(&self, import_id: &str) -> Result<u64>;
}

/// SQLite-backed weight log store
#[derive(Clone)]
pub struct WeightLogStore {
    pool: SqlitePool,
}

impl WeightLogStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

type ObservationRow = (i64, String, String, f64, String, String);

#[async_trait]
impl WeightLogOperations for WeightLogStore {
    async fn insert_batch(
        &self,
        profile_id: &str,
        observations: &[WeightObservation],
        record: ImportRecord,
    ) -> Result<String> {
        let import_id = Uuid::new_v4().to_string();
        let imported_at = Utc::now().timestamp();

        info!(
            "Storing import {} for profile {}: {} observations from {}",
            import_id,
            profile_id,
            observations.len(),
            record.source
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO imports (id, profile_id, source, file_hash, observation_count, imported_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&import_id)
        .bind(profile_id)
        .bind(&record.source)
        .bind(&record.file_hash)
        .bind(observations.len() as i64)
        .bind(imported_at)
        .execute(&mut *tx)
        .await?;

        for observation in observations {
            sqlx::query(
                r#"
                INSERT INTO weight_logs (import_id, profile_id, weight_value, unit, recorded_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&import_id)
            .bind(profile_id)
            .bind(observation.weight_value)
            .bind(observation.unit.as_str())
            .bind(&observation.recorded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("Committed import: {}", import_id);
        Ok(import_id)
    }

    async fn list(&self, profile_id: &str, options: ListOptions) -> Result<Vec<StoredObservation>> {
        debug!("Listing observations for profile: {}", profile_id);

        let mut sql = String::from(
            r#"
            SELECT id, import_id, profile_id, weight_value, unit, recorded_at
            FROM weight_logs
            WHERE profile_id = ?
            "#,
        );
        if options.since.is_some() {
            sql.push_str(" AND recorded_at >= ?");
        }
        sql.push_str(" ORDER BY recorded_at DESC, id DESC");
        if let Some(limit) = options.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query_as::<_, ObservationRow>(&sql).bind(profile_id);
        if let Some(since) = &options.since {
            query = query.bind(since);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut observations = Vec::with_capacity(rows.len());
        for (id, import_id, profile_id, weight_value, unit, recorded_at) in rows {
            observations.push(StoredObservation {
                id,
                import_id,
                profile_id,
                observation: WeightObservation {
                    weight_value,
                    unit: WeightUnit::from_str(&unit)?,
                    recorded_at,
                },
            });
        }

        Ok(observations)
    }

    async fn count(&self, profile_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM weight_logs WHERE profile_id = ?")
            .bind(profile_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    async fn find_import_by_hash(&self, profile_id: &str, file_hash: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT id
            FROM imports
            WHERE profile_id = ? AND file_hash = ?
            ORDER BY imported_at DESC
            LIMIT 1
            "#,
        )
        .bind(profile_id)
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }

    async fn delete_import(&self, import_id: &str) -> Result<u64> {
        info!("Deleting import: {}", import_id);

        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM weight_logs WHERE import_id = ?")
            .bind(import_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let result = sqlx::query("DELETE FROM imports WHERE id = ?")
            .bind(import_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(import_id.to_string()));
        }

        tx.commit().await?;

        debug!("Deleted import {} ({} observations)", import_id, removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::TimeZone;

    fn obs(value: f64, unit: WeightUnit, recorded_at: &str) -> WeightObservation {
        WeightObservation::new(value, unit, recorded_at).unwrap()
    }

    fn record(hash: &str) -> ImportRecord {
        ImportRecord {
            source: "fitbit-weight-csv".to_string(),
            file_hash: Some(hash.to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.store();

        let batch = vec![
            obs(180.4, WeightUnit::Lb, "2024-01-01T09:00:00.000Z"),
            obs(81.5, WeightUnit::Kg, "2024-01-04T09:00:00.000Z"),
        ];
        let import_id = store.insert_batch("alice", &batch, record("abc")).await.unwrap();

        let listed = store.list("alice", ListOptions::new()).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].observation, batch[1]);
        assert_eq!(listed[1].observation, batch[0]);
        assert!(listed.iter().all(|o| o.import_id == import_id));

        assert_eq!(store.count("alice").await.unwrap(), 2);
        assert_eq!(store.count("bob").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_options() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.store();

        let batch: Vec<WeightObservation> = (1..=5)
            .map(|day| obs(180.0 + day as f64, WeightUnit::Lb, &format!("2024-01-0{}T09:00:00.000Z", day)))
            .collect();
        store.insert_batch("alice", &batch, record("abc")).await.unwrap();

        let limited = store.list("alice", ListOptions::new().limit(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].observation.weight_value, 185.0);

        let since = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let recent = store.list("alice", ListOptions::new().since(since)).await.unwrap();
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn test_find_import_by_hash() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.store();

        let batch = vec![obs(180.0, WeightUnit::Lb, "2024-01-01T09:00:00.000Z")];
        let import_id = store.insert_batch("alice", &batch, record("abc")).await.unwrap();

        assert_eq!(
            store.find_import_by_hash("alice", "abc").await.unwrap(),
            Some(import_id)
        );
        assert_eq!(store.find_import_by_hash("bob", "abc").await.unwrap(), None);
        assert_eq!(store.find_import_by_hash("alice", "def").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_import() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.store();

        let first = store
            .insert_batch(
                "alice",
                &[obs(180.0, WeightUnit::Lb, "2024-01-01T09:00:00.000Z")],
                record("a"),
            )
            .await
            .unwrap();
        store
            .insert_batch(
                "alice",
                &[obs(181.0, WeightUnit::Lb, "2024-01-02T09:00:00.000Z")],
                record("b"),
            )
            .await
            .unwrap();

        assert_eq!(store.delete_import(&first).await.unwrap(), 1);
        assert_eq!(store.count("alice").await.unwrap(), 1);

        let result = store.delete_import(&first).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_empty_batch_records_import() {
        let db = Database::open_in_memory().await.unwrap();
        let store = db.store();

        let import_id = store.insert_batch("alice", &[], record("empty")).await.unwrap();
        assert_eq!(
            store.find_import_by_hash("alice", "empty").await.unwrap(),
            Some(import_id)
        );
        assert_eq!(store.count("alice").await.unwrap(), 0);
    }
}
