//! SQLite implementation of ILocalStore
//!
//! ## Type Mapping
//!
//! | Domain Type       | SQL Type | Strategy                                |
//! |-------------------|----------|-----------------------------------------|
//! | EntityId, ids     | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | EntityPayload     | TEXT     | serde_json serialization                |
//! | SyncOperation     | TEXT     | serde_json serialization                |
//! | DeadLetterEntry   | TEXT     | serde_json serialization                |
//! | ConflictRecord    | TEXT     | serde_json serialization                |
//! | DateTime<Utc>     | TEXT     | ISO 8601 via `to_rfc3339()`             |
//! | Priority          | INTEGER  | discriminant, for ORDER BY only         |
//!
//! Entity table names come from `EntityType::table()`, a closed set, so
//! interpolating them into SQL is safe.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use cardbox_core::domain::{
    ConflictId, ConflictRecord, ConflictStatus, DeadLetterEntry, EntityId, EntityPayload,
    EntityType, OperationId, SyncOperation,
};
use cardbox_core::ports::{ILocalStore, RecordFilter};

use crate::StoreError;

const SCHEMA: &str = include_str!("migrations/20260501_initial.sql");

/// SQLite-based implementation of the local store port
pub struct SqliteLocalStore {
    pool: SqlitePool,
}

impl SqliteLocalStore {
    /// Wraps an externally managed connection pool. The schema must
    /// already exist; [`connect`](Self::connect) handles it otherwise.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the database file, creating it and its parent directory when
    /// missing, and prepares the schema. WAL journaling keeps readers
    /// unblocked during sync writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConnectionFailed`] when the file cannot be
    /// opened, or [`StoreError::MigrationFailed`] when the schema cannot
    /// be applied.
    pub async fn connect(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::ConnectionFailed(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let store = Self::open(SqlitePoolOptions::new().max_connections(5), options).await?;
        tracing::info!(path = %db_path.display(), "local store opened");
        Ok(store)
    }

    /// A throwaway in-memory database for tests and ephemeral sessions.
    /// Single connection: SQLite keeps in-memory data per connection.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(
            SqlitePoolOptions::new().max_connections(1),
            SqliteConnectOptions::new().in_memory(true),
        )
        .await
    }

    /// The underlying pool, for hosts that share it with other components
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn open(
        pool_options: SqlitePoolOptions,
        options: SqliteConnectOptions,
    ) -> Result<Self, StoreError> {
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::MigrationFailed(e.to_string()))?;
        tracing::debug!("local store schema ready");
        Ok(Self { pool })
    }

    async fn upsert_entity<'e, E>(executor: E, payload: &EntityPayload) -> anyhow::Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let table = payload.entity_type().table();
        let meta = payload.meta();
        let json = serde_json::to_string(payload)?;
        let sql = format!(
            "INSERT INTO {table} (id, payload, sync_version, pending_sync, updated_at, is_deleted) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             payload = excluded.payload, \
             sync_version = excluded.sync_version, \
             pending_sync = excluded.pending_sync, \
             updated_at = excluded.updated_at, \
             is_deleted = excluded.is_deleted"
        );
        sqlx::query(&sql)
            .bind(payload.id().to_string())
            .bind(json)
            .bind(meta.sync_version as i64)
            .bind(meta.pending_sync)
            .bind(meta.updated_at.to_rfc3339())
            .bind(meta.is_deleted)
            .execute(executor)
            .await?;
        Ok(())
    }
}

fn payload_from_json(json: &str) -> anyhow::Result<EntityPayload> {
    Ok(serde_json::from_str(json)?)
}

fn status_to_str(status: ConflictStatus) -> &'static str {
    match status {
        ConflictStatus::Pending => "pending",
        ConflictStatus::Resolved => "resolved",
    }
}

#[async_trait::async_trait]
impl ILocalStore for SqliteLocalStore {
    async fn put(&self, payload: &EntityPayload) -> anyhow::Result<()> {
        Self::upsert_entity(&self.pool, payload).await
    }

    async fn bulk_put(&self, payloads: &[EntityPayload]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for payload in payloads {
            Self::upsert_entity(&mut *tx, payload).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(
        &self,
        entity_type: EntityType,
        id: &EntityId,
    ) -> anyhow::Result<Option<EntityPayload>> {
        let sql = format!("SELECT payload FROM {} WHERE id = ?", entity_type.table());
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| payload_from_json(r.get::<String, _>("payload").as_str()))
            .transpose()
    }

    async fn query(
        &self,
        entity_type: EntityType,
        filter: &RecordFilter,
    ) -> anyhow::Result<Vec<EntityPayload>> {
        let mut sql = format!("SELECT payload FROM {} WHERE 1 = 1", entity_type.table());
        if filter.pending_sync.is_some() {
            sql.push_str(" AND pending_sync = ?");
        }
        if filter.updated_since.is_some() {
            sql.push_str(" AND updated_at > ?");
        }
        if !filter.include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }
        sql.push_str(" ORDER BY updated_at ASC");

        let mut query = sqlx::query(&sql);
        if let Some(pending) = filter.pending_sync {
            query = query.bind(pending);
        }
        if let Some(since) = filter.updated_since {
            query = query.bind(since.to_rfc3339());
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|r| payload_from_json(r.get::<String, _>("payload").as_str()))
            .collect()
    }

    async fn delete(&self, entity_type: EntityType, id: &EntityId) -> anyhow::Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = ?", entity_type.table());
        sqlx::query(&sql)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self, entity_type: EntityType) -> anyhow::Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE is_deleted = 0",
            entity_type.table()
        );
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn save_queued_op(&self, op: &SyncOperation) -> anyhow::Result<()> {
        let json = serde_json::to_string(op)?;
        sqlx::query(
            "INSERT INTO queue_ops (id, entity_id, entity_type, priority, sequence, retry_count, operation) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             retry_count = excluded.retry_count, \
             operation = excluded.operation",
        )
        .bind(op.id.to_string())
        .bind(op.entity_id().to_string())
        .bind(op.entity_type().to_string())
        .bind(op.priority as i64)
        .bind(op.sequence as i64)
        .bind(op.retry_count as i64)
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_queued_op(&self, id: &OperationId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM queue_ops WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_queue(&self) -> anyhow::Result<Vec<SyncOperation>> {
        let rows =
            sqlx::query("SELECT operation FROM queue_ops ORDER BY priority DESC, sequence ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|r| Ok(serde_json::from_str(r.get::<String, _>("operation").as_str())?))
            .collect()
    }

    async fn save_dead_letter(&self, entry: &DeadLetterEntry) -> anyhow::Result<()> {
        let json = serde_json::to_string(entry)?;
        sqlx::query(
            "INSERT INTO dead_letters (operation_id, entry, dead_lettered_at) \
             VALUES (?, ?, ?) \
             ON CONFLICT(operation_id) DO UPDATE SET \
             entry = excluded.entry, \
             dead_lettered_at = excluded.dead_lettered_at",
        )
        .bind(entry.operation.id.to_string())
        .bind(json)
        .bind(entry.dead_lettered_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_dead_letters(&self) -> anyhow::Result<Vec<DeadLetterEntry>> {
        let rows = sqlx::query("SELECT entry FROM dead_letters ORDER BY dead_lettered_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| Ok(serde_json::from_str(r.get::<String, _>("entry").as_str())?))
            .collect()
    }

    async fn remove_dead_letter(&self, id: &OperationId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM dead_letters WHERE operation_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_conflict(&self, record: &ConflictRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            "INSERT INTO conflict_log (id, entity_id, status, detected_at, record) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             status = excluded.status, \
             record = excluded.record",
        )
        .bind(record.id.to_string())
        .bind(record.entity_id.to_string())
        .bind(status_to_str(record.status))
        .bind(record.detected_at.to_rfc3339())
        .bind(json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_conflict(&self, id: &ConflictId) -> anyhow::Result<Option<ConflictRecord>> {
        let row = sqlx::query("SELECT record FROM conflict_log WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(serde_json::from_str(r.get::<String, _>("record").as_str())?))
            .transpose()
    }

    async fn pending_conflicts(&self) -> anyhow::Result<Vec<ConflictRecord>> {
        let rows = sqlx::query(
            "SELECT record FROM conflict_log WHERE status = 'pending' ORDER BY detected_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| Ok(serde_json::from_str(r.get::<String, _>("record").as_str())?))
            .collect()
    }
}
