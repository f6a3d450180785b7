/// Record store: the data-mutation collaborator behind the record-mutating action types
///
/// Records are JSON documents addressed by `(entity, id)`, e.g. `("Lead", "L-42")`.
///
/// Runs isolate their writes with [`RecordLease`]: every record a run reads or writes stays
/// locked to that run until it reaches a terminal status, rollback included. Another run
/// touching the same record waits, bounded by its action timeout, so it never observes an
/// uncommitted write and a rollback never restores over someone else's committed one.

use crate::error::CallError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, CallError>;

    /// Insert or replace
    async fn put(&self, entity: &str, id: &str, record: &Value) -> Result<(), CallError>;

    /// Returns whether a record was removed
    async fn delete(&self, entity: &str, id: &str) -> Result<bool, CallError>;
}

/// SQLite-backed record store
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

fn database_error(error: sqlx::Error) -> CallError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            CallError::Transient(error.to_string())
        }
        other => CallError::Permanent(other.to_string()),
    }
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                entity TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (entity, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, CallError> {
        let row = sqlx::query("SELECT data FROM records WHERE entity = ? AND id = ?")
            .bind(entity)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data").map_err(database_error)?;
                serde_json::from_str(&data)
                    .map(Some)
                    .map_err(|e| CallError::Permanent(format!("corrupt {} record '{}': {}", entity, id, e)))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entity: &str, id: &str, record: &Value) -> Result<(), CallError> {
        sqlx::query(
            r#"
            INSERT INTO records (entity, id, data, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(entity)
        .bind(id)
        .bind(record.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(database_error)?;

        tracing::debug!("💾 Stored {} record '{}'", entity, id);
        Ok(())
    }

    async fn delete(&self, entity: &str, id: &str) -> Result<bool, CallError> {
        let result = sqlx::query("DELETE FROM records WHERE entity = ? AND id = ?")
            .bind(entity)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(database_error)?;

        Ok(result.rows_affected() > 0)
    }
}

type RecordKey = (String, String);

/// Lock table shared by every run of an engine
#[derive(Debug, Default)]
pub struct RecordLocks {
    locks: Mutex<HashMap<RecordKey, Arc<Mutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run's lease; dropping it releases every record it holds
    pub fn lease(self: &Arc<Self>) -> RecordLease {
        RecordLease {
            locks: self.clone(),
            held: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, key: &RecordKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        // Entries nobody holds or waits for
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.clone()).or_default().clone()
    }
}

/// Records locked by one run
#[derive(Debug)]
pub struct RecordLease {
    locks: Arc<RecordLocks>,
    held: Mutex<HashMap<RecordKey, OwnedMutexGuard<()>>>,
}

impl RecordLease {
    /// Lock `(entity, id)` for the rest of the run, waiting at most `wait`
    ///
    /// Re-acquiring a record the lease already holds returns immediately, so concurrent
    /// branches of one run share their records.
    pub async fn acquire(&self, entity: &str, id: &str, wait: Duration) -> Result<(), CallError> {
        let key = (entity.to_string(), id.to_string());
        let mut held = self.held.lock().await;
        if held.contains_key(&key) {
            return Ok(());
        }

        let lock = self.locks.lock_for(&key).await;
        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => {
                held.insert(key, guard);
                Ok(())
            }
            Err(_) => Err(CallError::Transient(format!(
                "{} '{}' is still locked by another run after {:?}",
                entity, id, wait
            ))),
        }
    }

    /// Number of records held
    pub async fn record_count(&self) -> usize {
        self.held.lock().await.len()
    }
}

/// In-process record store
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<(String, String), Value>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids stored under `entity`, sorted
    pub async fn ids(&self, entity: &str) -> Vec<String> {
        self.records
            .read()
            .await
            .keys()
            .filter(|(stored, _)| stored == entity)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, CallError> {
        Ok(self
            .records
            .read()
            .await
            .get(&(entity.to_string(), id.to_string()))
            .cloned())
    }

    async fn put(&self, entity: &str, id: &str, record: &Value) -> Result<(), CallError> {
        self.records
            .write()
            .await
            .insert((entity.to_string(), id.to_string()), record.clone());
        Ok(())
    }

    async fn delete(&self, entity: &str, id: &str) -> Result<bool, CallError> {
        Ok(self
            .records
            .write()
            .await
            .remove(&(entity.to_string(), id.to_string()))
            .is_some())
    }
}
