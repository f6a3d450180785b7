/// Workflow and run persistence
///
/// The [`WorkflowRepository`] trait is the storage seam used by the registry, the orchestrator
/// and the API. [`SqliteRepository`] keeps definitions as JSON next to indexed lookup columns,
/// run records as JSON documents and the compensation journal as one row per entry.
/// [`MemoryRepository`] is the in-process implementation used by tests and embedders.

use crate::runtime::run::{CompensationDescriptor, RunRecord};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::types::Workflow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Store a new workflow or replace an existing one
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()>;

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>>;

    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>>;

    /// Every stored definition, keyed by id, for registry initialization
    async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>>;

    async fn delete_workflow(&self, id: &str) -> Result<bool>;

    /// Insert or replace the record for `record.run_id`
    async fn save_run_record(&self, record: &RunRecord) -> Result<()>;

    async fn load_run_record(&self, run_id: Uuid) -> Result<Option<RunRecord>>;

    /// Journal a compensation descriptor; re-appending the same `seq` replaces it
    async fn append_compensation(&self, run_id: Uuid, descriptor: &CompensationDescriptor) -> Result<()>;

    /// Journal entries of a run in `seq` order
    async fn load_compensations(&self, run_id: Uuid) -> Result<Vec<CompensationDescriptor>>;

    /// Load and compile a workflow
    async fn load_workflow(&self, id: &str) -> Result<Option<WorkflowGraph>> {
        match self.get_workflow(id).await? {
            Some(workflow) => Ok(Some(
                WorkflowGraph::compile(workflow)
                    .with_context(|| format!("Stored workflow '{}' does not compile", id))?,
            )),
            None => Ok(None),
        }
    }
}

/// Basic workflow metadata for listing operations
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub version: u32,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl WorkflowMetadata {
    fn from_workflow(workflow: &Workflow, created_at: String, updated_at: String) -> Self {
        Self {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            tenant_id: workflow.tenant_id.clone(),
            version: workflow.version,
            status: status_name(workflow),
            created_at,
            updated_at,
        }
    }
}

fn status_name(workflow: &Workflow) -> String {
    serde_json::to_value(workflow.status)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// SQLite-based storage
///
/// Timestamps are written by the application as RFC 3339 text.
#[derive(Debug, Clone)]
pub struct SqliteRepository {
    /// SQLite connection pool
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes; safe to call multiple times
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                tenant_id TEXT NOT NULL,
                status TEXT NOT NULL,
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_tenant ON workflows(tenant_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_records (
                run_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                record TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_run_records_workflow ON run_records(workflow_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS compensations (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                node_id TEXT NOT NULL,
                descriptor TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (run_id, seq)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for SqliteRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, tenant_id, status, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                tenant_id = excluded.tenant_id,
                status = excluded.status,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.tenant_id)
        .bind(status_name(workflow))
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save workflow '{}'", workflow.id))?;

        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.try_get("definition")?;
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            "SELECT definition, created_at, updated_at FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            let definition_json: String = row.try_get("definition")?;
            let workflow: Workflow = serde_json::from_str(&definition_json)?;
            workflows.push(WorkflowMetadata::from_workflow(
                &workflow,
                row.try_get("created_at")?,
                row.try_get("updated_at")?,
            ));
        }

        Ok(workflows)
    }

    async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        let rows = sqlx::query("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::new();
        for row in rows {
            let id: String = row.try_get("id")?;
            let definition_json: String = row.try_get("definition")?;
            match serde_json::from_str::<Workflow>(&definition_json) {
                Ok(workflow) => {
                    workflows.insert(id, workflow);
                }
                Err(e) => tracing::warn!("⚠️ Skipping unreadable workflow '{}': {}", id, e),
            }
        }

        Ok(workflows)
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_run_record(&self, record: &RunRecord) -> Result<()> {
        let record_json = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT INTO run_records (run_id, workflow_id, status, record, started_at, finished_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record,
                finished_at = excluded.finished_at
            "#,
        )
        .bind(record.run_id.to_string())
        .bind(&record.workflow_id)
        .bind(record.status.as_str())
        .bind(&record_json)
        .bind(record.started_at.to_rfc3339())
        .bind(record.finished_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save run record {}", record.run_id))?;

        Ok(())
    }

    async fn load_run_record(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let row = sqlx::query("SELECT record FROM run_records WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let record_json: String = row.try_get("record")?;
                Ok(Some(serde_json::from_str(&record_json)?))
            }
            None => Ok(None),
        }
    }

    async fn append_compensation(&self, run_id: Uuid, descriptor: &CompensationDescriptor) -> Result<()> {
        let descriptor_json = serde_json::to_string(descriptor)?;

        sqlx::query(
            r#"
            INSERT INTO compensations (run_id, seq, node_id, descriptor, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(run_id, seq) DO UPDATE SET
                descriptor = excluded.descriptor
            "#,
        )
        .bind(run_id.to_string())
        .bind(descriptor.seq as i64)
        .bind(&descriptor.node_id)
        .bind(&descriptor_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to journal compensation for run {}", run_id))?;

        Ok(())
    }

    async fn load_compensations(&self, run_id: Uuid) -> Result<Vec<CompensationDescriptor>> {
        let rows = sqlx::query("SELECT descriptor FROM compensations WHERE run_id = ? ORDER BY seq")
            .bind(run_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<CompensationDescriptor> {
                let descriptor_json: String = row.try_get("descriptor")?;
                Ok(serde_json::from_str(&descriptor_json)?)
            })
            .collect()
    }
}

/// In-process repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    workflows: RwLock<HashMap<String, (Workflow, String, String)>>,
    runs: RwLock<HashMap<Uuid, RunRecord>>,
    journal: RwLock<HashMap<Uuid, Vec<CompensationDescriptor>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for MemoryRepository {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut workflows = self.workflows.write().await;
        let created_at = workflows
            .get(&workflow.id)
            .map(|(_, created_at, _)| created_at.clone())
            .unwrap_or_else(|| now.clone());
        workflows.insert(workflow.id.clone(), (workflow.clone(), created_at, now));
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        Ok(self
            .workflows
            .read()
            .await
            .get(id)
            .map(|(workflow, _, _)| workflow.clone()))
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let mut listed: Vec<WorkflowMetadata> = self
            .workflows
            .read()
            .await
            .values()
            .map(|(workflow, created_at, updated_at)| {
                WorkflowMetadata::from_workflow(workflow, created_at.clone(), updated_at.clone())
            })
            .collect();
        listed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(listed)
    }

    async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        Ok(self
            .workflows
            .read()
            .await
            .iter()
            .map(|(id, (workflow, _, _))| (id.clone(), workflow.clone()))
            .collect())
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool> {
        Ok(self.workflows.write().await.remove(id).is_some())
    }

    async fn save_run_record(&self, record: &RunRecord) -> Result<()> {
        self.runs.write().await.insert(record.run_id, record.clone());
        Ok(())
    }

    async fn load_run_record(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn append_compensation(&self, run_id: Uuid, descriptor: &CompensationDescriptor) -> Result<()> {
        let mut journal = self.journal.write().await;
        let entries = journal.entry(run_id).or_default();
        match entries.iter_mut().find(|entry| entry.seq == descriptor.seq) {
            Some(existing) => *existing = descriptor.clone(),
            None => entries.push(descriptor.clone()),
        }
        entries.sort_by_key(|entry| entry.seq);
        Ok(())
    }

    async fn load_compensations(&self, run_id: Uuid) -> Result<Vec<CompensationDescriptor>> {
        Ok(self
            .journal
            .read()
            .await
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }
}
