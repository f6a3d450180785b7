/// Background cron scheduler service
///
/// Registers the CRON trigger of every ACTIVE workflow with tokio-cron-scheduler and starts a
/// run through the [`ExecutionEngine`] on each tick. Schedules follow workflow saves and deletes
/// without restarting the scheduler.

use crate::runtime::engine::ExecutionEngine;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::{TriggerEvent, TriggerType, WorkflowStatus};
use anyhow::Result;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

pub struct CronSchedulerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// Key: workflow_id, Value: scheduler job UUID
    jobs: Arc<RwLock<HashMap<String, Uuid>>>,
    registry: Arc<WorkflowRegistry>,
    engine: ExecutionEngine,
}

/// The schedule a workflow should run on, if any
fn cron_schedule(graph: &WorkflowGraph) -> Option<&str> {
    if graph.workflow().status != WorkflowStatus::Active {
        return None;
    }
    graph
        .trigger_node()
        .filter(|trigger| trigger.trigger_type == TriggerType::Cron)
        .and_then(|trigger| trigger.schedule.as_deref())
}

impl CronSchedulerService {
    pub async fn new(registry: Arc<WorkflowRegistry>, engine: ExecutionEngine) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            registry,
            engine,
        })
    }

    /// Register every scheduled workflow and start ticking
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting cron scheduler service");

        let mut registered = 0;
        for graph in self.registry.all() {
            if cron_schedule(&graph).is_some() {
                self.sync_workflow(&graph).await?;
                registered += 1;
            }
        }

        self.scheduler.read().await.start().await?;
        tracing::info!("✅ Cron scheduler started with {} scheduled workflows", registered);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping cron scheduler service");
        self.jobs.write().await.clear();
        self.scheduler.write().await.shutdown().await?;
        tracing::info!("✅ Cron scheduler stopped");
        Ok(())
    }

    /// Bring the job of one workflow in line with its current definition
    pub async fn sync_workflow(&self, graph: &WorkflowGraph) -> Result<()> {
        self.remove_workflow(graph.id()).await;

        let Some(schedule) = cron_schedule(graph) else {
            tracing::debug!("📋 Workflow '{}' has no active cron trigger", graph.id());
            return Ok(());
        };

        let workflow_id = graph.id().to_string();
        let schedule_owned = schedule.to_string();
        let registry = Arc::clone(&self.registry);
        let engine = self.engine.clone();

        let job = Job::new_async(schedule, move |_uuid, _lock| {
            let workflow_id = workflow_id.clone();
            let schedule = schedule_owned.clone();
            let registry = Arc::clone(&registry);
            let engine = engine.clone();

            Box::pin(async move {
                tracing::debug!("🔔 Cron trigger fired for workflow {}", workflow_id);

                // The workflow may have been deleted or deactivated since registration
                let Some(graph) = registry.get(&workflow_id).filter(|g| cron_schedule(g).is_some()) else {
                    tracing::debug!("⏭️ Skipping cron trigger for unavailable workflow: {}", workflow_id);
                    return;
                };

                let handle = engine
                    .spawn(graph, TriggerEvent::from_cron(&workflow_id, &schedule))
                    .await;
                tracing::info!("🚀 Cron started run {} of workflow {}", handle.run_id, workflow_id);
            })
        })?;

        let job_uuid = self.scheduler.write().await.add(job).await?;
        self.jobs.write().await.insert(graph.id().to_string(), job_uuid);

        tracing::info!("🔥 Scheduled workflow '{}' ({})", graph.id(), schedule);
        Ok(())
    }

    pub async fn remove_workflow(&self, workflow_id: &str) {
        let Some(job_uuid) = self.jobs.write().await.remove(workflow_id) else {
            return;
        };

        let scheduler = self.scheduler.read().await;
        match scheduler.remove(&job_uuid).await {
            Ok(()) => tracing::debug!("🛑 Removed cron job of workflow {}", workflow_id),
            Err(e) => tracing::warn!("⚠️ Failed to remove cron job of workflow {}: {}", workflow_id, e),
        }
    }

    pub async fn scheduled_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
