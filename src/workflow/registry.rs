/// Hot-reload workflow registry using ArcSwap
///
/// Holds the compiled graph of every stored workflow. Each update swaps the entire map pointer,
/// so reads never block and runs already in flight keep the `Arc<WorkflowGraph>` they started
/// with. Saving goes through [`WorkflowRegistry::save`], which compiles first: a definition that
/// does not compile is never stored.

use crate::error::EngineError;
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::storage::WorkflowRepository;
use crate::workflow::types::{TriggerType, Workflow, WorkflowStatus};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaveError {
    /// The definition does not compile
    #[error(transparent)]
    Invalid(#[from] EngineError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Lock-free registry of compiled workflows
pub struct WorkflowRegistry {
    /// Key: workflow_id, Value: compiled graph
    workflows: ArcSwap<HashMap<String, Arc<WorkflowGraph>>>,

    /// Persistent storage for saves and reloads
    repository: Arc<dyn WorkflowRepository>,
}

impl WorkflowRegistry {
    pub fn new(repository: Arc<dyn WorkflowRepository>) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            repository,
        }
    }

    pub fn repository(&self) -> &Arc<dyn WorkflowRepository> {
        &self.repository
    }

    /// Populate the registry from storage at startup
    ///
    /// Definitions that no longer compile are skipped with a warning.
    pub async fn init_from_storage(&self) -> anyhow::Result<()> {
        let stored = self.repository.load_all_workflows().await?;
        let mut compiled = HashMap::with_capacity(stored.len());

        for (id, workflow) in stored {
            match WorkflowGraph::compile(workflow) {
                Ok(graph) => {
                    compiled.insert(id, Arc::new(graph));
                }
                Err(e) => tracing::warn!("⚠️ Skipping workflow '{}': {}", id, e),
            }
        }

        self.workflows.store(Arc::new(compiled));
        tracing::info!(
            "📚 Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );
        Ok(())
    }

    /// Compile, persist and publish a definition
    pub async fn save(&self, workflow: Workflow) -> Result<Arc<WorkflowGraph>, SaveError> {
        let graph = Arc::new(WorkflowGraph::compile(workflow)?);
        self.repository.save_workflow(graph.workflow()).await?;
        self.publish(graph.clone());

        tracing::info!("🔄 Hot-reloaded workflow: {} (v{})", graph.id(), graph.workflow().version);
        Ok(graph)
    }

    /// Re-read one workflow from storage
    pub async fn reload(&self, workflow_id: &str) -> anyhow::Result<()> {
        match self.repository.load_workflow(workflow_id).await? {
            Some(graph) => {
                self.publish(Arc::new(graph));
                tracing::info!("🔄 Hot-reloaded workflow: {}", workflow_id);
            }
            None => self.unpublish(workflow_id),
        }
        Ok(())
    }

    /// Delete from storage and registry
    pub async fn remove(&self, workflow_id: &str) -> anyhow::Result<bool> {
        let deleted = self.repository.delete_workflow(workflow_id).await?;
        self.unpublish(workflow_id);
        Ok(deleted)
    }

    /// Lock-free read
    pub fn get(&self, workflow_id: &str) -> Option<Arc<WorkflowGraph>> {
        self.workflows.load().get(workflow_id).cloned()
    }

    pub fn list_workflow_ids(&self) -> Vec<String> {
        self.workflows.load().keys().cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<WorkflowGraph>> {
        self.workflows.load().values().cloned().collect()
    }

    /// Active workflows whose stream trigger matches (topic, eventType)
    pub fn subscribers(&self, topic: &str, event_type: &str) -> Vec<Arc<WorkflowGraph>> {
        let mut matched: Vec<Arc<WorkflowGraph>> = self
            .workflows
            .load()
            .values()
            .filter(|graph| graph.workflow().status == WorkflowStatus::Active)
            .filter(|graph| {
                graph.trigger_node().is_some_and(|trigger| {
                    trigger.trigger_type == TriggerType::StreamEvent
                        && trigger.topic.as_deref() == Some(topic)
                        && trigger.event_type.as_deref() == Some(event_type)
                })
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id().cmp(b.id()));
        matched
    }

    fn publish(&self, graph: Arc<WorkflowGraph>) {
        let current = self.workflows.load();
        let mut next = (**current).clone();
        next.insert(graph.id().to_string(), graph);
        self.workflows.store(Arc::new(next));
    }

    fn unpublish(&self, workflow_id: &str) {
        let current = self.workflows.load();
        if current.contains_key(workflow_id) {
            let mut next = (**current).clone();
            next.remove(workflow_id);
            self.workflows.store(Arc::new(next));
            tracing::info!("🗑️ Removed workflow from registry: {}", workflow_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::storage::MemoryRepository;
    use serde_json::json;

    fn stream_workflow(id: &str, status: &str) -> Workflow {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "status": status,
            "tenantId": "t1",
            "nodes": [
                {"id": "t", "tenantId": "t1", "kind": "TRIGGER", "triggerType": "STREAM_EVENT",
                 "topic": "leads-topic", "eventType": "lead.record.created.success"},
                {"id": "d", "tenantId": "t1", "kind": "DELAY", "delayType": "FIXED", "delaySeconds": 0}
            ],
            "edges": [{"from": "t", "to": "d", "tenantId": "t1"}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_indexes_active_subscribers() {
        let registry = WorkflowRegistry::new(Arc::new(MemoryRepository::new()));
        registry.save(stream_workflow("wf-a", "ACTIVE")).await.unwrap();
        registry.save(stream_workflow("wf-b", "DRAFT")).await.unwrap();

        let subscribers = registry.subscribers("leads-topic", "lead.record.created.success");
        assert_eq!(subscribers.len(), 1);
        assert_eq!(subscribers[0].id(), "wf-a");
        assert!(registry.subscribers("leads-topic", "lead.deleted").is_empty());
    }

    #[tokio::test]
    async fn test_invalid_definition_is_not_stored() {
        let repository = Arc::new(MemoryRepository::new());
        let registry = WorkflowRegistry::new(repository.clone());

        let mut workflow = stream_workflow("wf-bad", "ACTIVE");
        workflow.edges.clear();
        let result = registry.save(workflow).await;

        assert!(matches!(result, Err(SaveError::Invalid(_))));
        assert!(registry.get("wf-bad").is_none());
        assert!(repository.get_workflow("wf-bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_init_and_remove() {
        let repository = Arc::new(MemoryRepository::new());
        repository.save_workflow(&stream_workflow("wf-a", "ACTIVE")).await.unwrap();

        let registry = WorkflowRegistry::new(repository);
        registry.init_from_storage().await.unwrap();
        assert!(registry.get("wf-a").is_some());

        assert!(registry.remove("wf-a").await.unwrap());
        assert!(registry.get("wf-a").is_none());
    }
}
