/// Event ingestion: fans an incoming trigger event out to every subscribed workflow
///
/// Each subscriber gets its own independent run. Events arrive either one at a time through
/// [`EventIngestor::ingest`] (HTTP) or as a stream from an mpsc channel (stream consumers).

use crate::runtime::engine::{ExecutionEngine, RunHandle};
use crate::workflow::registry::WorkflowRegistry;
use crate::workflow::types::TriggerEvent;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct EventIngestor {
    registry: Arc<WorkflowRegistry>,
    engine: ExecutionEngine,
}

impl EventIngestor {
    pub fn new(registry: Arc<WorkflowRegistry>, engine: ExecutionEngine) -> Self {
        Self { registry, engine }
    }

    /// Start one run per ACTIVE workflow subscribed to (topic, eventType)
    pub async fn ingest(&self, event: TriggerEvent) -> Vec<RunHandle> {
        let subscribers = self.registry.subscribers(&event.topic, &event.event_type);
        if subscribers.is_empty() {
            tracing::debug!("📭 No workflow subscribed to {}/{}", event.topic, event.event_type);
            return Vec::new();
        }

        tracing::info!(
            "📨 Event {}/{} matched {} workflow(s)",
            event.topic,
            event.event_type,
            subscribers.len()
        );

        let mut handles = Vec::with_capacity(subscribers.len());
        for graph in subscribers {
            handles.push(self.engine.spawn(graph, event.clone()).await);
        }
        handles
    }

    /// Consume events until every sender is dropped
    pub async fn run(self, mut events: mpsc::Receiver<TriggerEvent>) {
        tracing::info!("🎧 Event ingestor listening");
        while let Some(event) = events.recv().await {
            let handles = self.ingest(event).await;
            for handle in handles {
                tracing::debug!("▶️ Run {} started", handle.run_id);
            }
        }
        tracing::info!("🔌 Event channel closed, ingestor stopping");
    }
}
