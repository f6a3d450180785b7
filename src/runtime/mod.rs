/// Runtime Execution Engine
///
/// Everything that happens after a workflow is compiled:
/// - Condition evaluation against the run context
/// - Action dispatch with timeouts, retries and compensation descriptors
/// - Graph traversal, fan-out and rollback/commit finalization
/// - Event ingestion and cron scheduling

// Run record, status machine and compensation journal
pub mod run;

// Metrics sink used by the evaluator and the engine
pub mod metrics;

// Condition evaluator built on the rules operator table
pub mod evaluator;

// Outbound service client and notification sender
pub mod clients;

// Record store behind the record-mutating actions
pub mod records;

// Action dispatcher: parameter resolution, retries, reversals
pub mod dispatch;

// Core execution engine using petgraph for DAG traversal
pub mod engine;

// Trigger event fan-out to subscribed workflows
pub mod ingest;

// Background cron scheduler service for CRON triggers
pub mod scheduler;

// Re-export main types
pub use dispatch::{ActionDispatcher, Collaborators, DispatchSettings};
pub use engine::{ExecutionEngine, RunHandle};
pub use evaluator::{ConditionEvaluator, Evaluation};
pub use ingest::EventIngestor;
pub use run::{RunRecord, RunStatus};
pub use scheduler::CronSchedulerService;
