/// Workflow Management Layer
///
/// Workflow definitions, their compiled graphs, persistence and the hot-reload registry:
/// - Type definitions (Workflow, Node, Edge) and the run context
/// - Compilation into an immutable petgraph DAG
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Core workflow type definitions
pub mod types;

// Namespaced JSON document a run reads and extends
pub mod context;

// Validation and compilation into a petgraph DAG
pub mod graph;

// Repository trait with SQLite and in-memory implementations
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use context::RunContext;
pub use graph::WorkflowGraph;
pub use registry::WorkflowRegistry;
pub use storage::{MemoryRepository, SqliteRepository, WorkflowRepository};
pub use types::{
    ActionNode, ActionType, BranchTag, ConditionNode, DelayNode, Edge, Node, NodeKind,
    RollbackPolicy, TriggerEvent, TriggerNode, TriggerType, Workflow, WorkflowStatus,
};
