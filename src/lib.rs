/// flowgate: event-driven workflow automation engine
///
/// Workflows are DAGs of trigger, condition, action and delay nodes. Conditions are typed
/// predicates from the rules operator table; actions are side effects with compensating
/// reversals, so a failed run can be rolled back instead of left half-applied.

// Error taxonomy shared by every layer
pub mod error;

// Core configuration and setup
pub mod config;

// Operand domains, operators and rule definitions
pub mod rules;

// Workflow management layer - definitions, compilation, storage and registry
pub mod workflow;

// Runtime execution engine - evaluation, dispatch, traversal and rollback
pub mod runtime;

// HTTP API layer - REST endpoints for workflows, events and runs
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{ActionError, EngineError, UnresolvedPath};
pub use runtime::{ExecutionEngine, RunRecord, RunStatus};
pub use server::start_server;
pub use workflow::{Edge, Node, NodeKind, RunContext, TriggerEvent, Workflow, WorkflowGraph};
