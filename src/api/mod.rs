/// HTTP API Layer
///
/// REST endpoints for workflow management, event intake and run inspection:
/// - Workflow CRUD with compile-on-save and hot-reload
/// - Trigger event intake
/// - Run records and cancellation

// Error type rendered as JSON responses
pub mod error;

// Workflow management endpoints (POST/GET/PUT/DELETE) and manual runs
pub mod workflows;

// Trigger event intake
pub mod events;

// Run records and cancellation
pub mod runs;

// Re-export router builders
pub use events::create_event_routes;
pub use runs::create_run_routes;
pub use workflows::{create_workflow_routes, AppState};
