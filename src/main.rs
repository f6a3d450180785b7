/// flowgate server entry point
///
/// Serves:
/// - Workflow management API at /api/workflows/*
/// - Event intake at /api/events
/// - Run records and cancellation at /api/runs/*
/// - Health check at /healthz

use flowgate::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration comes from FLOWGATE_* environment variables
    let config = Config::default();
    start_server(config).await
}
