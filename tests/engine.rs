mod common;

use async_trait::async_trait;
use common::*;
use flowgate::error::CallError;
use flowgate::runtime::clients::{LogNotificationSender, ServiceClient, ServiceResponse};
use flowgate::runtime::dispatch::{ActionDispatcher, Collaborators, DispatchSettings};
use flowgate::runtime::metrics::NoopMetrics;
use flowgate::runtime::records::{MemoryRecordStore, RecordStore};
use flowgate::runtime::run::{CompensationState, NodeOutcome};
use flowgate::workflow::storage::{MemoryRepository, WorkflowRepository};
use flowgate::{ExecutionEngine, RunStatus};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Lead intake: duplicate check, domain extraction, company lookup, Apollo enrichment, notify
fn lead_intake_workflow() -> flowgate::Workflow {
    workflow(
        "wf-lead-intake",
        "AUTO_ROLLBACK",
        vec![
            trigger("t-lead-created"),
            condition("c-duplicate", "data.lead.isDuplicate", "EQUALS", Some(json!("false")), "BOOLEAN"),
            action(
                "a-extract-domain",
                json!({
                    "actionType": "CUSTOM_FUNCTION",
                    "serviceName": "DomainExtractor",
                    "endpoint": "/extract",
                    "parameters": { "email": "$data.lead.email" },
                    "output": "domain"
                }),
            ),
            condition("c-company-exists", "company.id", "EXISTS", None, "STRING"),
            action(
                "a-fetch-apollo",
                json!({
                    "actionType": "HTTP_REQUEST",
                    "serviceName": "Apollo",
                    "endpoint": "/v1/organizations/enrich",
                    "method": "GET",
                    "parameters": { "domain": "$domain.domain" },
                    "output": "apollo"
                }),
            ),
            condition("c-apollo-found", "apollo.company.id", "EXISTS", None, "STRING"),
            action(
                "a-create-company",
                json!({
                    "actionType": "CREATE_COMPANY",
                    "parameters": { "data": { "name": "$apollo.company.name" } }
                }),
            ),
            action(
                "a-notify-sales",
                json!({
                    "actionType": "NOTIFICATION_SEND",
                    "templateId": "lead-without-company",
                    "parameters": { "leadId": "$data.lead.id", "email": "$data.lead.email" }
                }),
            ),
        ],
        vec![
            edge("t-lead-created", "c-duplicate"),
            branch("c-duplicate", "a-extract-domain", "TRUE"),
            edge("a-extract-domain", "c-company-exists"),
            branch("c-company-exists", "a-notify-sales", "TRUE"),
            branch("c-company-exists", "a-fetch-apollo", "FALSE"),
            edge("a-fetch-apollo", "c-apollo-found"),
            branch("c-apollo-found", "a-create-company", "TRUE"),
            branch("c-apollo-found", "a-notify-sales", "FALSE"),
        ],
    )
}

#[tokio::test]
async fn test_lead_intake_commits_with_one_notification() {
    let harness = Harness::new();
    harness
        .services
        .respond("DomainExtractor", Ok(json!({ "domain": "b.com" })));
    harness.services.respond("Apollo", Ok(json!({ "results": [] })));

    let graph = compile(lead_intake_workflow());
    let record = harness
        .engine
        .execute(
            graph,
            lead_event(json!({ "lead": { "id": "L1", "email": "a@b.com", "isDuplicate": false } })),
        )
        .await;

    assert_eq!(record.status, RunStatus::Committed);
    assert_eq!(
        record.trail(),
        vec![
            "t-lead-created",
            "c-duplicate",
            "a-extract-domain",
            "c-company-exists",
            "a-fetch-apollo",
            "c-apollo-found",
            "a-notify-sales"
        ]
    );

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "lead-without-company");
    assert_eq!(sent[0].1, json!({ "leadId": "L1", "email": "a@b.com" }));

    let apollo = harness.services.calls_to("Apollo");
    assert_eq!(apollo.len(), 1);
    assert_eq!(apollo[0].params, json!({ "domain": "b.com" }));
    assert_eq!(harness.records.len().await, 0);

    // Persisted with the same terminal state
    let stored = harness
        .repository
        .load_run_record(record.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, RunStatus::Committed);
    assert_eq!(stored.visited_nodes.len(), 7);

    let runs = harness.metrics.events("workflow.run");
    assert_eq!(runs.len(), 1);
    assert!(runs[0].contains(&("status".to_string(), "COMMITTED".to_string())));
}

#[tokio::test]
async fn test_failure_compensates_completed_actions_in_reverse() {
    let harness = Harness::new();
    harness
        .services
        .respond("Scorer", Err(CallError::Permanent("status 400: bad request".into())));

    let graph = compile(workflow(
        "wf-rollback",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            create_lead("a1", "L1"),
            create_lead("a2", "L2"),
            action(
                "a3",
                json!({
                    "actionType": "CREATE_COMPANY",
                    "parameters": { "id": "C1", "data": { "name": "Acme" } }
                }),
            ),
            action(
                "a-score",
                json!({ "actionType": "HTTP_REQUEST", "serviceName": "Scorer", "endpoint": "/score" }),
            ),
        ],
        vec![edge("t", "a1"), edge("a1", "a2"), edge("a2", "a3"), edge("a3", "a-score")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::RolledBack);
    assert!(record.residual_errors.is_empty());
    assert!(record.reason.as_deref().unwrap_or_default().contains("a-score"));

    let order: Vec<&str> = record
        .applied_compensations()
        .iter()
        .map(|c| c.node_id.as_str())
        .collect();
    assert_eq!(order, vec!["a3", "a2", "a1"]);
    assert!(record
        .compensations
        .iter()
        .all(|c| c.state == CompensationState::Applied));

    // Every created record is gone again
    assert_eq!(harness.records.len().await, 0);

    // Permanent failures are not retried
    assert_eq!(harness.services.calls_to("Scorer").len(), 1);

    let journal = harness.repository.load_compensations(record.run_id).await.unwrap();
    assert_eq!(journal.len(), 3);
    assert!(journal.iter().all(|c| c.state == CompensationState::Applied));
}

#[tokio::test]
async fn test_update_is_restored_on_rollback() {
    let harness = Harness::new();
    harness
        .records
        .put("Lead", "L1", &json!({ "id": "L1", "status": "new", "score": 10 }))
        .await
        .unwrap();
    harness
        .services
        .respond("Crm", Err(CallError::Permanent("status 422: rejected".into())));

    let graph = compile(workflow(
        "wf-restore",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            action(
                "a-qualify",
                json!({
                    "actionType": "UPDATE_LEAD",
                    "parameters": { "field": "status", "value": "qualified" }
                }),
            ),
            action(
                "a-sync",
                json!({ "actionType": "CUSTOM_FUNCTION", "serviceName": "Crm", "endpoint": "/sync" }),
            ),
        ],
        vec![edge("t", "a-qualify"), edge("a-qualify", "a-sync")],
    ));

    let record = harness
        .engine
        .execute(graph, lead_event(json!({ "lead": { "id": "L1" } })))
        .await;

    assert_eq!(record.status, RunStatus::RolledBack);
    assert_eq!(
        harness.records.get("Lead", "L1").await.unwrap(),
        Some(json!({ "id": "L1", "status": "new", "score": 10 }))
    );
}

/// Record store whose deletes always fail
struct BrokenDeletes(Arc<MemoryRecordStore>);

#[async_trait]
impl RecordStore for BrokenDeletes {
    async fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, CallError> {
        self.0.get(entity, id).await
    }

    async fn put(&self, entity: &str, id: &str, record: &Value) -> Result<(), CallError> {
        self.0.put(entity, id, record).await
    }

    async fn delete(&self, _entity: &str, _id: &str) -> Result<bool, CallError> {
        Err(CallError::Permanent("record store is read-only".into()))
    }
}

#[tokio::test]
async fn test_failed_compensation_is_surfaced_as_residual() {
    let harness = Harness::with_records(|records| Arc::new(BrokenDeletes(records)) as Arc<dyn RecordStore>);
    harness
        .services
        .respond("Scorer", Err(CallError::Permanent("status 400".into())));

    let graph = compile(workflow(
        "wf-residual",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            create_lead("a1", "L1"),
            action(
                "a-score",
                json!({ "actionType": "HTTP_REQUEST", "serviceName": "Scorer", "endpoint": "/score" }),
            ),
        ],
        vec![edge("t", "a1"), edge("a1", "a-score")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::RolledBack);
    assert_eq!(record.residual_errors.len(), 1);
    assert!(record.residual_errors[0].contains("a1"));
    assert_eq!(record.compensations[0].state, CompensationState::Failed);
    assert_eq!(harness.records.ids("Lead").await, vec!["L1"]);
}

#[tokio::test]
async fn test_continue_on_error_keeps_walking() {
    let harness = Harness::new();
    harness
        .services
        .respond("Scorer", Err(CallError::Permanent("status 404".into())));

    let graph = compile(workflow(
        "wf-continue",
        "CONTINUE_ON_ERROR",
        vec![
            trigger("t"),
            create_lead("a1", "L1"),
            action(
                "a-score",
                json!({ "actionType": "HTTP_REQUEST", "serviceName": "Scorer", "endpoint": "/score" }),
            ),
            create_lead("a3", "L3"),
        ],
        vec![edge("t", "a1"), edge("a1", "a-score"), edge("a-score", "a3")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.errors.len(), 1);
    assert_eq!(record.trail(), vec!["t", "a1", "a-score", "a3"]);
    assert!(record.applied_compensations().is_empty());
    assert_eq!(harness.records.ids("Lead").await, vec!["L1", "L3"]);
}

#[tokio::test]
async fn test_fan_out_runs_every_branch() {
    let harness = Harness::new();
    let graph = compile(workflow(
        "wf-fan-out",
        "AUTO_ROLLBACK",
        vec![trigger("t"), create_lead("a-left", "L-left"), create_lead("a-right", "L-right")],
        vec![edge("t", "a-left"), edge("t", "a-right")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::Committed);
    assert_eq!(record.visited_nodes.len(), 3);
    assert_eq!(harness.records.ids("Lead").await, vec!["L-left", "L-right"]);
}

#[tokio::test]
async fn test_failing_branch_rolls_back_its_siblings() {
    let harness = Harness::new();
    harness
        .services
        .respond("Scorer", Err(CallError::Permanent("status 400".into())));

    let graph = compile(workflow(
        "wf-fan-out-failure",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            create_lead("a-left", "L-left"),
            action(
                "a-right",
                json!({ "actionType": "HTTP_REQUEST", "serviceName": "Scorer", "endpoint": "/score" }),
            ),
        ],
        vec![edge("t", "a-left"), edge("t", "a-right")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::RolledBack);
    assert!(record.reason.as_deref().unwrap_or_default().contains("a-right"));
    assert_eq!(harness.records.len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_delay_rolls_back() {
    let harness = Harness::new();
    let graph = compile(workflow(
        "wf-delay",
        "AUTO_ROLLBACK",
        vec![trigger("t"), create_lead("a1", "L1"), delay("d-wait", 3600), create_lead("a2", "L2")],
        vec![edge("t", "a1"), edge("a1", "d-wait"), edge("d-wait", "a2")],
    ));

    let handle = harness.engine.spawn(graph, lead_event(json!({}))).await;
    let run_id = handle.run_id;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.records.ids("Lead").await, vec!["L1"]);
    assert!(harness.engine.cancel(run_id).await);

    let record = handle.join().await.unwrap();
    assert_eq!(record.status, RunStatus::RolledBack);
    assert_eq!(record.reason.as_deref(), Some("run cancelled"));
    assert_eq!(
        record.visited_nodes.last().map(|visit| &visit.outcome),
        Some(&NodeOutcome::Skipped {
            reason: "cancelled during delay".into()
        })
    );
    assert_eq!(harness.records.len().await, 0);
    assert!(!harness.engine.cancel(run_id).await);
}

#[tokio::test(start_paused = true)]
async fn test_delay_resumes_after_its_duration() {
    let harness = Harness::new();
    let graph = compile(workflow(
        "wf-delay-complete",
        "AUTO_ROLLBACK",
        vec![trigger("t"), delay("d-wait", 30), create_lead("a1", "L1")],
        vec![edge("t", "d-wait"), edge("d-wait", "a1")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::Committed);
    assert_eq!(record.visited_nodes[1].outcome, NodeOutcome::Delayed { seconds: 30 });
    assert_eq!(harness.records.ids("Lead").await, vec!["L1"]);
}

#[tokio::test]
async fn test_unmatched_outcome_fails_the_run() {
    let harness = Harness::new();
    let graph = compile(workflow(
        "wf-no-branch",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            create_lead("a1", "L1"),
            condition("c-score", "data.lead.score", "NUMBER.GREATER_THAN", Some(json!(50)), "NUMBER"),
            create_lead("a-hot", "L-hot"),
        ],
        vec![edge("t", "a1"), edge("a1", "c-score"), branch("c-score", "a-hot", "TRUE")],
    ));

    let record = harness
        .engine
        .execute(graph, lead_event(json!({ "lead": { "score": 12 } })))
        .await;

    assert_eq!(record.status, RunStatus::Failed);
    assert!(record
        .reason
        .as_deref()
        .unwrap_or_default()
        .contains("no outgoing edge of 'c-score'"));
    // Completed work is still undone
    assert_eq!(harness.records.len().await, 0);
}

#[tokio::test]
async fn test_abort_edge_ends_the_run() {
    let harness = Harness::new();
    let graph = compile(workflow(
        "wf-abort",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            condition("c-valid", "data.lead.email", "STRING.CONTAINS", Some(json!("@")), "STRING"),
            create_lead("a1", "L1"),
        ],
        vec![edge("t", "c-valid"), branch("c-valid", "a1", "TRUE"), branch("c-valid", "a1", "ABORT")],
    ));

    let record = harness
        .engine
        .execute(graph, lead_event(json!({ "lead": { "email": "not-an-email" } })))
        .await;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.reason.as_deref(), Some("run aborted by condition 'c-valid'"));
}

#[tokio::test]
async fn test_named_branches_route_by_value() {
    let harness = Harness::new();
    let assign = |id: &str, queue: &str| {
        action(
            id,
            json!({ "actionType": "ASSIGN_TO_USER", "parameters": { "queue": queue } }),
        )
    };
    let graph = compile(workflow(
        "wf-routing",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            condition("c-seniority", "data.lead.seniority", "STRING.EQUALS", Some(json!("?")), "STRING"),
            assign("a-senior", "senior-recruiters"),
            assign("a-standard", "standard-recruiters"),
        ],
        vec![
            edge("t", "c-seniority"),
            branch("c-seniority", "a-senior", "Senior"),
            branch("c-seniority", "a-standard", "DEFAULT"),
        ],
    ));

    let record = harness
        .engine
        .execute(
            graph.clone(),
            lead_event(json!({ "lead": { "id": "L1", "seniority": "Senior" } })),
        )
        .await;
    assert_eq!(record.status, RunStatus::Committed);
    assert_eq!(record.trail(), vec!["t", "c-seniority", "a-senior"]);
    assert_eq!(
        harness.records.get("Lead", "L1").await.unwrap(),
        Some(json!({ "id": "L1", "assignedQueue": "senior-recruiters" }))
    );

    let record = harness
        .engine
        .execute(graph, lead_event(json!({ "lead": { "id": "L2", "seniority": "Junior" } })))
        .await;
    assert_eq!(record.trail(), vec!["t", "c-seniority", "a-standard"]);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let harness = Harness::new();
    harness
        .services
        .respond("Apollo", Err(CallError::Transient("status 503".into())));
    harness
        .services
        .respond("Apollo", Ok(json!({ "company": { "id": "C9" } })));

    let graph = compile(workflow(
        "wf-retry",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            action(
                "a-apollo",
                json!({
                    "actionType": "HTTP_REQUEST",
                    "serviceName": "Apollo",
                    "endpoint": "/enrich",
                    "output": "apollo"
                }),
            ),
            condition("c-found", "apollo.company.id", "EXISTS", None, "STRING"),
            create_lead("a-link", "L1"),
        ],
        vec![edge("t", "a-apollo"), edge("a-apollo", "c-found"), branch("c-found", "a-link", "TRUE")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::Committed);
    assert_eq!(harness.services.calls_to("Apollo").len(), 2);
    assert_eq!(record.trail(), vec!["t", "a-apollo", "c-found", "a-link"]);
}

#[tokio::test]
async fn test_condition_errors_become_diagnostics() {
    let harness = Harness::new();
    let graph = compile(workflow(
        "wf-diagnostics",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            condition("c-age", "data.lead.age", "NUMBER.GREATER_THAN", Some(json!(18)), "NUMBER"),
            create_lead("a-adult", "L1"),
            create_lead("a-other", "L2"),
        ],
        vec![
            edge("t", "c-age"),
            branch("c-age", "a-adult", "TRUE"),
            branch("c-age", "a-other", "FALSE"),
        ],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({ "lead": {} }))).await;

    assert_eq!(record.status, RunStatus::Committed);
    assert_eq!(record.trail(), vec!["t", "c-age", "a-other"]);
    assert_eq!(record.diagnostics.len(), 1);
    assert!(record.diagnostics[0].starts_with("c-age: unresolved path 'data.lead.age'"));
}

#[tokio::test]
async fn test_stored_workflow_runs_through_repository() {
    let harness = Harness::new();
    let definition = workflow("wf-stored", "AUTO_ROLLBACK", vec![trigger("t")], vec![]);
    harness.repository.save_workflow(&definition).await.unwrap();

    let record = harness
        .engine
        .execute_stored("wf-stored", lead_event(json!({})))
        .await
        .unwrap();
    assert_eq!(record.status, RunStatus::Committed);
    assert!(harness
        .engine
        .execute_stored("wf-missing", lead_event(json!({})))
        .await
        .is_err());
}

#[tokio::test]
async fn test_create_over_existing_record_survives_rollback() {
    let harness = Harness::new();
    let existing = json!({ "id": "L1", "email": "a@b.com", "owner": "alice" });
    harness.records.put("Lead", "L1", &existing).await.unwrap();
    harness
        .services
        .respond("Scorer", Err(CallError::Permanent("status 400".into())));

    let graph = compile(workflow(
        "wf-recreate",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            create_lead("a1", "L1"),
            action(
                "a-score",
                json!({ "actionType": "HTTP_REQUEST", "serviceName": "Scorer", "endpoint": "/score" }),
            ),
        ],
        vec![edge("t", "a1"), edge("a1", "a-score")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::RolledBack);
    assert_eq!(record.compensations[0].state, CompensationState::Applied);
    assert_eq!(harness.records.get("Lead", "L1").await.unwrap(), Some(existing));
}

fn gate_workflow() -> flowgate::Workflow {
    workflow(
        "wf-gate",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            condition("c-valid", "data.lead.email", "STRING.CONTAINS", Some(json!("@")), "STRING"),
            create_lead("a1", "L1"),
            create_lead("a-abort", "L-abort"),
        ],
        vec![
            edge("t", "c-valid"),
            edge("c-valid", "a1"),
            branch("c-valid", "a-abort", "ABORT"),
        ],
    )
}

#[tokio::test]
async fn test_gate_condition_aborts_when_unsatisfied() {
    let harness = Harness::new();
    let record = harness
        .engine
        .execute(
            compile(gate_workflow()),
            lead_event(json!({ "lead": { "email": "not-an-email" } })),
        )
        .await;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.reason.as_deref(), Some("run aborted by condition 'c-valid'"));
    assert_eq!(record.trail(), vec!["t", "c-valid"]);
    assert_eq!(harness.records.len().await, 0);
}

#[tokio::test]
async fn test_gate_condition_passes_when_satisfied() {
    let harness = Harness::new();
    let record = harness
        .engine
        .execute(compile(gate_workflow()), lead_event(json!({ "lead": { "email": "a@b.com" } })))
        .await;

    assert_eq!(record.status, RunStatus::Committed);
    assert_eq!(record.trail(), vec!["t", "c-valid", "a1"]);
    assert_eq!(harness.records.ids("Lead").await, vec!["L1"]);
}

/// Record store whose writes land and then stall
struct StallingPuts {
    inner: Arc<MemoryRecordStore>,
    stall: Duration,
}

#[async_trait]
impl RecordStore for StallingPuts {
    async fn get(&self, entity: &str, id: &str) -> Result<Option<Value>, CallError> {
        self.inner.get(entity, id).await
    }

    async fn put(&self, entity: &str, id: &str, record: &Value) -> Result<(), CallError> {
        self.inner.put(entity, id, record).await?;
        tokio::time::sleep(self.stall).await;
        Ok(())
    }

    async fn delete(&self, entity: &str, id: &str) -> Result<bool, CallError> {
        self.inner.delete(entity, id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_action_is_compensated() {
    let harness = Harness::with_records(|inner| {
        Arc::new(StallingPuts {
            inner,
            stall: Duration::from_secs(60),
        }) as Arc<dyn RecordStore>
    });

    let graph = compile(workflow(
        "wf-timeout",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            action(
                "a1",
                json!({
                    "actionType": "DATA_UPDATE",
                    "timeoutSeconds": 1,
                    "parameters": { "operation": "create", "entity": "Lead", "data": { "id": "L1" } }
                }),
            ),
        ],
        vec![edge("t", "a1")],
    ));

    let record = harness.engine.execute(graph, lead_event(json!({}))).await;

    assert_eq!(record.status, RunStatus::RolledBack);
    assert!(record.reason.as_deref().unwrap_or_default().contains("timed out"));
    // The write landed before the deadline passed, so the reversal must run
    assert_eq!(record.compensations.len(), 1);
    assert_eq!(record.compensations[0].state, CompensationState::Applied);
    assert_eq!(harness.records.len().await, 0);
}

fn slow_enrichment(idempotent: bool) -> Arc<flowgate::WorkflowGraph> {
    compile(workflow(
        "wf-slow-call",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            action(
                "a-enrich",
                json!({
                    "actionType": "HTTP_REQUEST",
                    "serviceName": "Enricher",
                    "endpoint": "/enrich",
                    "timeoutSeconds": 1,
                    "idempotent": idempotent
                }),
            ),
        ],
        vec![edge("t", "a-enrich")],
    ))
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_only_for_idempotent_actions() {
    let harness = Harness::new();
    harness.services.slow("Enricher", Duration::from_secs(30));

    let record = harness
        .engine
        .execute(slow_enrichment(false), lead_event(json!({})))
        .await;
    assert_eq!(record.status, RunStatus::RolledBack);
    let calls = harness.services.calls_to("Enricher");
    assert_eq!(calls.len(), 1);
    // The action's deadline travels with the call
    assert_eq!(calls[0].timeout, Duration::from_secs(1));

    let harness = Harness::new();
    harness.services.slow("Enricher", Duration::from_secs(30));
    let record = harness
        .engine
        .execute(slow_enrichment(true), lead_event(json!({})))
        .await;
    assert_eq!(record.status, RunStatus::RolledBack);
    assert_eq!(harness.services.calls_to("Enricher").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_waits_for_the_action_in_flight() {
    let harness = Harness::new();
    harness.services.slow("Scorer", Duration::from_secs(2));

    let graph = compile(workflow(
        "wf-cancel-in-flight",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            create_lead("a1", "L1"),
            action(
                "a-score",
                json!({ "actionType": "HTTP_REQUEST", "serviceName": "Scorer", "endpoint": "/score" }),
            ),
            create_lead("a2", "L2"),
        ],
        vec![edge("t", "a1"), edge("a1", "a-score"), edge("a-score", "a2")],
    ));

    let handle = harness.engine.spawn(graph, lead_event(json!({}))).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.services.calls_to("Scorer").len(), 1);
    assert!(harness.engine.cancel(handle.run_id).await);

    let record = handle.join().await.unwrap();
    assert_eq!(record.status, RunStatus::RolledBack);
    assert_eq!(record.reason.as_deref(), Some("run cancelled"));
    // The call finished; nothing after it started
    assert_eq!(record.trail(), vec!["t", "a1", "a-score"]);
    assert_eq!(record.visited_nodes[2].outcome, NodeOutcome::ActionSucceeded);
    assert_eq!(harness.records.len().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_do_not_see_uncommitted_writes() {
    let harness = Harness::new();
    harness
        .records
        .put("Lead", "L1", &json!({ "id": "L1", "score": 1 }))
        .await
        .unwrap();
    harness.services.slow("Scorer", Duration::from_secs(2));
    harness
        .services
        .respond("Scorer", Err(CallError::Permanent("status 400".into())));

    // Writes the score, then fails and rolls it back
    let scoring = compile(workflow(
        "wf-scoring",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            action(
                "a-score",
                json!({ "actionType": "UPDATE_LEAD", "parameters": { "field": "score", "value": 90 } }),
            ),
            action(
                "a-verify",
                json!({ "actionType": "HTTP_REQUEST", "serviceName": "Scorer", "endpoint": "/verify" }),
            ),
        ],
        vec![edge("t", "a-score"), edge("a-score", "a-verify")],
    ));
    let assignment = compile(workflow(
        "wf-assign",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            action(
                "a-owner",
                json!({ "actionType": "UPDATE_LEAD", "parameters": { "field": "owner", "value": "bob" } }),
            ),
        ],
        vec![edge("t", "a-owner")],
    ));

    let event = || lead_event(json!({ "lead": { "id": "L1" } }));
    let first = harness.engine.spawn(scoring, event()).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let second = harness.engine.spawn(assignment, event()).await;

    let first = first.join().await.unwrap();
    let second = second.join().await.unwrap();

    assert_eq!(first.status, RunStatus::RolledBack);
    assert_eq!(second.status, RunStatus::Committed);
    // The second run waited for the first to roll back, then wrote on top of the restored lead
    assert_eq!(
        harness.records.get("Lead", "L1").await.unwrap(),
        Some(json!({ "id": "L1", "score": 1, "owner": "bob" }))
    );
}

/// Service client that panics on every call
struct PanickingService;

#[async_trait]
impl ServiceClient for PanickingService {
    async fn call(
        &self,
        _service_name: &str,
        _endpoint: &str,
        _method: &str,
        _params: &Value,
        _timeout: Duration,
    ) -> Result<ServiceResponse, CallError> {
        panic!("service client bug")
    }
}

#[tokio::test]
async fn test_panicking_run_is_unregistered() {
    let dispatcher = ActionDispatcher::new(
        Collaborators {
            services: Arc::new(PanickingService),
            notifier: Arc::new(LogNotificationSender),
            records: Arc::new(MemoryRecordStore::new()),
        },
        DispatchSettings::default(),
    );
    let engine = ExecutionEngine::new(Arc::new(MemoryRepository::new()), dispatcher, Arc::new(NoopMetrics));
    let graph = compile(workflow(
        "wf-panic",
        "AUTO_ROLLBACK",
        vec![
            trigger("t"),
            action(
                "a-call",
                json!({ "actionType": "HTTP_REQUEST", "serviceName": "Broken", "endpoint": "/x" }),
            ),
        ],
        vec![edge("t", "a-call")],
    ));

    let handle = engine.spawn(graph, lead_event(json!({}))).await;
    assert!(handle.join().await.is_err());
    assert!(engine.active_runs().await.is_empty());
}
