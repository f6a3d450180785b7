#![allow(dead_code)]

use async_trait::async_trait;
use flowgate::error::CallError;
use flowgate::runtime::clients::{NotificationSender, ServiceClient, ServiceResponse};
use flowgate::runtime::dispatch::{ActionDispatcher, Collaborators, DispatchSettings};
use flowgate::runtime::metrics::MetricsSink;
use flowgate::runtime::records::{MemoryRecordStore, RecordStore};
use flowgate::workflow::storage::MemoryRepository;
use flowgate::workflow::types::RetryPolicy;
use flowgate::{ExecutionEngine, Workflow, WorkflowGraph};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TENANT: &str = "tenant_123";

/// One recorded outbound call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub service_name: String,
    pub endpoint: String,
    pub method: String,
    pub params: Value,
    pub timeout: Duration,
}

/// Service client answering from per-service scripts; unscripted services answer `{}`
#[derive(Default)]
pub struct ScriptedServiceClient {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, CallError>>>>,
    latency: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedServiceClient {
    pub fn respond(&self, service_name: &str, response: Result<Value, CallError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(service_name.to_string())
            .or_default()
            .push_back(response);
    }

    /// Every call to `service_name` takes `latency` before answering
    pub fn slow(&self, service_name: &str, latency: Duration) {
        self.latency
            .lock()
            .unwrap()
            .insert(service_name.to_string(), latency);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, service_name: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.service_name == service_name)
            .collect()
    }
}

#[async_trait]
impl ServiceClient for ScriptedServiceClient {
    async fn call(
        &self,
        service_name: &str,
        endpoint: &str,
        method: &str,
        params: &Value,
        timeout: Duration,
    ) -> Result<ServiceResponse, CallError> {
        self.calls.lock().unwrap().push(Call {
            service_name: service_name.to_string(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            params: params.clone(),
            timeout,
        });

        let latency = self.latency.lock().unwrap().get(service_name).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(service_name)
            .and_then(VecDeque::pop_front);
        let body = scripted.unwrap_or_else(|| Ok(json!({})))?;
        Ok(ServiceResponse { status: 200, body })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Value)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotifier {
    async fn send(&self, template_id: &str, params: &Value, _timeout: Duration) -> Result<Value, CallError> {
        self.sent
            .lock()
            .unwrap()
            .push((template_id.to_string(), params.clone()));
        Ok(json!({ "delivered": true }))
    }
}

#[derive(Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl RecordingMetrics {
    pub fn events(&self, name: &str) -> Vec<Vec<(String, String)>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, tags)| tags.clone())
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record(&self, event: &str, tags: &[(&str, String)], _duration_ms: f64) {
        let tags = tags.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        self.events.lock().unwrap().push((event.to_string(), tags));
    }
}

/// Engine wired to in-memory collaborators
pub struct Harness {
    pub repository: Arc<MemoryRepository>,
    pub records: Arc<MemoryRecordStore>,
    pub services: Arc<ScriptedServiceClient>,
    pub notifier: Arc<RecordingNotifier>,
    pub metrics: Arc<RecordingMetrics>,
    pub engine: ExecutionEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_records(|records| records as Arc<dyn RecordStore>)
    }

    /// Wrap the in-memory record store before handing it to the dispatcher
    pub fn with_records(wrap: impl FnOnce(Arc<MemoryRecordStore>) -> Arc<dyn RecordStore>) -> Self {
        let repository = Arc::new(MemoryRepository::new());
        let records = Arc::new(MemoryRecordStore::new());
        let services = Arc::new(ScriptedServiceClient::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let metrics = Arc::new(RecordingMetrics::default());

        let dispatcher = ActionDispatcher::new(
            Collaborators {
                services: services.clone(),
                notifier: notifier.clone(),
                records: wrap(records.clone()),
            },
            DispatchSettings {
                default_timeout: Duration::from_secs(5),
                default_retry: RetryPolicy {
                    max_attempts: 3,
                    initial_backoff_ms: 1,
                    ..RetryPolicy::default()
                },
            },
        );
        let engine = ExecutionEngine::new(repository.clone(), dispatcher, metrics.clone());

        Self {
            repository,
            records,
            services,
            notifier,
            metrics,
            engine,
        }
    }
}

pub fn trigger(id: &str) -> Value {
    json!({
        "id": id, "name": id, "tenantId": TENANT, "kind": "TRIGGER",
        "triggerType": "STREAM_EVENT", "topic": "leads-topic", "eventType": "lead.record.created.success"
    })
}

pub fn condition(id: &str, field_path: &str, operator: &str, value: Option<Value>, value_type: &str) -> Value {
    let mut node = json!({
        "id": id, "name": id, "tenantId": TENANT, "kind": "CONDITION",
        "fieldPath": field_path, "operator": operator, "valueType": value_type
    });
    if let Some(value) = value {
        node["value"] = value;
    }
    node
}

/// Action node; `body` carries actionType, parameters and the rest
pub fn action(id: &str, body: Value) -> Value {
    let mut node = json!({ "id": id, "name": id, "tenantId": TENANT, "kind": "ACTION" });
    if let (Some(node), Value::Object(body)) = (node.as_object_mut(), body) {
        node.extend(body);
    }
    node
}

pub fn delay(id: &str, seconds: u64) -> Value {
    json!({
        "id": id, "name": id, "tenantId": TENANT, "kind": "DELAY",
        "delayType": "FIXED", "delaySeconds": seconds
    })
}

pub fn create_lead(id: &str, lead_id: &str) -> Value {
    action(
        id,
        json!({
            "actionType": "DATA_UPDATE",
            "parameters": { "operation": "create", "entity": "Lead", "data": { "id": lead_id } }
        }),
    )
}

pub fn edge(from: &str, to: &str) -> Value {
    json!({ "from": from, "to": to, "tenantId": TENANT })
}

pub fn branch(from: &str, to: &str, tag: &str) -> Value {
    json!({ "from": from, "to": to, "branch": tag, "tenantId": TENANT })
}

pub fn workflow(id: &str, policy: &str, nodes: Vec<Value>, edges: Vec<Value>) -> Workflow {
    serde_json::from_value(json!({
        "id": id,
        "name": id,
        "tenantId": TENANT,
        "version": 1,
        "status": "ACTIVE",
        "rollbackPolicy": policy,
        "nodes": nodes,
        "edges": edges
    }))
    .unwrap()
}

pub fn compile(workflow: Workflow) -> Arc<WorkflowGraph> {
    Arc::new(WorkflowGraph::compile(workflow).unwrap())
}

pub fn lead_event(payload: Value) -> flowgate::TriggerEvent {
    flowgate::TriggerEvent::new("leads-topic", "lead.record.created.success", payload)
}
