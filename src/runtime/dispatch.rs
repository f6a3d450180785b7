/// Action dispatch
///
/// Maps an action node's declared type onto a concrete side effect. Dispatch happens in two
/// steps so the orchestrator can journal the reversal before anything irreversible happens:
///
/// 1. [`ActionDispatcher::prepare`] resolves `$` parameter references against the run context,
///    locks the target record to the run's [`RecordLease`], reads the snapshot a reversal
///    needs and allocates ids for records about to be created.
/// 2. [`ActionDispatcher::execute`] performs the effect under a timeout, retrying transient
///    failures with exponential backoff.
///
/// Parameter expressions: `"$data.lead.email"` is a context reference, `"$now"` the current
/// time, `"$$..."` a literal string starting with `$`. Objects and arrays are resolved
/// recursively; every reference must resolve.

use crate::error::{ActionError, CallError, UnresolvedPath};
use crate::runtime::clients::{NotificationSender, ServiceClient};
use crate::runtime::records::{RecordLease, RecordLocks, RecordStore};
use crate::workflow::context::{deep_merge, RunContext};
use crate::workflow::types::{ActionNode, ActionType, RetryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const LEAD: &str = "Lead";
const COMPANY: &str = "Company";

/// External systems actions talk to
#[derive(Clone)]
pub struct Collaborators {
    pub services: Arc<dyn ServiceClient>,
    pub notifier: Arc<dyn NotificationSender>,
    pub records: Arc<dyn RecordStore>,
}

/// Engine-wide defaults for nodes that do not set their own
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub default_timeout: Duration,
    pub default_retry: RetryPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_retry: RetryPolicy::default(),
        }
    }
}

/// How to undo a completed record mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reversal {
    /// Undo a create
    DeleteRecord { entity: String, id: String },
    /// Put back the snapshot taken before the action; `None` means the record did not exist
    RestoreRecord {
        entity: String,
        id: String,
        previous: Option<Value>,
    },
}

/// Side effect an action resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PutRecord { entity: String, id: String, record: Value },
    DeleteRecord { entity: String, id: String },
    Call { service_name: String, endpoint: String, method: String },
    Notify { template_id: String },
}

#[derive(Debug, Clone)]
pub struct PreparedAction {
    pub node_id: String,
    pub action_type: ActionType,
    /// Parameters with every reference resolved
    pub parameters: Value,
    pub effect: Effect,
    pub compensation: Option<Reversal>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub idempotent: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub output: Value,
    pub attempts: u32,
}

pub struct ActionDispatcher {
    collaborators: Collaborators,
    settings: DispatchSettings,
    locks: Arc<RecordLocks>,
}

impl ActionDispatcher {
    pub fn new(collaborators: Collaborators, settings: DispatchSettings) -> Self {
        Self {
            collaborators,
            settings,
            locks: Arc::new(RecordLocks::new()),
        }
    }

    /// Record lease for one run; hold it until the run is finalized
    pub fn lease(&self) -> RecordLease {
        self.locks.lease()
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Resolve parameters and build the effect together with its reversal
    ///
    /// Records the action touches are locked to `lease` before their snapshot is read.
    pub async fn prepare(
        &self,
        node_id: &str,
        action: &ActionNode,
        context: &RunContext,
        lease: &RecordLease,
    ) -> Result<PreparedAction, ActionError> {
        let parameters = resolve_parameters(&action.parameters, context)?;
        let timeout = action
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.settings.default_timeout);
        let scope = Scope { lease, wait: timeout };

        let (effect, compensation) = match action.action_type {
            ActionType::DataUpdate => self.prepare_data_update(&parameters, &scope).await?,
            ActionType::UpdateLead => self.prepare_update_lead(&parameters, context, &scope).await?,
            ActionType::AssignToUser => self.prepare_assignment(&parameters, context, &scope).await?,
            ActionType::CreateCompany => self.prepare_create(COMPANY, &parameters, &scope).await?,
            ActionType::CustomFunction | ActionType::HttpRequest => (
                Effect::Call {
                    service_name: required_field(action.service_name.as_deref(), "serviceName")?,
                    endpoint: required_field(action.endpoint.as_deref(), "endpoint")?,
                    method: action.method.clone().unwrap_or_else(|| "POST".to_string()),
                },
                None,
            ),
            ActionType::NotificationSend => (
                Effect::Notify {
                    template_id: required_field(action.template_id.as_deref(), "templateId")?,
                },
                None,
            ),
        };

        Ok(PreparedAction {
            node_id: node_id.to_string(),
            action_type: action.action_type,
            parameters,
            effect,
            compensation,
            timeout,
            retry: action
                .retry
                .clone()
                .unwrap_or_else(|| self.settings.default_retry.clone()),
            idempotent: action.idempotent,
        })
    }

    /// Perform the effect with timeout and bounded retries
    ///
    /// `Transient` failures are retried; so are timeouts of idempotent actions. Everything
    /// else fails on the first attempt.
    pub async fn execute(&self, prepared: &PreparedAction) -> Result<ActionOutcome, ActionError> {
        let max_attempts = prepared.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(prepared.timeout, self.perform(prepared)).await {
                Ok(result) => result,
                Err(_) => Err(ActionError::Timeout(prepared.timeout)),
            };

            match result {
                Ok(output) => {
                    return Ok(ActionOutcome {
                        output,
                        attempts: attempt,
                    })
                }
                Err(error) if attempt < max_attempts && retryable(&error, prepared.idempotent) => {
                    let delay = prepared.retry.backoff(attempt);
                    tracing::warn!(
                        "🔁 Action '{}' attempt {}/{} failed: {} (retrying in {:?})",
                        prepared.node_id,
                        attempt,
                        max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// `prepare` followed by `execute` under a lease of its own
    pub async fn dispatch(
        &self,
        node_id: &str,
        action: &ActionNode,
        context: &RunContext,
    ) -> Result<ActionOutcome, ActionError> {
        let lease = self.lease();
        let prepared = self.prepare(node_id, action, context, &lease).await?;
        self.execute(&prepared).await
    }

    /// Apply a journaled reversal
    pub async fn compensate(&self, reversal: &Reversal) -> Result<(), CallError> {
        let records = &self.collaborators.records;
        let undo = async {
            match reversal {
                Reversal::DeleteRecord { entity, id }
                | Reversal::RestoreRecord {
                    entity,
                    id,
                    previous: None,
                } => records.delete(entity, id).await.map(|_| ()),
                Reversal::RestoreRecord {
                    entity,
                    id,
                    previous: Some(previous),
                } => records.put(entity, id, previous).await,
            }
        };

        match tokio::time::timeout(self.settings.default_timeout, undo).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout(self.settings.default_timeout)),
        }
    }

    async fn perform(&self, prepared: &PreparedAction) -> Result<Value, ActionError> {
        match &prepared.effect {
            Effect::PutRecord { entity, id, record } => {
                self.collaborators.records.put(entity, id, record).await?;
                Ok(json!({ "entity": entity, "id": id, "record": record }))
            }
            Effect::DeleteRecord { entity, id } => {
                let deleted = self.collaborators.records.delete(entity, id).await?;
                Ok(json!({ "entity": entity, "id": id, "deleted": deleted }))
            }
            Effect::Call {
                service_name,
                endpoint,
                method,
            } => {
                let response = self
                    .collaborators
                    .services
                    .call(service_name, endpoint, method, &prepared.parameters, prepared.timeout)
                    .await?;
                Ok(response.body)
            }
            Effect::Notify { template_id } => Ok(self
                .collaborators
                .notifier
                .send(template_id, &prepared.parameters, prepared.timeout)
                .await?),
        }
    }

    /// DATA_UPDATE: `operation` = create | update | merge | delete on `entity`
    async fn prepare_data_update(
        &self,
        parameters: &Value,
        scope: &Scope<'_>,
    ) -> Result<(Effect, Option<Reversal>), ActionError> {
        let operation = string_param(parameters, "operation")?;
        let entity = string_param(parameters, "entity")?;

        match operation.as_str() {
            "create" => self.prepare_create(&entity, parameters, scope).await,
            "update" | "merge" => {
                let id = target_id(parameters)?;
                let previous = self.snapshot(scope, &entity, &id).await?;
                let current = previous
                    .clone()
                    .ok_or_else(|| ActionError::Permanent(format!("{} '{}' not found", entity, id)))?;
                let patch = parameters
                    .get("data")
                    .filter(|data| data.is_object())
                    .ok_or_else(|| ActionError::InvalidParameters("'data' must be an object".into()))?;

                let mut record = current;
                if operation == "merge" {
                    deep_merge(&mut record, patch);
                } else {
                    shallow_patch(&mut record, patch);
                }
                Ok((
                    Effect::PutRecord {
                        entity: entity.clone(),
                        id: id.clone(),
                        record,
                    },
                    Some(Reversal::RestoreRecord { entity, id, previous }),
                ))
            }
            "delete" => {
                let id = target_id(parameters)?;
                let previous = self.snapshot(scope, &entity, &id).await?;
                if previous.is_none() {
                    return Err(ActionError::Permanent(format!("{} '{}' not found", entity, id)));
                }
                Ok((
                    Effect::DeleteRecord {
                        entity: entity.clone(),
                        id: id.clone(),
                    },
                    Some(Reversal::RestoreRecord { entity, id, previous }),
                ))
            }
            other => Err(ActionError::InvalidParameters(format!(
                "unknown DATA_UPDATE operation '{}'",
                other
            ))),
        }
    }

    /// UPDATE_LEAD: set `field` = `value` on the lead
    async fn prepare_update_lead(
        &self,
        parameters: &Value,
        context: &RunContext,
        scope: &Scope<'_>,
    ) -> Result<(Effect, Option<Reversal>), ActionError> {
        let field = string_param(parameters, "field")?;
        let value = parameters
            .get("value")
            .cloned()
            .ok_or_else(|| ActionError::InvalidParameters("missing 'value'".into()))?;

        self.patch_lead(parameters, context, scope, [(field, value)]).await
    }

    /// ASSIGN_TO_USER: route the lead to `queue` and/or `user`
    async fn prepare_assignment(
        &self,
        parameters: &Value,
        context: &RunContext,
        scope: &Scope<'_>,
    ) -> Result<(Effect, Option<Reversal>), ActionError> {
        let mut fields = Vec::new();
        if let Some(queue) = parameters.get("queue") {
            fields.push(("assignedQueue".to_string(), queue.clone()));
        }
        if let Some(user) = parameters.get("user") {
            fields.push(("assignedUser".to_string(), user.clone()));
        }
        if fields.is_empty() {
            return Err(ActionError::InvalidParameters(
                "ASSIGN_TO_USER needs 'queue' or 'user'".into(),
            ));
        }

        self.patch_lead(parameters, context, scope, fields).await
    }

    async fn patch_lead(
        &self,
        parameters: &Value,
        context: &RunContext,
        scope: &Scope<'_>,
        fields: impl IntoIterator<Item = (String, Value)> + Send,
    ) -> Result<(Effect, Option<Reversal>), ActionError> {
        let lead_id = match parameters.get("leadId") {
            Some(id) => id_string(id)?,
            None => id_string(context.resolve("data.lead.id")?)?,
        };

        let previous = self.snapshot(scope, LEAD, &lead_id).await?;
        let mut record = previous.clone().unwrap_or_else(|| json!({ "id": lead_id }));
        if let Value::Object(map) = &mut record {
            map.extend(fields);
        }

        Ok((
            Effect::PutRecord {
                entity: LEAD.to_string(),
                id: lead_id.clone(),
                record,
            },
            Some(Reversal::RestoreRecord {
                entity: LEAD.to_string(),
                id: lead_id,
                previous,
            }),
        ))
    }

    /// Record creation with the id allocated up front, so the reversal is known before executing
    ///
    /// Creating over an existing id replaces that record; the reversal then restores it
    /// instead of deleting it.
    async fn prepare_create(
        &self,
        entity: &str,
        parameters: &Value,
        scope: &Scope<'_>,
    ) -> Result<(Effect, Option<Reversal>), ActionError> {
        let mut record = parameters
            .get("data")
            .cloned()
            .ok_or_else(|| ActionError::InvalidParameters("missing 'data'".into()))?;
        let Value::Object(fields) = &mut record else {
            return Err(ActionError::InvalidParameters("'data' must be an object".into()));
        };

        let id = match parameters.get("id").or_else(|| fields.get("id")) {
            Some(id) => id_string(id)?,
            None => Uuid::new_v4().to_string(),
        };
        fields.insert("id".to_string(), Value::String(id.clone()));

        let reversal = match self.snapshot(scope, entity, &id).await? {
            None => Reversal::DeleteRecord {
                entity: entity.to_string(),
                id: id.clone(),
            },
            Some(previous) => {
                tracing::warn!("⚠️ Create of {} '{}' replaces an existing record", entity, id);
                Reversal::RestoreRecord {
                    entity: entity.to_string(),
                    id: id.clone(),
                    previous: Some(previous),
                }
            }
        };

        Ok((
            Effect::PutRecord {
                entity: entity.to_string(),
                id,
                record,
            },
            Some(reversal),
        ))
    }

    /// Lock the record to the run, then read it
    async fn snapshot(&self, scope: &Scope<'_>, entity: &str, id: &str) -> Result<Option<Value>, ActionError> {
        scope.lease.acquire(entity, id, scope.wait).await?;
        Ok(self.collaborators.records.get(entity, id).await?)
    }
}

/// Lease and lock wait of the action being prepared
struct Scope<'a> {
    lease: &'a RecordLease,
    wait: Duration,
}

fn retryable(error: &ActionError, idempotent: bool) -> bool {
    error.is_transient() || (idempotent && error.is_timeout())
}

/// Resolve `$` references in an action's parameters
pub fn resolve_parameters(parameters: &Map<String, Value>, context: &RunContext) -> Result<Value, UnresolvedPath> {
    let mut resolved = Map::with_capacity(parameters.len());
    for (name, value) in parameters {
        resolved.insert(name.clone(), resolve_value(value, context)?);
    }
    Ok(Value::Object(resolved))
}

fn resolve_value(value: &Value, context: &RunContext) -> Result<Value, UnresolvedPath> {
    match value {
        Value::String(text) => {
            if let Some(escaped) = text.strip_prefix("$$") {
                Ok(Value::String(format!("${}", escaped)))
            } else if text == "$now" {
                Ok(Value::String(chrono::Utc::now().to_rfc3339()))
            } else if let Some(path) = text.strip_prefix('$') {
                context.resolve(path).cloned()
            } else {
                Ok(value.clone())
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_parameters(map, context),
        other => Ok(other.clone()),
    }
}

fn string_param(parameters: &Value, name: &str) -> Result<String, ActionError> {
    parameters
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ActionError::InvalidParameters(format!("missing string '{}'", name)))
}

fn required_field(value: Option<&str>, name: &str) -> Result<String, ActionError> {
    value
        .map(str::to_string)
        .ok_or_else(|| ActionError::InvalidParameters(format!("missing '{}'", name)))
}

fn target_id(parameters: &Value) -> Result<String, ActionError> {
    parameters
        .get("id")
        .or_else(|| parameters.get("targetId"))
        .ok_or_else(|| ActionError::InvalidParameters("missing 'id' or 'targetId'".into()))
        .and_then(id_string)
}

/// Ids may be strings or integers
fn id_string(value: &Value) -> Result<String, ActionError> {
    match value {
        Value::String(id) if !id.is_empty() => Ok(id.clone()),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(ActionError::InvalidParameters(format!("invalid record id {}", other))),
    }
}

fn shallow_patch(record: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(source)) = (record, patch) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
}
