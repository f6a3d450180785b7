/// Core workflow type definitions
///
/// Workflows are authored as JSON, stored as JSON in SQLite and compiled into petgraph DAGs
/// for execution. Field names follow the camelCase wire format; enum values are SCREAMING_SNAKE.

use crate::rules::literal::ValueType;
use crate::rules::operand::OperandDomain;
use crate::rules::rule::{default_true, Rule, Verbosity};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A complete workflow definition containing nodes and their connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-lead-processing")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub status: WorkflowStatus,
    /// Owning tenant; every node and edge must carry the same id
    pub tenant_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Selected once per run, at run start
    #[serde(default)]
    pub rollback_policy: RollbackPolicy,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

fn default_version() -> u32 {
    1
}

/// Only ACTIVE workflows are started by events and schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Active,
    Inactive,
}

/// What happens to completed side effects when an action fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackPolicy {
    /// Compensate every completed compensable action in reverse order
    #[default]
    AutoRollback,
    /// Record the failure, keep walking, finish FAILED without compensating
    ContinueOnError,
}

/// A single node in the workflow DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "c-email-valid")
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub tenant_id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Node behavior, tagged by `kind` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    /// Single entry point of the graph
    Trigger(TriggerNode),
    /// Typed predicate over the run context, routes on its outcome
    Condition(ConditionNode),
    /// Side effect (record mutation, service call, notification)
    Action(ActionNode),
    /// Suspends the run for a fixed time
    Delay(DelayNode),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Trigger(_) => "TRIGGER",
            NodeKind::Condition(_) => "CONDITION",
            NodeKind::Action(_) => "ACTION",
            NodeKind::Delay(_) => "DELAY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// Message on an event stream, matched by topic and event type
    #[serde(alias = "KAFKA_EVENT")]
    StreamEvent,
    /// Cron schedule, e.g. "0 */5 * * * *"
    Cron,
    /// Started explicitly through the API
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerNode {
    pub trigger_type: TriggerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub configuration: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionNode {
    /// Dotted path into the run context, e.g. "data.lead.email"
    pub field_path: String,
    /// Operator expression: "EXISTS", "NUMBER.BETWEEN", "COMMON.NULLISH.IS_NULL"
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operand: Option<OperandDomain>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub is_inverse: bool,
    #[serde(default = "default_true")]
    pub should_gather_metrics: bool,
    #[serde(default)]
    pub verbosity: Verbosity,
}

impl ConditionNode {
    /// Inline condition with default metadata
    pub fn new(field_path: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            operator: operator.into(),
            operand: None,
            value: None,
            value_type: ValueType::default(),
            is_inverse: false,
            should_gather_metrics: true,
            verbosity: Verbosity::default(),
        }
    }

    pub fn with_value(mut self, value: Value, value_type: ValueType) -> Self {
        self.value = Some(value);
        self.value_type = value_type;
        self
    }

    /// Condition that applies an authored rule to a context field
    pub fn from_rule(rule: &Rule, field_path: impl Into<String>, value: Option<Value>, value_type: ValueType) -> Self {
        Self {
            field_path: field_path.into(),
            operator: rule.definition.clone(),
            operand: None,
            value,
            value_type,
            is_inverse: rule.is_inverse,
            should_gather_metrics: rule.should_gather_metrics,
            verbosity: rule.verbosity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Record mutation, `operation` = create | update | merge | delete
    DataUpdate,
    /// Set `field` = `value` on a lead
    UpdateLead,
    /// Remote service call
    CustomFunction,
    /// Remote service call
    HttpRequest,
    /// Templated notification
    NotificationSend,
    /// Route a lead to a queue or user
    AssignToUser,
    /// Create a Company record
    CreateCompany,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::DataUpdate => "DATA_UPDATE",
            ActionType::UpdateLead => "UPDATE_LEAD",
            ActionType::CustomFunction => "CUSTOM_FUNCTION",
            ActionType::HttpRequest => "HTTP_REQUEST",
            ActionType::NotificationSend => "NOTIFICATION_SEND",
            ActionType::AssignToUser => "ASSIGN_TO_USER",
            ActionType::CreateCompany => "CREATE_COMPANY",
        }
    }

    /// Record-mutating handlers can be reversed
    pub fn compensable(&self) -> bool {
        matches!(
            self,
            ActionType::DataUpdate
                | ActionType::UpdateLead
                | ActionType::AssignToUser
                | ActionType::CreateCompany
        )
    }

    /// Handlers that go through the service client
    pub fn is_remote(&self) -> bool {
        matches!(self, ActionType::CustomFunction | ActionType::HttpRequest)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionNode {
    pub action_type: ActionType,
    /// Literal values or `$`-prefixed context references
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// Context namespace the action's output is merged under (e.g. "apollo")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Safe to repeat after a timeout
    #[serde(default)]
    pub idempotent: bool,
}

impl ActionNode {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            parameters: Map::new(),
            service_name: None,
            endpoint: None,
            method: None,
            template_id: None,
            output: None,
            retry: None,
            timeout_seconds: None,
            idempotent: false,
        }
    }
}

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            initial_backoff_ms: default_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempts counted from 1)
    pub fn backoff(&self, attempt: u32) -> std::time::Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = (self.initial_backoff_ms as f64) * self.multiplier.powi(exponent);
        std::time::Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelayType {
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayNode {
    pub delay_type: DelayType,
    pub delay_seconds: u64,
}

/// Connection between two nodes, optionally labeled for condition routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    /// Source node ID
    pub from: String,
    /// Target node ID
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchTag>,
    pub tenant_id: String,
}

/// Label on a condition's outgoing edge
///
/// The four fixed tags match case-insensitively; anything else is a named tag compared
/// case-sensitively against the condition's resolved value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BranchTag {
    True,
    False,
    Default,
    Abort,
    Named(String),
}

impl From<String> for BranchTag {
    fn from(tag: String) -> Self {
        match tag.to_ascii_uppercase().as_str() {
            "TRUE" => BranchTag::True,
            "FALSE" => BranchTag::False,
            "DEFAULT" => BranchTag::Default,
            "ABORT" => BranchTag::Abort,
            _ => BranchTag::Named(tag),
        }
    }
}

impl From<&str> for BranchTag {
    fn from(tag: &str) -> Self {
        BranchTag::from(tag.to_string())
    }
}

impl From<BranchTag> for String {
    fn from(tag: BranchTag) -> Self {
        tag.to_string()
    }
}

impl fmt::Display for BranchTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchTag::True => f.write_str("TRUE"),
            BranchTag::False => f.write_str("FALSE"),
            BranchTag::Default => f.write_str("DEFAULT"),
            BranchTag::Abort => f.write_str("ABORT"),
            BranchTag::Named(name) => f.write_str(name),
        }
    }
}

/// Event that starts a run; the payload becomes the `data` namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    pub topic: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl TriggerEvent {
    pub fn new(topic: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            event_type: event_type.into(),
            payload,
        }
    }

    /// Synthetic event for a scheduled run
    pub fn from_cron(workflow_id: &str, schedule: &str) -> Self {
        Self::new(
            "cron",
            schedule,
            serde_json::json!({
                "triggerType": "CRON",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "workflowId": workflow_id,
            }),
        )
    }

    /// Synthetic event for a run started through the API
    pub fn manual(workflow_id: &str, payload: Value) -> Self {
        Self::new("manual", workflow_id, payload)
    }
}
