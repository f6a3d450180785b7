/// Run record: status machine, visited-node trail and compensation journal
///
/// Created at run start and mutated only by the orchestrator. Persisted at start, after every
/// committed action step and at the terminal status.

use crate::error::EngineError;
use crate::runtime::dispatch::Reversal;
use crate::workflow::types::{ActionType, RollbackPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Committed,
    RolledBack,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Committed => "COMMITTED",
            RunStatus::RolledBack => "ROLLED_BACK",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Committed | RunStatus::RolledBack | RunStatus::Failed)
    }

    /// PENDING -> RUNNING -> {COMMITTED | ROLLED_BACK | FAILED}
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Committed)
                | (RunStatus::Running, RunStatus::RolledBack)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node outcome kept in the visited trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeOutcome {
    Triggered,
    Condition {
        satisfied: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ActionSucceeded,
    ActionFailed { error: String },
    Delayed { seconds: u64 },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitedNode {
    pub node_id: String,
    pub name: String,
    pub outcome: NodeOutcome,
    pub at: DateTime<Utc>,
}

/// Lifecycle of a journaled compensation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompensationState {
    /// Recorded before the action executed
    Pending,
    /// The action completed (or its outcome is unknown); eligible for rollback
    Armed,
    /// Reversal applied during rollback
    Applied,
    /// Reversal attempted and failed
    Failed,
    /// The action failed cleanly; nothing to undo
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationDescriptor {
    /// Position in the journal; rollback walks it backwards
    pub seq: u32,
    pub node_id: String,
    pub action_type: ActionType,
    pub reversal: Reversal,
    pub state: CompensationState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_version: u32,
    pub status: RunStatus,
    pub policy: RollbackPolicy,
    pub visited_nodes: Vec<VisitedNode>,
    pub compensations: Vec<CompensationDescriptor>,
    /// Condition-level diagnostics (coercion failures, unresolved paths)
    pub diagnostics: Vec<String>,
    /// Why the run did not commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Action failures recorded under CONTINUE_ON_ERROR
    pub errors: Vec<String>,
    /// Compensation failures left behind by a rollback
    pub residual_errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(run_id: Uuid, workflow_id: &str, workflow_version: u32, policy: RollbackPolicy) -> Self {
        Self {
            run_id,
            workflow_id: workflow_id.to_string(),
            workflow_version,
            status: RunStatus::Pending,
            policy,
            visited_nodes: Vec::new(),
            compensations: Vec::new(),
            diagnostics: Vec::new(),
            reason: None,
            errors: Vec::new(),
            residual_errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next`, rejecting illegal transitions (terminal states are final)
    pub fn transition(&mut self, next: RunStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::IllegalTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn visit(&mut self, node_id: &str, name: &str, outcome: NodeOutcome) {
        self.visited_nodes.push(VisitedNode {
            node_id: node_id.to_string(),
            name: name.to_string(),
            outcome,
            at: Utc::now(),
        });
    }

    /// Journal a reversal before its action runs; returns its sequence number
    pub fn journal(&mut self, node_id: &str, action_type: ActionType, reversal: Reversal) -> &CompensationDescriptor {
        let seq = self.compensations.len() as u32;
        self.compensations.push(CompensationDescriptor {
            seq,
            node_id: node_id.to_string(),
            action_type,
            reversal,
            state: CompensationState::Pending,
        });
        &self.compensations[seq as usize]
    }

    pub fn set_compensation_state(&mut self, seq: u32, state: CompensationState) {
        if let Some(descriptor) = self.compensations.get_mut(seq as usize) {
            descriptor.state = state;
        }
    }

    /// Node ids in visit order
    pub fn trail(&self) -> Vec<&str> {
        self.visited_nodes.iter().map(|visit| visit.node_id.as_str()).collect()
    }

    /// Compensations that ran during rollback, in the order they ran
    pub fn applied_compensations(&self) -> Vec<&CompensationDescriptor> {
        let mut applied: Vec<&CompensationDescriptor> = self
            .compensations
            .iter()
            .filter(|c| matches!(c.state, CompensationState::Applied | CompensationState::Failed))
            .collect();
        applied.reverse();
        applied
    }
}
