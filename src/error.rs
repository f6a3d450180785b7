/// Error taxonomy for the execution core
///
/// Domain failures are typed with `thiserror`; infrastructure code (storage, server bootstrap)
/// keeps using `anyhow` and only converts at the boundaries.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// A dotted field path that could not be walked to its end
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("unresolved path '{path}' (missing segment '{segment}')")]
pub struct UnresolvedPath {
    /// Full path that was requested, e.g. "apollo.company.id"
    pub path: String,
    /// First segment that was missing or not traversable
    pub segment: String,
}

impl UnresolvedPath {
    pub fn new(path: impl Into<String>, segment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            segment: segment.into(),
        }
    }
}

/// Errors raised while compiling or running a workflow
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Operand domain / operator pair is not registered
    #[error("unknown operator '{operator}' for operand domain '{domain}'")]
    UnknownOperator { domain: String, operator: String },

    /// Field path or parameter reference missing from the run context
    #[error(transparent)]
    UnresolvedPath(#[from] UnresolvedPath),

    /// A literal or subject could not be read as the type the operator needs
    #[error("type coercion failed: expected {expected}, found {found}")]
    TypeCoercion { expected: String, found: String },

    /// A condition produced an outcome no outgoing edge accepts
    #[error("no outgoing edge of '{node_id}' matches outcome '{outcome}'")]
    NoMatchingBranch { node_id: String, outcome: String },

    /// Retryable action failure that exhausted its retries
    #[error("action '{node_id}' failed after retries: {message}")]
    ActionTransient { node_id: String, message: String },

    /// Non-retryable action failure
    #[error("action '{node_id}' failed: {message}")]
    ActionPermanent { node_id: String, message: String },

    /// A reversal could not be applied during rollback
    #[error("compensation for '{node_id}' failed: {message}")]
    Compensation { node_id: String, message: String },

    /// Outbound call exceeded its deadline
    #[error("'{node_id}' timed out after {after:?}")]
    Timeout { node_id: String, after: Duration },

    /// A condition routed the run onto an ABORT edge
    #[error("run aborted by condition '{node_id}'")]
    Aborted { node_id: String },

    /// Run was cancelled between node visits
    #[error("run cancelled")]
    Cancelled,

    /// Structural problem detected while compiling a workflow definition
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// Run status state machine violation
    #[error("illegal run status transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

impl EngineError {
    pub fn coercion(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeCoercion {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidWorkflow(message.into())
    }

    /// Errors that originate from the graph shape rather than from a side effect
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NoMatchingBranch { .. } | Self::Aborted { .. } | Self::InvalidWorkflow(_)
        )
    }
}

/// Failure reported by an external collaborator (service client, notifier, record store)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
    /// No answer within the caller's deadline; the call may still have taken effect
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure of a single action dispatch, classified for retry and rollback decisions
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Unresolved(#[from] UnresolvedPath),
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
}

impl ActionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Attach the failing node and lift into the run-level taxonomy
    pub fn into_engine_error(self, node_id: &str) -> EngineError {
        let node_id = node_id.to_string();
        match self {
            Self::Transient(message) => EngineError::ActionTransient { node_id, message },
            Self::Permanent(message) => EngineError::ActionPermanent { node_id, message },
            Self::InvalidParameters(message) => EngineError::ActionPermanent {
                node_id,
                message: format!("invalid parameters: {}", message),
            },
            Self::Timeout(after) => EngineError::Timeout { node_id, after },
            Self::Unresolved(path) => EngineError::UnresolvedPath(path),
        }
    }
}

impl From<CallError> for ActionError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Transient(message) => Self::Transient(message),
            CallError::Permanent(message) => Self::Permanent(message),
            CallError::Timeout(after) => Self::Timeout(after),
        }
    }
}
