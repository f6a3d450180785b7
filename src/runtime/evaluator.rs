/// Condition evaluator
///
/// Resolves a condition's field path against the run context, coerces its literal, applies the
/// operator and inverts when asked. Failures never escape as errors: they come back as
/// `satisfied = false` with the error attached, and an error is never inverted. Evaluation
/// reads the context only, so repeating it gives the same result.

use crate::error::EngineError;
use crate::rules::apply::apply;
use crate::rules::literal::coerce;
use crate::rules::operand::Operator;
use crate::rules::rule::Verbosity;
use crate::runtime::metrics::MetricsSink;
use crate::workflow::context::RunContext;
use crate::workflow::types::ConditionNode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub satisfied: bool,
    /// Subject the field path resolved to (absent for unresolved paths)
    pub resolved_value: Option<Value>,
    pub error: Option<EngineError>,
}

impl Evaluation {
    fn decided(resolved_value: Option<Value>, result: bool, is_inverse: bool) -> Self {
        Self {
            satisfied: if is_inverse { !result } else { result },
            resolved_value,
            error: None,
        }
    }

    fn failed(resolved_value: Option<Value>, error: EngineError) -> Self {
        Self {
            satisfied: false,
            resolved_value,
            error: Some(error),
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match (&self.error, self.satisfied) {
            (Some(_), _) => "error",
            (None, true) => "true",
            (None, false) => "false",
        }
    }
}

pub struct ConditionEvaluator {
    metrics: Arc<dyn MetricsSink>,
}

impl ConditionEvaluator {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }

    /// Evaluate an inline condition, parsing its operator first
    pub fn evaluate(&self, condition: &ConditionNode, context: &RunContext) -> Evaluation {
        match Operator::parse(&condition.operator, condition.operand, condition.value_type) {
            Ok(operator) => self.evaluate_with(&condition.field_path, operator, condition, context),
            Err(error) => {
                let evaluation = Evaluation::failed(None, error);
                log_outcome(condition.verbosity, &condition.field_path, &condition.operator, &evaluation);
                evaluation
            }
        }
    }

    /// Evaluate with an operator resolved at compile time
    pub fn evaluate_with(
        &self,
        node_id: &str,
        operator: Operator,
        condition: &ConditionNode,
        context: &RunContext,
    ) -> Evaluation {
        let started = Instant::now();
        let evaluation = outcome(operator, condition, context);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        log_outcome(condition.verbosity, node_id, &operator.to_string(), &evaluation);

        if condition.should_gather_metrics {
            self.metrics.record(
                "condition.evaluated",
                &[
                    ("node", node_id.to_string()),
                    ("operator", operator.to_string()),
                    ("outcome", evaluation.outcome_label().to_string()),
                ],
                elapsed_ms,
            );
        }

        evaluation
    }
}

fn outcome(operator: Operator, condition: &ConditionNode, context: &RunContext) -> Evaluation {
    let subject = match context.resolve(&condition.field_path) {
        Ok(subject) => subject,
        Err(unresolved) => {
            return match operator.unresolved_outcome() {
                Some(result) => Evaluation::decided(None, result, condition.is_inverse),
                None => Evaluation::failed(None, unresolved.into()),
            };
        }
    };

    // Nested predicates carry their own value types
    let literal = match &condition.value {
        Some(value) if operator.takes_predicate() => Some(value.clone()),
        Some(value) => match coerce(value, condition.value_type) {
            Ok(coerced) => Some(coerced),
            Err(error) => return Evaluation::failed(Some(subject.clone()), error),
        },
        None => None,
    };

    match apply(operator, subject, literal.as_ref()) {
        Ok(result) => Evaluation::decided(Some(subject.clone()), result, condition.is_inverse),
        Err(error) => Evaluation::failed(Some(subject.clone()), error),
    }
}

fn log_outcome(verbosity: Verbosity, node_id: &str, operator: &str, evaluation: &Evaluation) {
    let outcome = evaluation.outcome_label();
    let error = evaluation
        .error
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();

    match verbosity {
        Verbosity::Trace => tracing::trace!("🔍 Condition '{}' {} -> {} {}", node_id, operator, outcome, error),
        Verbosity::Debug => tracing::debug!("🔍 Condition '{}' {} -> {} {}", node_id, operator, outcome, error),
        Verbosity::Info => tracing::info!("🔍 Condition '{}' {} -> {} {}", node_id, operator, outcome, error),
        Verbosity::Warn => tracing::warn!("🔍 Condition '{}' {} -> {} {}", node_id, operator, outcome, error),
        Verbosity::Error => tracing::error!("🔍 Condition '{}' {} -> {} {}", node_id, operator, outcome, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::literal::ValueType;
    use crate::runtime::metrics::NoopMetrics;
    use crate::workflow::types::TriggerEvent;
    use serde_json::json;

    fn evaluator() -> ConditionEvaluator {
        ConditionEvaluator::new(Arc::new(NoopMetrics))
    }

    fn context() -> RunContext {
        RunContext::from_event(&TriggerEvent::new(
            "leads-topic",
            "lead.record.created.success",
            json!({"lead": {"id": "L1", "score": 72, "isDuplicate": false}}),
        ))
    }

    #[test]
    fn test_exists_class_on_unresolved_path() {
        let evaluator = evaluator();
        let context = context();

        let exists = ConditionNode::new("apollo.company.id", "EXISTS");
        let evaluation = evaluator.evaluate(&exists, &context);
        assert!(!evaluation.satisfied);
        assert!(evaluation.error.is_none());

        let undefined = ConditionNode::new("apollo.company.id", "IS_UNDEFINED");
        assert!(evaluator.evaluate(&undefined, &context).satisfied);
    }

    #[test]
    fn test_unresolved_path_is_an_error_for_other_operators() {
        let condition = ConditionNode::new("data.lead.age", "GREATER_THAN")
            .with_value(json!(18), ValueType::Number);
        let evaluation = evaluator().evaluate(&condition, &context());
        assert!(!evaluation.satisfied);
        assert!(matches!(evaluation.error, Some(EngineError::UnresolvedPath(_))));
    }

    #[test]
    fn test_boolean_equality_with_string_literal() {
        let condition = ConditionNode::new("data.lead.isDuplicate", "EQUALS")
            .with_value(json!("false"), ValueType::Boolean);
        let evaluation = evaluator().evaluate(&condition, &context());
        assert!(evaluation.satisfied);
        assert_eq!(evaluation.resolved_value, Some(json!(false)));
    }

    #[test]
    fn test_errors_are_not_inverted() {
        let mut condition = ConditionNode::new("data.lead.score", "BETWEEN")
            .with_value(json!({"min": "low", "max": 100}), ValueType::Number);
        condition.is_inverse = true;
        let evaluation = evaluator().evaluate(&condition, &context());
        assert!(!evaluation.satisfied);
        assert!(matches!(evaluation.error, Some(EngineError::TypeCoercion { .. })));
    }
}
