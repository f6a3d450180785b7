/// Authored rule definitions
///
/// A rule names an operand/operator pair in its `definition` ("NUMBER.BETWEEN",
/// "COMMON.NULLISH.EXISTS") together with evaluation metadata. Condition nodes are built from
/// rules or written inline; both go through the same operator parser.

use crate::error::EngineError;
use crate::rules::literal::ValueType;
use crate::rules::operand::Operator;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleType {
    Evaluation,
    Validation,
    Authorization,
    User,
}

/// Log level a condition reports its outcome at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verbosity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub definition: String,
    #[serde(default)]
    pub verbosity: Verbosity,
    #[serde(default = "default_true")]
    pub should_gather_metrics: bool,
    #[serde(default = "default_true")]
    pub is_system_defined: bool,
    #[serde(default)]
    pub is_inverse: bool,
}

pub(crate) fn default_true() -> bool {
    true
}

impl Rule {
    pub fn new(rule_type: RuleType, definition: impl Into<String>) -> Self {
        Self {
            rule_type,
            description: None,
            definition: definition.into(),
            verbosity: Verbosity::default(),
            should_gather_metrics: true,
            is_system_defined: true,
            is_inverse: false,
        }
    }

    /// Resolve the definition to a registered operator
    pub fn operator(&self, value_type: ValueType) -> Result<Operator, EngineError> {
        Operator::parse(&self.definition, None, value_type)
    }

    /// Check the definition and that the operator accepts the supplied arguments
    pub fn validate(&self, value_type: ValueType, has_literal: bool) -> Result<Operator, EngineError> {
        let operator = self.operator(value_type)?;
        if !operator.arity().accepts(has_literal) {
            return Err(EngineError::invalid(format!(
                "rule '{}' has the wrong number of arguments for {}",
                self.definition, operator
            )));
        }
        Ok(operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::operand::{CommonOp, NumberOp};
    use serde_json::json;

    #[test]
    fn test_rule_defaults() {
        let rule: Rule = serde_json::from_value(json!({
            "type": "VALIDATION",
            "definition": "COMMON.NULLISH.EXISTS"
        }))
        .unwrap();

        assert_eq!(rule.verbosity, Verbosity::Info);
        assert!(rule.should_gather_metrics);
        assert!(rule.is_system_defined);
        assert!(!rule.is_inverse);
        assert_eq!(
            rule.operator(ValueType::String),
            Ok(Operator::Common(CommonOp::Exists))
        );
    }

    #[test]
    fn test_rule_arity_validation() {
        let between = Rule::new(RuleType::Evaluation, "NUMBER.BETWEEN");
        assert_eq!(
            between.validate(ValueType::Number, true),
            Ok(Operator::Number(NumberOp::Between))
        );
        assert!(between.validate(ValueType::Number, false).is_err());

        let unknown = Rule::new(RuleType::User, "NUMBER.SHOUTS");
        assert!(matches!(
            unknown.validate(ValueType::Number, true),
            Err(EngineError::UnknownOperator { .. })
        ));
    }
}
