/// Operand domains and the operators legal on each of them
///
/// The taxonomy is closed: every (domain, operator) pair is an enum variant, so once a
/// definition string has been parsed into an [`Operator`] the dispatch in `apply` is a total
/// `match`. `UnknownOperator` can only come out of [`Operator::parse`], which the registry calls
/// when a workflow is saved.

use crate::error::EngineError;
use crate::rules::literal::ValueType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Generates a closed operator enum with its canonical wire names
macro_rules! operators {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

/// Value category that decides which operators apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperandDomain {
    String,
    Number,
    Date,
    Array,
    Object,
    Json,
    Common,
}

impl OperandDomain {
    pub const ALL: &'static [OperandDomain] = &[
        OperandDomain::String,
        OperandDomain::Number,
        OperandDomain::Date,
        OperandDomain::Array,
        OperandDomain::Object,
        OperandDomain::Json,
        OperandDomain::Common,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperandDomain::String => "STRING",
            OperandDomain::Number => "NUMBER",
            OperandDomain::Date => "DATE",
            OperandDomain::Array => "ARRAY",
            OperandDomain::Object => "OBJECT",
            OperandDomain::Json => "JSON",
            OperandDomain::Common => "COMMON",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|domain| domain.as_str() == name)
    }
}

impl fmt::Display for OperandDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

operators!(
    /// STRING domain
    StringOp {
        Equals => "EQUALS",
        Contains => "CONTAINS",
        StartsWith => "STARTS_WITH",
        EndsWith => "ENDS_WITH",
        LengthEquals => "LENGTH_EQUALS",
        LengthGreaterThan => "LENGTH_GREATER_THAN",
        LengthLessThan => "LENGTH_LESS_THAN",
        MatchesRegex => "MATCHES_REGEX",
    }
);

operators!(
    /// NUMBER domain
    NumberOp {
        Equals => "EQUALS",
        GreaterThan => "GREATER_THAN",
        LessThan => "LESS_THAN",
        Around => "AROUND",
        IsNegative => "IS_NEGATIVE",
        IsZero => "IS_ZERO",
        IsDecimal => "IS_DECIMAL",
        IsPrecision => "IS_PRECISION",
        Between => "BETWEEN",
        IsEven => "IS_EVEN",
        IsDivisibleBy => "IS_DIVISIBLE_BY",
        IsMultipleOf => "IS_MULTIPLE_OF",
        IsFactorOf => "IS_FACTOR_OF",
    }
);

operators!(
    /// DATE domain
    DateOp {
        Equals => "EQUALS",
        Before => "BEFORE",
        After => "AFTER",
        Between => "BETWEEN",
    }
);

operators!(
    /// ARRAY domain
    ArrayOp {
        Contains => "CONTAINS",
        Equals => "EQUALS",
        LengthGreaterThan => "LENGTH_GREATER_THAN",
        LengthEquals => "LENGTH_EQUALS",
        LengthLessThan => "LENGTH_LESS_THAN",
        LengthBetween => "LENGTH_BETWEEN",
        Satisfies => "SATISFIES",
    }
);

operators!(
    /// OBJECT domain
    ObjectOp {
        Equals => "EQUALS",
        Contains => "CONTAINS",
        Satisfies => "SATISFIES",
    }
);

operators!(
    /// JSON (raw document) domain
    JsonOp {
        Equals => "EQUALS",
        Satisfies => "SATISFIES",
    }
);

operators!(
    /// COMMON domain: assertions, nullish checks, logical combinators and plain equality
    CommonOp {
        Assert => "ASSERT",
        AssertNot => "ASSERT_NOT",
        IsEmpty => "IS_EMPTY",
        IsNull => "IS_NULL",
        IsNan => "IS_NAN",
        IsUndefined => "IS_UNDEFINED",
        Exists => "EXISTS",
        And => "AND",
        Or => "OR",
        Equals => "EQUALS",
    }
);

impl CommonOp {
    /// Sub-category used in qualified definitions such as `COMMON.NULLISH.EXISTS`
    pub fn category(&self) -> Option<&'static str> {
        match self {
            CommonOp::Assert | CommonOp::AssertNot => Some("ASSERTION"),
            CommonOp::IsEmpty
            | CommonOp::IsNull
            | CommonOp::IsNan
            | CommonOp::IsUndefined
            | CommonOp::Exists => Some("NULLISH"),
            CommonOp::And | CommonOp::Or => Some("LOGICAL"),
            CommonOp::Equals => None,
        }
    }
}

/// How many arguments an operator takes besides the subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Subject only
    Unary,
    /// Subject plus one comparison literal
    Binary,
    /// Any number of boolean operands
    Variadic,
}

impl Arity {
    pub fn accepts(&self, has_literal: bool) -> bool {
        match self {
            Arity::Unary => !has_literal,
            Arity::Binary => has_literal,
            Arity::Variadic => true,
        }
    }
}

/// A registered (domain, operator) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    String(StringOp),
    Number(NumberOp),
    Date(DateOp),
    Array(ArrayOp),
    Object(ObjectOp),
    Json(JsonOp),
    Common(CommonOp),
}

impl Operator {
    pub fn domain(&self) -> OperandDomain {
        match self {
            Operator::String(_) => OperandDomain::String,
            Operator::Number(_) => OperandDomain::Number,
            Operator::Date(_) => OperandDomain::Date,
            Operator::Array(_) => OperandDomain::Array,
            Operator::Object(_) => OperandDomain::Object,
            Operator::Json(_) => OperandDomain::Json,
            Operator::Common(_) => OperandDomain::Common,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::String(op) => op.as_str(),
            Operator::Number(op) => op.as_str(),
            Operator::Date(op) => op.as_str(),
            Operator::Array(op) => op.as_str(),
            Operator::Object(op) => op.as_str(),
            Operator::Json(op) => op.as_str(),
            Operator::Common(op) => op.as_str(),
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Operator::Number(
                NumberOp::IsNegative | NumberOp::IsZero | NumberOp::IsDecimal | NumberOp::IsEven,
            ) => Arity::Unary,
            Operator::Common(CommonOp::And | CommonOp::Or) => Arity::Variadic,
            Operator::Common(CommonOp::Equals) => Arity::Binary,
            Operator::Common(_) => Arity::Unary,
            _ => Arity::Binary,
        }
    }

    /// EXISTS-class operators give a meaningful answer for a path that does not resolve
    pub fn unresolved_outcome(&self) -> Option<bool> {
        match self {
            Operator::Common(CommonOp::Exists) => Some(false),
            Operator::Common(CommonOp::IsUndefined) => Some(true),
            Operator::Common(CommonOp::IsNull) => Some(false),
            _ => None,
        }
    }

    /// Operators whose literal is a nested predicate rather than a plain value
    pub fn takes_predicate(&self) -> bool {
        matches!(
            self,
            Operator::Array(ArrayOp::Satisfies)
                | Operator::Object(ObjectOp::Satisfies)
                | Operator::Json(JsonOp::Satisfies)
        )
    }

    /// Every registered pair, domain by domain
    pub fn all() -> impl Iterator<Item = Operator> {
        StringOp::ALL
            .iter()
            .map(|op| Operator::String(*op))
            .chain(NumberOp::ALL.iter().map(|op| Operator::Number(*op)))
            .chain(DateOp::ALL.iter().map(|op| Operator::Date(*op)))
            .chain(ArrayOp::ALL.iter().map(|op| Operator::Array(*op)))
            .chain(ObjectOp::ALL.iter().map(|op| Operator::Object(*op)))
            .chain(JsonOp::ALL.iter().map(|op| Operator::Json(*op)))
            .chain(CommonOp::ALL.iter().map(|op| Operator::Common(*op)))
    }

    /// Resolve an operator name within a known domain
    pub fn resolve(domain: OperandDomain, name: &str) -> Result<Operator, EngineError> {
        let found = match domain {
            OperandDomain::String => StringOp::from_name(name).map(Operator::String),
            OperandDomain::Number => NumberOp::from_name(name).map(Operator::Number),
            OperandDomain::Date => DateOp::from_name(name).map(Operator::Date),
            OperandDomain::Array => ArrayOp::from_name(name).map(Operator::Array),
            OperandDomain::Object => ObjectOp::from_name(name).map(Operator::Object),
            OperandDomain::Json => JsonOp::from_name(name).map(Operator::Json),
            OperandDomain::Common => CommonOp::from_name(name).map(Operator::Common),
        };

        found.ok_or_else(|| EngineError::UnknownOperator {
            domain: domain.as_str().to_string(),
            operator: name.to_string(),
        })
    }

    /// Parse an operator expression as written in a definition
    ///
    /// Accepted shapes:
    /// - `EQUALS`: domain taken from `domain`, or inferred (nullish/assertion/logical names
    ///   live in COMMON, everything else follows `value_type`)
    /// - `NUMBER.BETWEEN`: explicit domain
    /// - `COMMON.NULLISH.EXISTS`: explicit domain and category
    pub fn parse(
        expression: &str,
        domain: Option<OperandDomain>,
        value_type: ValueType,
    ) -> Result<Operator, EngineError> {
        let expression = expression.trim();
        let unknown = |domain: &str| EngineError::UnknownOperator {
            domain: domain.to_string(),
            operator: expression.to_string(),
        };
        let segments: Vec<&str> = expression.split('.').collect();

        match segments.as_slice() {
            [name] => {
                let domain = domain.unwrap_or_else(|| infer_domain(name, value_type));
                Operator::resolve(domain, name)
            }
            [qualifier, name] => {
                let parsed = OperandDomain::from_name(qualifier).ok_or_else(|| unknown(qualifier))?;
                if domain.is_some_and(|explicit| explicit != parsed) {
                    return Err(unknown(qualifier));
                }
                Operator::resolve(parsed, name)
            }
            [qualifier, category, name] if *qualifier == OperandDomain::Common.as_str() => {
                if domain.is_some_and(|explicit| explicit != OperandDomain::Common) {
                    return Err(unknown(qualifier));
                }
                match Operator::resolve(OperandDomain::Common, name)? {
                    Operator::Common(op) if op.category() == Some(*category) => {
                        Ok(Operator::Common(op))
                    }
                    _ => Err(unknown(qualifier)),
                }
            }
            _ => Err(unknown(domain.map(|d| d.as_str()).unwrap_or("?"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain(), self.name())
    }
}

fn infer_domain(name: &str, value_type: ValueType) -> OperandDomain {
    match CommonOp::from_name(name) {
        Some(op) if op.category().is_some() => OperandDomain::Common,
        _ => value_type.default_domain(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registered_pair_resolves() {
        for operator in Operator::all() {
            let resolved = Operator::resolve(operator.domain(), operator.name());
            assert_eq!(resolved, Ok(operator));

            let qualified = format!("{}.{}", operator.domain(), operator.name());
            assert_eq!(Operator::parse(&qualified, None, ValueType::String), Ok(operator));
        }
    }

    #[test]
    fn test_unknown_pairs_are_rejected() {
        for domain in OperandDomain::ALL {
            let result = Operator::resolve(*domain, "DEFINITELY_NOT_AN_OPERATOR");
            assert!(matches!(result, Err(EngineError::UnknownOperator { .. })));
        }
        // Valid name, wrong domain
        assert!(Operator::resolve(OperandDomain::Date, "IS_EVEN").is_err());
        assert!(Operator::parse("SPACE.EQUALS", None, ValueType::String).is_err());
        assert!(Operator::parse("COMMON.LOGICAL.EXISTS", None, ValueType::String).is_err());
    }

    #[test]
    fn test_domain_inference() {
        assert_eq!(
            Operator::parse("EXISTS", None, ValueType::String),
            Ok(Operator::Common(CommonOp::Exists))
        );
        assert_eq!(
            Operator::parse("EQUALS", None, ValueType::Boolean),
            Ok(Operator::Common(CommonOp::Equals))
        );
        assert_eq!(
            Operator::parse("BETWEEN", None, ValueType::Number),
            Ok(Operator::Number(NumberOp::Between))
        );
        assert_eq!(
            Operator::parse("COMMON.NULLISH.IS_NULL", None, ValueType::String),
            Ok(Operator::Common(CommonOp::IsNull))
        );
        assert_eq!(
            Operator::parse("CONTAINS", Some(OperandDomain::Object), ValueType::String),
            Ok(Operator::Object(ObjectOp::Contains))
        );
    }

    #[test]
    fn test_arity() {
        assert_eq!(Operator::Number(NumberOp::IsEven).arity(), Arity::Unary);
        assert_eq!(Operator::Number(NumberOp::Between).arity(), Arity::Binary);
        assert_eq!(Operator::Common(CommonOp::And).arity(), Arity::Variadic);
        assert!(Arity::Binary.accepts(true));
        assert!(!Arity::Unary.accepts(true));
    }
}
