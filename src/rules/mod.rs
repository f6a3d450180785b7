/// Rule engine: operand taxonomy, operator functions and literal coercion
///
/// Everything in here is pure. The condition evaluator in `runtime` adds path resolution,
/// inversion, logging and metrics on top.

// Closed (domain, operator) registry and the definition parser
pub mod operand;

// Pure predicate implementations, one module per domain
pub mod functions;

// Declared literal types and coercion
pub mod literal;

// Typed dispatch from a parsed operator to its function
pub mod apply;

// Authored rule definitions
pub mod rule;

pub use apply::{apply, Predicate, PredicateSpec};
pub use literal::{coerce, values_equal, ValueType};
pub use operand::{Arity, OperandDomain, Operator};
pub use rule::{Rule, RuleType, Verbosity};
