//! Condition trees (`all` / `any` / `fact`), their in-memory evaluation and
//! their compilation to SQL text or search-engine query bodies.

pub mod condition;
pub mod evaluator;
pub mod operators;

pub use condition::{Condition, Facts};
pub use evaluator::RuleEvaluator;
pub use operators::{OperatorRegistry, RuleOperator};

use serde_json::Value;

/// A backend-native predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// SQL boolean expression for a `WHERE` clause.
    Sql(String),
    /// Search-engine query clause.
    Search(Value),
}

impl Predicate {
    pub fn as_sql(&self) -> Option<&str> {
        match self {
            Predicate::Sql(sql) => Some(sql),
            Predicate::Search(_) => None,
        }
    }

    pub fn as_search(&self) -> Option<&Value> {
        match self {
            Predicate::Search(body) => Some(body),
            Predicate::Sql(_) => None,
        }
    }
}
