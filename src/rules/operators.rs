use crate::core::value::{as_text, compare, loosely_equal};
use crate::core::{DbError, Result};
use crate::filter::escape::{escape_like_value, escape_wildcard, quote_value};
use serde_json::{Value, json};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// A named comparison used by `fact` nodes.
///
/// `matches` is only called with a defined value; an undefined fact never matches.
pub trait RuleOperator: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, actual: &Value, expected: &Value) -> bool;

    /// SQL boolean expression over an already rendered column expression.
    fn to_sql(&self, column: &str, expected: &Value) -> Option<String>;

    /// Search-engine clause; `None` when the operator has no translation.
    fn to_search(&self, _field: &str, _expected: &Value) -> Option<Value> {
        None
    }
}

/// Literal for the right-hand side of a comparison.
fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        Value::Number(n) => quote_value(&n.to_string()),
        Value::String(s) => quote_value(s),
        other => quote_value(&other.to_string()),
    }
}

fn list_literal(values: &[Value]) -> String {
    values.iter().map(sql_literal).collect::<Vec<_>>().join(", ")
}

pub struct EqualsOperator;

impl RuleOperator for EqualsOperator {
    fn name(&self) -> &str {
        "EQUALS"
    }

    fn matches(&self, actual: &Value, expected: &Value) -> bool {
        loosely_equal(actual, expected)
    }

    fn to_sql(&self, column: &str, expected: &Value) -> Option<String> {
        Some(match expected {
            Value::Null => format!("{} IS NULL", column),
            other => format!("{} = {}", column, sql_literal(other)),
        })
    }

    fn to_search(&self, field: &str, expected: &Value) -> Option<Value> {
        Some(match expected {
            Value::Null => json!({"bool": {"must_not": [{"exists": {"field": field}}]}}),
            other => json!({"term": {field: other}}),
        })
    }
}

pub struct NotEqualsOperator;

impl RuleOperator for NotEqualsOperator {
    fn name(&self) -> &str {
        "NOT_EQUALS"
    }

    fn matches(&self, actual: &Value, expected: &Value) -> bool {
        !loosely_equal(actual, expected)
    }

    fn to_sql(&self, column: &str, expected: &Value) -> Option<String> {
        Some(match expected {
            Value::Null => format!("{} IS NOT NULL", column),
            other => format!("{} <> {}", column, sql_literal(other)),
        })
    }

    fn to_search(&self, field: &str, expected: &Value) -> Option<Value> {
        Some(match expected {
            Value::Null => json!({"exists": {"field": field}}),
            other => json!({"bool": {"must_not": [{"term": {field: other}}]}}),
        })
    }
}

pub struct InOperator {
    negated: bool,
}

impl RuleOperator for InOperator {
    fn name(&self) -> &str {
        if self.negated { "NOT_IN" } else { "IN" }
    }

    fn matches(&self, actual: &Value, expected: &Value) -> bool {
        let found = match expected {
            Value::Array(items) => items.iter().any(|item| loosely_equal(actual, item)),
            other => loosely_equal(actual, other),
        };
        found != self.negated
    }

    fn to_sql(&self, column: &str, expected: &Value) -> Option<String> {
        let items = match expected {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        Some(match (items.is_empty(), self.negated) {
            (true, false) => "1 = 0".to_string(),
            (true, true) => "1 = 1".to_string(),
            (false, false) => format!("{} IN ({})", column, list_literal(&items)),
            (false, true) => format!("{} NOT IN ({})", column, list_literal(&items)),
        })
    }

    fn to_search(&self, field: &str, expected: &Value) -> Option<Value> {
        let items = match expected {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        let terms = json!({"terms": {field: items}});
        Some(if self.negated {
            json!({"bool": {"must_not": [terms]}})
        } else {
            terms
        })
    }
}

pub struct RangeOperator {
    name: &'static str,
    accepts: fn(Ordering) -> bool,
    sql: &'static str,
    search: &'static str,
}

impl RuleOperator for RangeOperator {
    fn name(&self) -> &str {
        self.name
    }

    fn matches(&self, actual: &Value, expected: &Value) -> bool {
        compare(actual, expected).is_some_and(self.accepts)
    }

    fn to_sql(&self, column: &str, expected: &Value) -> Option<String> {
        if expected.is_null() {
            return Some("1 = 0".to_string());
        }
        Some(format!("{} {} {}", column, self.sql, sql_literal(expected)))
    }

    fn to_search(&self, field: &str, expected: &Value) -> Option<Value> {
        Some(json!({"range": {field: {self.search: expected}}}))
    }
}

/// Substring match on text values.
pub struct ContainsOperator;

impl RuleOperator for ContainsOperator {
    fn name(&self) -> &str {
        "CONTAINS"
    }

    fn matches(&self, actual: &Value, expected: &Value) -> bool {
        match (actual, as_text(expected)) {
            (Value::String(haystack), Some(needle)) => haystack.contains(&needle),
            _ => false,
        }
    }

    fn to_sql(&self, column: &str, expected: &Value) -> Option<String> {
        let needle = as_text(expected)?;
        Some(format!("{} LIKE '%{}%'", column, escape_like_value(&needle)))
    }

    fn to_search(&self, field: &str, expected: &Value) -> Option<Value> {
        let needle = as_text(expected)?;
        Some(json!({"wildcard": {field: {"value": format!("*{}*", escape_wildcard(&needle))}}}))
    }
}

/// Operators available to `fact` nodes, looked up by name.
pub struct OperatorRegistry {
    operators: HashMap<String, Arc<dyn RuleOperator>>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    pub fn register(&mut self, operator: Box<dyn RuleOperator>) {
        tracing::debug!(operator = operator.name(), "registered rule operator");
        self.operators
            .insert(operator.name().to_string(), Arc::from(operator));
    }

    pub fn with_default_operators() -> Self {
        let mut registry = Self::new();

        registry.register(Box::new(EqualsOperator));
        registry.register(Box::new(NotEqualsOperator));
        registry.register(Box::new(InOperator { negated: false }));
        registry.register(Box::new(InOperator { negated: true }));
        registry.register(Box::new(RangeOperator {
            name: "GREATER_THAN",
            accepts: |o| o == Ordering::Greater,
            sql: ">",
            search: "gt",
        }));
        registry.register(Box::new(RangeOperator {
            name: "GREATER_THAN_INCLUSIVE",
            accepts: |o| o != Ordering::Less,
            sql: ">=",
            search: "gte",
        }));
        registry.register(Box::new(RangeOperator {
            name: "LESS_THAN",
            accepts: |o| o == Ordering::Less,
            sql: "<",
            search: "lt",
        }));
        registry.register(Box::new(RangeOperator {
            name: "LESS_THAN_INCLUSIVE",
            accepts: |o| o != Ordering::Greater,
            sql: "<=",
            search: "lte",
        }));
        registry.register(Box::new(ContainsOperator));

        registry
    }

    pub fn get(&self, name: &str) -> Result<&dyn RuleOperator> {
        self.operators
            .get(name)
            .map(|op| op.as_ref())
            .ok_or_else(|| DbError::Configuration(format!("unknown rule operator '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.operators.keys().collect();
        names.sort();
        f.debug_struct("OperatorRegistry").field("operators", &names).finish()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_default_operators()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_operators() {
        let registry = OperatorRegistry::default();
        let gte = registry.get("GREATER_THAN_INCLUSIVE").unwrap();
        assert!(gte.matches(&json!(18), &json!(18)));
        assert!(gte.matches(&json!("20"), &json!(18)));
        assert!(!gte.matches(&json!(17), &json!(18)));
        assert_eq!(gte.to_sql("age", &json!(18)).unwrap(), "age >= '18'");
        assert_eq!(
            gte.to_search("age", &json!(18)).unwrap(),
            json!({"range": {"age": {"gte": 18}}})
        );
    }

    #[test]
    fn test_in_operator() {
        let registry = OperatorRegistry::default();
        let op = registry.get("IN").unwrap();
        assert!(op.matches(&json!("b"), &json!(["a", "b"])));
        assert_eq!(op.to_sql("s", &json!(["a", "b"])).unwrap(), "s IN ('a', 'b')");
        assert_eq!(op.to_sql("s", &json!([])).unwrap(), "1 = 0");

        let op = registry.get("NOT_IN").unwrap();
        assert!(op.matches(&json!("c"), &json!(["a", "b"])));
    }

    #[test]
    fn test_sql_literals_keep_what_matches_compares() {
        let registry = OperatorRegistry::default();
        let equals = registry.get("EQUALS").unwrap();
        let owner = json!("a\\b");
        assert!(equals.matches(&json!("a\\b"), &owner));
        assert_eq!(equals.to_sql("owner", &owner).unwrap(), r"owner = 'a\b'");
        assert_eq!(
            equals.to_sql("owner", &json!("o'k\\")).unwrap(),
            r"owner = 'o''k\'"
        );

        let contains = registry.get("CONTAINS").unwrap();
        assert!(contains.matches(&json!("C:\\tmp_1"), &json!("\\tmp_")));
        assert_eq!(
            contains.to_sql("path", &json!("\\tmp_")).unwrap(),
            r"path LIKE '%\\tmp\_%'"
        );
    }

    #[test]
    fn test_unknown_operator() {
        let registry = OperatorRegistry::default();
        assert!(matches!(
            registry.get("SOUNDS_LIKE"),
            Err(DbError::Configuration(_))
        ));
    }
}
