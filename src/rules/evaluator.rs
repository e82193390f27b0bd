use super::condition::{Condition, Facts};
use super::operators::OperatorRegistry;
use crate::core::{DbError, Result};
use crate::filter::escape::{is_path_segment, json_path, quote_ident};
use serde_json::{Value, json};

/// Evaluates condition trees against records and compiles them to backend
/// predicates.
#[derive(Debug)]
pub struct RuleEvaluator {
    operators: OperatorRegistry,
}

impl RuleEvaluator {
    pub fn new() -> Self {
        Self {
            operators: OperatorRegistry::with_default_operators(),
        }
    }

    pub fn with_operators(operators: OperatorRegistry) -> Self {
        Self { operators }
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    /// Checks that every operator in the tree is registered.
    pub fn validate(&self, condition: &Condition) -> Result<()> {
        for name in condition.operators() {
            self.operators.get(name)?;
        }
        Ok(())
    }

    pub fn evaluate<F: Facts + ?Sized>(&self, condition: &Condition, facts: &F) -> Result<bool> {
        match condition {
            Condition::All { children } => {
                for child in children {
                    if !self.evaluate(child, facts)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Condition::Any { children } => {
                for child in children {
                    if self.evaluate(child, facts)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Condition::Fact {
                property,
                operator,
                value,
            } => {
                let operator = self.operators.get(operator)?;
                Ok(match facts.fact(property) {
                    Some(actual) => operator.matches(actual, value),
                    None => false,
                })
            }
        }
    }

    /// Parenthesized SQL boolean expression.
    pub fn compile_sql(&self, condition: &Condition) -> Result<String> {
        match condition {
            Condition::All { children } => self.join_sql(children, " AND ", "1 = 1"),
            Condition::Any { children } => self.join_sql(children, " OR ", "1 = 0"),
            Condition::Fact {
                property,
                operator,
                value,
            } => {
                let column = property_sql(property)?;
                let op = self.operators.get(operator)?;
                op.to_sql(&column, value).ok_or_else(|| {
                    DbError::Configuration(format!(
                        "operator '{}' has no SQL translation for {}",
                        operator, value
                    ))
                })
            }
        }
    }

    fn join_sql(&self, children: &[Condition], glue: &str, empty: &str) -> Result<String> {
        if children.is_empty() {
            return Ok(format!("({})", empty));
        }
        let parts = children
            .iter()
            .map(|child| self.compile_sql(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(format!("({})", parts.join(glue)))
    }

    /// Search-engine query body. `Ok(None)` when some operator in the tree
    /// cannot be translated; callers must not drop such a condition.
    pub fn compile_search(&self, condition: &Condition) -> Result<Option<Value>> {
        match condition {
            Condition::All { children } => {
                if children.is_empty() {
                    return Ok(Some(json!({"match_all": {}})));
                }
                let Some(clauses) = self.compile_children(children)? else {
                    return Ok(None);
                };
                Ok(Some(json!({"bool": {"must": clauses}})))
            }
            Condition::Any { children } => {
                if children.is_empty() {
                    return Ok(Some(json!({"bool": {"must_not": [{"match_all": {}}]}})));
                }
                let Some(clauses) = self.compile_children(children)? else {
                    return Ok(None);
                };
                Ok(Some(
                    json!({"bool": {"should": clauses, "minimum_should_match": 1}}),
                ))
            }
            Condition::Fact {
                property,
                operator,
                value,
            } => {
                let op = self.operators.get(operator)?;
                Ok(op.to_search(property, value))
            }
        }
    }

    fn compile_children(&self, children: &[Condition]) -> Result<Option<Vec<Value>>> {
        let mut clauses = Vec::with_capacity(children.len());
        for child in children {
            match self.compile_search(child)? {
                Some(clause) => clauses.push(clause),
                None => return Ok(None),
            }
        }
        Ok(Some(clauses))
    }
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Column expression for a (possibly dotted) fact property.
fn property_sql(property: &str) -> Result<String> {
    let mut segments = property.split('.');
    let column = segments.next().unwrap_or_default();
    let path: Vec<String> = segments.map(str::to_string).collect();

    if column.is_empty() || path.iter().any(|s| !is_path_segment(s)) {
        return Err(DbError::Configuration(format!(
            "invalid condition property '{}'",
            property
        )));
    }

    if path.is_empty() {
        Ok(quote_ident(column))
    } else {
        Ok(format!("{} #>> {}", quote_ident(column), json_path(&path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Record;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_all_and_any() {
        let rules = RuleEvaluator::new();
        let row = record(json!({"owner": "u1", "status": "active"}));

        let cond = Condition::all(vec![
            Condition::equals("owner", json!("u1")),
            Condition::any(vec![
                Condition::equals("status", json!("trial")),
                Condition::equals("status", json!("active")),
            ]),
        ]);
        assert!(rules.evaluate(&cond, &row).unwrap());

        assert!(rules.evaluate(&Condition::all(vec![]), &row).unwrap());
        assert!(!rules.evaluate(&Condition::any(vec![]), &row).unwrap());
    }

    #[test]
    fn test_undefined_fact_fails_to_match() {
        let rules = RuleEvaluator::new();
        let row = record(json!({"owner": "u1"}));

        assert!(!rules.evaluate(&Condition::equals("missing", json!("x")), &row).unwrap());
        assert!(
            !rules
                .evaluate(&Condition::fact("missing", "NOT_EQUALS", json!("x")), &row)
                .unwrap()
        );
    }

    #[test]
    fn test_dotted_lookup() {
        let rules = RuleEvaluator::new();
        let row = record(json!({"address": {"city": "Oslo"}}));
        let cond = Condition::equals("address.city", json!("Oslo"));
        assert!(rules.evaluate(&cond, &row).unwrap());
        assert_eq!(
            rules.compile_sql(&cond).unwrap(),
            "address #>> '{city}' = 'Oslo'"
        );
    }

    #[test]
    fn test_unknown_operator_is_fatal() {
        let rules = RuleEvaluator::new();
        let row = record(json!({"a": 1}));
        let err = rules
            .evaluate(&Condition::fact("a", "ROUGHLY", json!(1)), &row)
            .unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
    }

    #[test]
    fn test_compile_sql() {
        let rules = RuleEvaluator::new();
        let cond = Condition::all(vec![
            Condition::equals("owner", json!("o'neil")),
            Condition::any(vec![
                Condition::fact("age", "GREATER_THAN", json!(18)),
                Condition::fact("status", "IN", json!(["a", "b"])),
            ]),
        ]);
        assert_eq!(
            rules.compile_sql(&cond).unwrap(),
            "(owner = 'o''neil' AND (age > '18' OR status IN ('a', 'b')))"
        );
        assert_eq!(rules.compile_sql(&Condition::any(vec![])).unwrap(), "(1 = 0)");
    }

    #[test]
    fn test_compiled_sql_compares_the_evaluated_value() {
        let rules = RuleEvaluator::new();
        let cond = Condition::equals("owner", json!("a\\b"));
        let row = record(json!({"owner": "a\\b"}));
        assert!(rules.evaluate(&cond, &row).unwrap());
        assert_eq!(rules.compile_sql(&cond).unwrap(), r"owner = 'a\b'");
    }

    struct OpaqueOperator;

    impl crate::rules::RuleOperator for OpaqueOperator {
        fn name(&self) -> &str {
            "OPAQUE"
        }

        fn matches(&self, _actual: &Value, _expected: &Value) -> bool {
            true
        }

        fn to_sql(&self, column: &str, _expected: &Value) -> Option<String> {
            Some(format!("{} IS NOT NULL", column))
        }
    }

    #[test]
    fn test_compile_search_fails_closed() {
        let mut operators = OperatorRegistry::with_default_operators();
        operators.register(Box::new(OpaqueOperator));
        let rules = RuleEvaluator::with_operators(operators);

        let translatable = Condition::all(vec![Condition::equals("owner", json!("u1"))]);
        assert_eq!(
            rules.compile_search(&translatable).unwrap(),
            Some(json!({"bool": {"must": [{"term": {"owner": "u1"}}]}}))
        );

        let opaque = Condition::all(vec![
            Condition::equals("owner", json!("u1")),
            Condition::fact("owner", "OPAQUE", json!(null)),
        ]);
        assert_eq!(rules.compile_search(&opaque).unwrap(), None);
    }
}
