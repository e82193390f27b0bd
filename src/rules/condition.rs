use crate::core::{DbError, Record, Result, value};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Boolean condition tree.
///
/// ```json
/// {"type": "all", "children": [
///     {"type": "fact", "property": "owner", "operator": "EQUALS", "value": "u1"},
///     {"type": "any", "children": [...]}
/// ]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    /// True iff every child is true. Vacuously true without children.
    All {
        #[serde(default)]
        children: Vec<Condition>,
    },
    /// True iff at least one child is true. False without children.
    Any {
        #[serde(default)]
        children: Vec<Condition>,
    },
    Fact {
        property: String,
        operator: String,
        #[serde(default)]
        value: Value,
    },
}

impl Condition {
    pub fn all(children: Vec<Condition>) -> Self {
        Condition::All { children }
    }

    pub fn any(children: Vec<Condition>) -> Self {
        Condition::Any { children }
    }

    pub fn fact(property: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        Condition::Fact {
            property: property.into(),
            operator: operator.into(),
            value,
        }
    }

    pub fn equals(property: impl Into<String>, value: Value) -> Self {
        Self::fact(property, "EQUALS", value)
    }

    /// Parses a JSON condition tree; unknown node types are configuration errors.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| DbError::Configuration(format!("invalid condition: {}", e)))
    }

    /// Every operator name used in the tree.
    pub fn operators(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_operators(&mut names);
        names
    }

    fn collect_operators<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Condition::All { children } | Condition::Any { children } => {
                for child in children {
                    child.collect_operators(names);
                }
            }
            Condition::Fact { operator, .. } => names.push(operator),
        }
    }
}

/// Source of fact values for condition evaluation.
pub trait Facts {
    fn fact(&self, path: &str) -> Option<&Value>;
}

impl Facts for Value {
    fn fact(&self, path: &str) -> Option<&Value> {
        value::lookup(self, path)
    }
}

impl Facts for Record {
    fn fact(&self, path: &str) -> Option<&Value> {
        value::lookup_record(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tree() {
        let cond = Condition::from_value(json!({
            "type": "all",
            "children": [
                {"type": "fact", "property": "owner", "operator": "EQUALS", "value": "u1"},
                {"type": "any"}
            ]
        }))
        .unwrap();

        assert_eq!(
            cond,
            Condition::all(vec![
                Condition::equals("owner", json!("u1")),
                Condition::any(vec![]),
            ])
        );
        assert_eq!(cond.operators(), vec!["EQUALS"]);
    }

    #[test]
    fn test_unknown_type_is_configuration_error() {
        let err = Condition::from_value(json!({"type": "none", "children": []})).unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
    }
}
