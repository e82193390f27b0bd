//! Field-level visibility masks.

use crate::core::{Record, Result};
use crate::rules::{Condition, RuleEvaluator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Rule for a single property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyRule {
    Never,
    Always,
    /// Visible while the condition holds for the context record.
    Condition { condition: Condition },
    /// Rules for the members of an object property.
    Nested { properties: PropertySpec },
}

/// Property name to rule. Properties not listed are unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySpec(BTreeMap<String, PropertyRule>);

impl PropertySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, property: impl Into<String>, rule: PropertyRule) -> Self {
        self.0.insert(property.into(), rule);
        self
    }

    pub fn never(self, property: impl Into<String>) -> Self {
        self.rule(property, PropertyRule::Never)
    }

    pub fn always(self, property: impl Into<String>) -> Self {
        self.rule(property, PropertyRule::Always)
    }

    pub fn when(self, property: impl Into<String>, condition: Condition) -> Self {
        self.rule(property, PropertyRule::Condition { condition })
    }

    pub fn nested(self, property: impl Into<String>, properties: PropertySpec) -> Self {
        self.rule(property, PropertyRule::Nested { properties })
    }

    pub fn get(&self, property: &str) -> Option<&PropertyRule> {
        self.0.get(property)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn conditions(&self) -> Vec<&Condition> {
        self.0
            .values()
            .flat_map(|rule| match rule {
                PropertyRule::Condition { condition } => vec![condition],
                PropertyRule::Nested { properties } => properties.conditions(),
                _ => Vec::new(),
            })
            .collect()
    }
}

enum Verdict<'a> {
    Allowed,
    Masked,
    Nested(Vec<&'a PropertySpec>),
}

/// Applies stacked `specs` to `data`. A property survives when at least one
/// spec allows it. Conditions are evaluated against `context`.
pub(crate) fn mask(
    rules: &RuleEvaluator,
    specs: &[&PropertySpec],
    data: &Record,
    current: Option<&Record>,
    context: &Record,
    top_level: bool,
) -> Result<Record> {
    if specs.is_empty() {
        return Ok(data.clone());
    }

    let mut masked = Record::new();
    for (property, value) in data {
        match verdict(rules, specs, property, context)? {
            Verdict::Allowed => {
                masked.insert(property.clone(), value.clone());
            }
            Verdict::Nested(nested) => {
                let current_value = current.and_then(|c| c.get(property));
                match value {
                    Value::Object(members) => {
                        let current_members = current_value.and_then(Value::as_object);
                        let inner = mask(rules, &nested, members, current_members, context, false)?;
                        masked.insert(property.clone(), Value::Object(inner));
                    }
                    // A non-object value cannot be partially masked.
                    _ => revert(&mut masked, property, current_value, top_level),
                }
            }
            Verdict::Masked => {
                let current_value = current.and_then(|c| c.get(property));
                revert(&mut masked, property, current_value, top_level);
            }
        }
    }
    Ok(masked)
}

fn revert(masked: &mut Record, property: &str, current: Option<&Value>, top_level: bool) {
    if top_level {
        return;
    }
    if let Some(current) = current {
        masked.insert(property.to_string(), current.clone());
    }
}

fn verdict<'a>(
    rules: &RuleEvaluator,
    specs: &[&'a PropertySpec],
    property: &str,
    context: &Record,
) -> Result<Verdict<'a>> {
    let mut nested = Vec::new();
    for spec in specs {
        match spec.get(property) {
            None | Some(PropertyRule::Always) => return Ok(Verdict::Allowed),
            Some(PropertyRule::Never) => {}
            Some(PropertyRule::Condition { condition }) => {
                if rules.evaluate(condition, context)? {
                    return Ok(Verdict::Allowed);
                }
            }
            Some(PropertyRule::Nested { properties }) => nested.push(properties),
        }
    }
    Ok(if nested.is_empty() {
        Verdict::Masked
    } else {
        Verdict::Nested(nested)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn apply(specs: &[&PropertySpec], data: &Record, current: Option<&Record>) -> Record {
        let rules = RuleEvaluator::new();
        let context = current.unwrap_or(data);
        mask(&rules, specs, data, current, context, true).unwrap()
    }

    #[test]
    fn test_never_and_always() {
        let spec = PropertySpec::new().never("secret").always("name");
        let data = record(json!({"name": "a", "secret": "s", "other": 1}));
        assert_eq!(apply(&[&spec], &data, None), record(json!({"name": "a", "other": 1})));
    }

    #[test]
    fn test_condition_masks_when_false() {
        let spec = PropertySpec::new().when("name", Condition::equals("owner", json!("me")));
        let current = record(json!({"owner": "you", "name": "John"}));
        let data = record(json!({"name": "Jane"}));
        assert!(apply(&[&spec], &data, Some(&current)).is_empty());

        let current = record(json!({"owner": "me", "name": "John"}));
        assert_eq!(apply(&[&spec], &data, Some(&current)), data);
    }

    #[test]
    fn test_nested_reverts_to_current() {
        let spec = PropertySpec::new().nested("profile", PropertySpec::new().never("ssn"));
        let current = record(json!({"profile": {"ssn": "111", "bio": "old"}}));
        let data = record(json!({"profile": {"ssn": "999", "bio": "new"}}));
        assert_eq!(
            apply(&[&spec], &data, Some(&current)),
            record(json!({"profile": {"ssn": "111", "bio": "new"}}))
        );
        assert_eq!(
            apply(&[&spec], &data, None),
            record(json!({"profile": {"bio": "new"}}))
        );
    }

    #[test]
    fn test_stacked_specs_are_or_combined() {
        let strict = PropertySpec::new().never("email");
        let lenient = PropertySpec::new();
        let data = record(json!({"email": "a@b"}));
        assert_eq!(apply(&[&strict, &lenient], &data, None), data);
        assert!(apply(&[&strict, &strict], &data, None).is_empty());
    }

    #[test]
    fn test_masking_is_idempotent() {
        let spec = PropertySpec::new()
            .never("secret")
            .nested("profile", PropertySpec::new().never("ssn"));
        let current = record(json!({"secret": 1, "profile": {"ssn": "1"}}));
        let data = record(json!({"secret": 2, "name": "x", "profile": {"ssn": "2", "bio": "b"}}));
        let once = apply(&[&spec], &data, Some(&current));
        let twice = apply(&[&spec], &once, Some(&current));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_spec_deserializes() {
        let spec: PropertySpec = serde_json::from_value(json!({
            "secret": {"type": "never"},
            "name": {"type": "condition", "condition": {"type": "fact", "property": "a", "operator": "EQUALS", "value": 1}}
        }))
        .unwrap();
        assert_eq!(spec.get("secret"), Some(&PropertyRule::Never));
        assert_eq!(spec.conditions().len(), 1);
    }
}
