//! Search-engine query bodies for parsed filters.

use super::escape::escape_wildcard;
use super::parser::json_literal;
use super::structure::{Node, tree};
use super::token::{ArgSpec, Sep, Token};
use super::{Filter, Native};
use crate::core::{DbError, Result};
use serde_json::{Value, json};

pub fn render(filter: &Filter) -> Result<Option<Value>> {
    if let Some(native) = &filter.native {
        return match native {
            Native::Query(query) => Ok(Some(query.clone())),
            Native::Where(_) => Err(DbError::Filter(
                "native SQL filter cannot be used as a search query".to_string(),
            )),
        };
    }
    if filter.structure.is_empty() {
        return Ok(None);
    }
    render_node(filter, &tree(&filter.structure)).map(Some)
}

/// ANDs the authorization clause with the filter clause.
pub fn merge(authorization: Option<Value>, filter: Option<Value>) -> Value {
    match (authorization, filter) {
        (Some(auth), Some(filter)) => json!({"bool": {"must": [auth, filter]}}),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => json!({"match_all": {}}),
    }
}

fn render_node(filter: &Filter, node: &Node) -> Result<Value> {
    match node {
        Node::Arg(i) => {
            let arg = filter.columns.get(*i).ok_or_else(|| {
                DbError::Internal(format!("filter argument {} out of range", i))
            })?;
            if arg.table.as_deref().is_some_and(|t| t != filter.table) {
                return Err(DbError::Filter(format!(
                    "'{}.{}' refers to another table; the search index cannot join",
                    arg.table.as_deref().unwrap_or_default(),
                    arg.name
                )));
            }
            render_arg(arg)
        }
        Node::Group { op, children } => {
            let clauses = children
                .iter()
                .map(|child| render_node(filter, child))
                .collect::<Result<Vec<_>>>()?;
            Ok(match op {
                Some(Token::Or) => should(clauses),
                _ => must(clauses),
            })
        }
    }
}

fn must(clauses: Vec<Value>) -> Value {
    json!({"bool": {"must": clauses}})
}

fn should(clauses: Vec<Value>) -> Value {
    json!({"bool": {"should": clauses, "minimum_should_match": 1}})
}

fn must_not(clause: Value) -> Value {
    json!({"bool": {"must_not": [clause]}})
}

/// Single clause as-is, several OR-ed.
fn any_of(mut clauses: Vec<Value>) -> Value {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        should(clauses)
    }
}

fn term(field: &str, value: Value, case_insensitive: bool) -> Value {
    if case_insensitive {
        json!({"term": {field: {"value": value, "case_insensitive": true}}})
    } else {
        json!({"term": {field: value}})
    }
}

/// Structural containment expressed as term clauses on leaf paths.
fn contains(field: &str, value: &Value) -> Value {
    match value {
        Value::Object(map) => must(
            map.iter()
                .map(|(key, v)| contains(&format!("{}.{}", field, key), v))
                .collect(),
        ),
        Value::Array(items) => must(items.iter().map(|v| contains(field, v)).collect()),
        Value::Null => must_not(json!({"exists": {"field": field}})),
        scalar => term(field, scalar.clone(), false),
    }
}

fn parse_json(arg: &ArgSpec) -> Result<Value> {
    let text = arg.texts().into_iter().next().unwrap_or_default();
    serde_json::from_str(&text)
        .map_err(|e| DbError::Filter(format!("invalid JSON for '{}': {}", arg.name, e)))
}

pub(super) fn render_arg(arg: &ArgSpec) -> Result<Value> {
    let field = arg.field_path();
    let texts = arg.texts();
    let ci = arg.case_insensitive;

    Ok(match arg.sep {
        Sep::IsNull => must_not(json!({"exists": {"field": field}})),
        Sep::NotNull => json!({"exists": {"field": field}}),
        Sep::KeyExists => {
            let key = texts.first().cloned().unwrap_or_default();
            json!({"exists": {"field": format!("{}.{}", field, key)}})
        }
        Sep::JsonContains => contains(&field, &parse_json(arg)?),
        Sep::JsonNotContains => must_not(contains(&field, &parse_json(arg)?)),
        Sep::Equals | Sep::NotEquals if json_literal(arg).is_some() => {
            let clause = contains(&field, &parse_json(arg)?);
            if arg.sep == Sep::Equals {
                clause
            } else {
                must_not(clause)
            }
        }
        Sep::Equals => any_of(
            texts
                .into_iter()
                .map(|t| term(&field, Value::String(t), ci))
                .collect(),
        ),
        Sep::NotEquals => {
            let mut clauses: Vec<Value> = texts
                .into_iter()
                .map(|t| must_not(term(&field, Value::String(t), ci)))
                .collect();
            if clauses.len() == 1 {
                clauses.remove(0)
            } else {
                must(clauses)
            }
        }
        Sep::RawEquals => any_of(
            texts
                .iter()
                .map(|t| {
                    let literal: Value =
                        serde_json::from_str(&t.to_lowercase()).unwrap_or(Value::Null);
                    match literal {
                        Value::Null => must_not(json!({"exists": {"field": field}})),
                        other => term(&field, other, false),
                    }
                })
                .collect(),
        ),
        Sep::GreaterThan | Sep::LessThan | Sep::GreaterOrEqual | Sep::LessOrEqual => {
            let op = match arg.sep {
                Sep::GreaterThan => "gt",
                Sep::LessThan => "lt",
                Sep::GreaterOrEqual => "gte",
                _ => "lte",
            };
            any_of(
                texts
                    .into_iter()
                    .map(|t| json!({"range": {field.as_str(): {op: t}}}))
                    .collect(),
            )
        }
        Sep::Contains | Sep::StartsWith | Sep::EndsWith => any_of(
            texts
                .iter()
                .map(|t| {
                    let body = escape_wildcard(t);
                    let pattern = match arg.sep {
                        Sep::Contains => format!("*{}*", body),
                        Sep::StartsWith => format!("{}*", body),
                        _ => format!("*{}", body),
                    };
                    if ci {
                        json!({"wildcard": {field.as_str(): {"value": pattern, "case_insensitive": true}}})
                    } else {
                        json!({"wildcard": {field.as_str(): {"value": pattern}}})
                    }
                })
                .collect(),
        ),
    })
}
