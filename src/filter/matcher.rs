//! In-memory evaluation of parsed filters, with the same semantics as the
//! rendered SQL (a comparison against a missing or null value is false).

use super::parser::json_literal;
use super::structure::{Node, tree};
use super::token::{ArgSpec, Sep, Token};
use super::{Filter, Native};
use crate::core::value::{as_text, compare, json_contains, lookup_record, loosely_equal};
use crate::core::{DbError, Record, Result};
use serde_json::Value;
use std::cmp::Ordering;

pub fn matches(filter: &Filter, record: &Record) -> Result<bool> {
    if let Some(native) = &filter.native {
        return Err(DbError::Filter(match native {
            Native::Where(_) => "native SQL filters cannot be evaluated in memory".to_string(),
            Native::Query(_) => "native search queries cannot be evaluated in memory".to_string(),
        }));
    }
    if filter.structure.is_empty() {
        return Ok(true);
    }
    eval(filter, &tree(&filter.structure), record)
}

fn eval(filter: &Filter, node: &Node, record: &Record) -> Result<bool> {
    match node {
        Node::Arg(i) => {
            let arg = filter.columns.get(*i).ok_or_else(|| {
                DbError::Internal(format!("filter argument {} out of range", i))
            })?;
            Ok(eval_arg(filter, arg, record))
        }
        Node::Group { op, children } => {
            if *op == Some(Token::Or) {
                for child in children {
                    if eval(filter, child, record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            } else {
                for child in children {
                    if !eval(filter, child, record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

fn text_equal(actual: &Value, expected: &str, case_insensitive: bool) -> bool {
    if case_insensitive {
        return as_text(actual).is_some_and(|t| t.to_lowercase() == expected.to_lowercase());
    }
    loosely_equal(actual, &Value::String(expected.to_string()))
        || as_text(actual).is_some_and(|t| t == expected)
}

fn eval_arg(filter: &Filter, arg: &ArgSpec, record: &Record) -> bool {
    // Joined rows are attached under their table name.
    let path = match &arg.table {
        Some(table) if table != &filter.table => format!("{}.{}", table, arg.field_path()),
        _ => arg.field_path(),
    };
    let actual = lookup_record(record, &path).filter(|v| !v.is_null());
    let texts = arg.texts();

    match arg.sep {
        Sep::IsNull => return actual.is_none(),
        Sep::NotNull => return actual.is_some(),
        Sep::RawEquals => {
            return texts.iter().any(|t| {
                let literal: Value = serde_json::from_str(&t.to_lowercase()).unwrap_or(Value::Null);
                match (&literal, actual) {
                    (Value::Null, actual) => actual.is_none(),
                    (literal, Some(actual)) => loosely_equal(actual, literal),
                    (_, None) => false,
                }
            });
        }
        _ => {}
    }

    let Some(actual) = actual else {
        return false;
    };
    let fold = |s: &str| {
        if arg.case_insensitive {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    };

    match arg.sep {
        Sep::KeyExists => {
            let key = texts.first().map(String::as_str).unwrap_or_default();
            match actual {
                Value::Object(map) => map.contains_key(key),
                Value::Array(items) => items.iter().any(|item| item.as_str() == Some(key)),
                _ => false,
            }
        }
        Sep::JsonContains | Sep::JsonNotContains => {
            let contained = texts
                .first()
                .and_then(|t| serde_json::from_str::<Value>(t).ok());
            let found = contained.is_some_and(|c| json_contains(actual, &c));
            found == (arg.sep == Sep::JsonContains)
        }
        Sep::Equals | Sep::NotEquals if json_literal(arg).is_some() => {
            let found = json_literal(arg).is_some_and(|c| json_contains(actual, &c));
            found == (arg.sep == Sep::Equals)
        }
        Sep::Equals => texts
            .iter()
            .any(|t| text_equal(actual, t, arg.case_insensitive)),
        Sep::NotEquals => texts
            .iter()
            .all(|t| !text_equal(actual, t, arg.case_insensitive)),
        Sep::GreaterThan | Sep::LessThan | Sep::GreaterOrEqual | Sep::LessOrEqual => {
            let accepts = |o: Ordering| match arg.sep {
                Sep::GreaterThan => o == Ordering::Greater,
                Sep::LessThan => o == Ordering::Less,
                Sep::GreaterOrEqual => o != Ordering::Less,
                _ => o != Ordering::Greater,
            };
            texts.iter().any(|t| {
                compare(actual, &Value::String(t.clone())).is_some_and(accepts)
            })
        }
        Sep::Contains | Sep::StartsWith | Sep::EndsWith => {
            let Some(haystack) = as_text(actual) else {
                return false;
            };
            let haystack = fold(&haystack);
            texts.iter().any(|t| {
                let needle = fold(t);
                match arg.sep {
                    Sep::Contains => haystack.contains(&needle),
                    Sep::StartsWith => haystack.starts_with(&needle),
                    _ => haystack.ends_with(&needle),
                }
            })
        }
        Sep::IsNull | Sep::NotNull | Sep::RawEquals => false,
    }
}
