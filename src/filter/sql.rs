//! SQL `WHERE` text for parsed filters.

use super::escape::{escape_like, json_path, qualified_ident, quote_literal};
use super::parser::json_literal;
use super::token::{ArgSpec, Sep, Token};
use super::{Filter, Native};
use crate::core::{DbError, Result};

pub fn render(filter: &Filter) -> Result<Option<String>> {
    if let Some(native) = &filter.native {
        return match native {
            Native::Where(sql) if sql.trim().is_empty() => Ok(None),
            Native::Where(sql) => Ok(Some(sql.clone())),
            Native::Query(_) => Err(DbError::Filter(
                "native search query cannot be used as a SQL filter".to_string(),
            )),
        };
    }
    if filter.structure.is_empty() {
        return Ok(None);
    }

    let mut out = String::new();
    for token in &filter.structure {
        match token {
            Token::Arg(i) => {
                let arg = filter.columns.get(*i).ok_or_else(|| {
                    DbError::Internal(format!("filter argument {} out of range", i))
                })?;
                out.push_str(&render_arg(arg));
            }
            Token::And => out.push_str(" AND "),
            Token::Or => out.push_str(" OR "),
            Token::Open => out.push('('),
            Token::Close => out.push(')'),
        }
    }
    Ok(Some(out))
}

/// ANDs the authorization predicate with the filter predicate.
pub fn merge(authorization: Option<&str>, filter: Option<&str>) -> Option<String> {
    match (authorization, filter) {
        (Some(auth), Some(filter)) => Some(format!("({}) AND ({})", auth, filter)),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

fn first(arg: &ArgSpec) -> &str {
    arg.values.first().map(String::as_str).unwrap_or_default()
}

fn join(parts: Vec<String>, glue: &str) -> String {
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", parts.join(glue))
    }
}

pub(super) fn render_arg(arg: &ArgSpec) -> String {
    let column = qualified_ident(arg.table.as_deref(), &arg.name);
    let has_path = !arg.key_name.is_empty();

    // `#>` keeps jsonb, `#>>` extracts text.
    let json_expr = if has_path {
        format!("{} #> {}", column, json_path(&arg.key_name))
    } else {
        column.clone()
    };
    let text_expr = if has_path {
        format!("{} #>> {}", column, json_path(&arg.key_name))
    } else if arg.is_jsonb() {
        format!("{} #>> '{{}}'", column)
    } else {
        column.clone()
    };
    let null_expr = if has_path { &text_expr } else { &column };

    let fold = |expr: String| {
        if arg.case_insensitive {
            format!("LOWER({})", expr)
        } else {
            expr
        }
    };
    let lhs = fold(text_expr.clone());
    let literal = |raw: &str| fold(quote_literal(raw));

    match arg.sep {
        Sep::IsNull => format!("{} IS NULL", null_expr),
        Sep::NotNull => format!("{} IS NOT NULL", null_expr),
        Sep::KeyExists => format!("{} ? {}", json_expr, quote_literal(first(arg))),
        Sep::JsonContains => format!("{} @> {}::jsonb", json_expr, quote_literal(first(arg))),
        Sep::JsonNotContains => {
            format!("NOT ({} @> {}::jsonb)", json_expr, quote_literal(first(arg)))
        }
        Sep::RawEquals => {
            let parts = arg
                .texts()
                .iter()
                .map(|raw| {
                    if raw.eq_ignore_ascii_case("null") {
                        format!("{} IS NULL", null_expr)
                    } else {
                        format!("{} = {}", text_expr, raw.to_uppercase())
                    }
                })
                .collect();
            join(parts, " OR ")
        }
        Sep::Equals | Sep::NotEquals if json_literal(arg).is_some() => {
            let contains = format!("{} @> {}::jsonb", json_expr, quote_literal(first(arg)));
            if arg.sep == Sep::Equals {
                contains
            } else {
                format!("NOT ({})", contains)
            }
        }
        Sep::Equals | Sep::NotEquals => {
            let (single, multi) = if arg.sep == Sep::Equals {
                ("=", "IN")
            } else {
                ("<>", "NOT IN")
            };
            if arg.values.len() == 1 {
                format!("{} {} {}", lhs, single, literal(first(arg)))
            } else {
                let list: Vec<String> = arg.values.iter().map(|v| literal(v)).collect();
                format!("{} {} ({})", lhs, multi, list.join(", "))
            }
        }
        Sep::GreaterThan | Sep::LessThan | Sep::GreaterOrEqual | Sep::LessOrEqual => {
            let op = match arg.sep {
                Sep::GreaterThan => ">",
                Sep::LessThan => "<",
                Sep::GreaterOrEqual => ">=",
                _ => "<=",
            };
            let parts = arg
                .values
                .iter()
                .map(|raw| format!("{} {} {}", text_expr, op, quote_literal(raw)))
                .collect();
            join(parts, " OR ")
        }
        Sep::Contains | Sep::StartsWith | Sep::EndsWith => {
            let parts = arg
                .values
                .iter()
                .map(|raw| {
                    let body = escape_like(raw);
                    let pattern = match arg.sep {
                        Sep::Contains => format!("'%{}%'", body),
                        Sep::StartsWith => format!("'{}%'", body),
                        _ => format!("'%{}'", body),
                    };
                    format!("{} LIKE {}", lhs, fold(pattern))
                })
                .collect();
            join(parts, " OR ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnType;

    fn arg(name: &str, sep: Sep, values: &[&str]) -> ArgSpec {
        ArgSpec {
            name: name.to_string(),
            table: None,
            key_name: Vec::new(),
            values: values.iter().map(|v| v.to_string()).collect(),
            sep,
            column_type: ColumnType::Text,
            case_insensitive: false,
            blank_to_null: false,
        }
    }

    #[test]
    fn test_scalar_operators() {
        assert_eq!(render_arg(&arg("age", Sep::GreaterOrEqual, &["18"])), "age >= '18'");
        assert_eq!(render_arg(&arg("name", Sep::NotEquals, &["x"])), "name <> 'x'");
        assert_eq!(
            render_arg(&arg("status", Sep::Equals, &["a", "b"])),
            "status IN ('a', 'b')"
        );
        assert_eq!(render_arg(&arg("name", Sep::IsNull, &[])), "name IS NULL");
        assert_eq!(render_arg(&arg("n", Sep::RawEquals, &["42"])), "n = 42");
        assert_eq!(render_arg(&arg("n", Sep::RawEquals, &["null"])), "n IS NULL");
    }

    #[test]
    fn test_patterns_escape_wildcards() {
        assert_eq!(
            render_arg(&arg("name", Sep::Contains, &["50%"])),
            r"name LIKE '%50\%%'"
        );
        assert_eq!(render_arg(&arg("name", Sep::StartsWith, &["Jo"])), "name LIKE 'Jo%'");
        assert_eq!(render_arg(&arg("name", Sep::EndsWith, &["'x"])), "name LIKE '%''x'");
    }

    #[test]
    fn test_case_insensitive() {
        let mut spec = arg("email", Sep::Equals, &["A@B.C"]);
        spec.case_insensitive = true;
        assert_eq!(render_arg(&spec), "LOWER(email) = LOWER('A@B.C')");
    }

    #[test]
    fn test_jsonb_paths() {
        let mut spec = arg("data", Sep::Equals, &["Oslo"]);
        spec.column_type = ColumnType::Jsonb;
        spec.key_name = vec!["address".into(), "city".into()];
        assert_eq!(render_arg(&spec), "data #>> '{address,city}' = 'Oslo'");

        let mut spec = arg("data", Sep::Equals, &[r#"{"a":1}"#]);
        spec.column_type = ColumnType::Jsonb;
        assert_eq!(render_arg(&spec), r#"data @> '{"a":1}'::jsonb"#);

        let mut spec = arg("data", Sep::KeyExists, &["tags"]);
        spec.column_type = ColumnType::Jsonb;
        assert_eq!(render_arg(&spec), "data ? 'tags'");
    }

    #[test]
    fn test_merge() {
        assert_eq!(merge(None, None), None);
        assert_eq!(merge(Some("a = 1"), None).as_deref(), Some("a = 1"));
        assert_eq!(merge(None, Some("b = 2")).as_deref(), Some("b = 2"));
        assert_eq!(
            merge(Some("a = 1"), Some("b = 2")).as_deref(),
            Some("(a = 1) AND (b = 2)")
        );
    }
}
