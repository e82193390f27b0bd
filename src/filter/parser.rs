use super::escape::{collapse_backslashes, is_path_segment, is_raw_literal};
use super::structure;
use super::token::{ArgSpec, Sep, Token};
use super::Filter;
use crate::core::{ColumnType, DbError, Result, SchemaRegistry, TableSchema};
use serde_json::Value;

/// Lexeme of a filter string.
#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Arg(String),
    And,
    Or,
    Open,
    Close,
}

fn lex(input: &str) -> Vec<Piece> {
    fn flush(current: &mut String, pieces: &mut Vec<Piece>) {
        let text = current.trim();
        if !text.is_empty() {
            pieces.push(Piece::Arg(text.to_string()));
        }
        current.clear();
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // Escapes stay in the argument text until the value is split.
            '\\' => {
                current.push('\\');
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '(' => {
                flush(&mut current, &mut pieces);
                pieces.push(Piece::Open);
            }
            ')' => {
                flush(&mut current, &mut pieces);
                pieces.push(Piece::Close);
            }
            '&' if chars.peek() == Some(&'&') => {
                chars.next();
                flush(&mut current, &mut pieces);
                pieces.push(Piece::And);
            }
            '|' if chars.peek() == Some(&'|') => {
                chars.next();
                flush(&mut current, &mut pieces);
                pieces.push(Piece::Or);
            }
            other => current.push(other),
        }
    }
    flush(&mut current, &mut pieces);
    pieces
}

/// Byte offset of the first `delim` not preceded by a backslash escape.
fn find_unescaped(text: &str, delim: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == delim {
            return Some(i);
        }
    }
    None
}

/// Splits on unescaped `delim`, keeping escapes in the parts.
fn split_unescaped(text: &str, delim: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(i) = find_unescaped(rest, delim) {
        parts.push(rest[..i].to_string());
        rest = &rest[i + delim.len_utf8()..];
    }
    parts.push(rest.to_string());
    parts
}

fn ends_with_unescaped(text: &str, c: char) -> bool {
    let Some(body) = text.strip_suffix(c) else {
        return false;
    };
    let backslashes = body.chars().rev().take_while(|&ch| ch == '\\').count();
    backslashes % 2 == 0
}

/// Operator detected from the value prefix (or `%` suffix), and the operand.
fn detect_sep(value: &str) -> (Sep, &str) {
    const PREFIXES: [(&str, Sep); 13] = [
        (">=", Sep::GreaterOrEqual),
        ("<=", Sep::LessOrEqual),
        ("=#", Sep::RawEquals),
        ("!^", Sep::NotNull),
        ("!=", Sep::NotEquals),
        ("!@", Sep::JsonNotContains),
        ("@>", Sep::JsonContains),
        ("^^", Sep::IsNull),
        (">", Sep::GreaterThan),
        ("<", Sep::LessThan),
        ("^", Sep::IsNull),
        ("?", Sep::KeyExists),
        ("==", Sep::Equals),
    ];

    for (prefix, sep) in PREFIXES {
        if let Some(rest) = value.strip_prefix(prefix) {
            return (sep, rest);
        }
    }
    if let Some(rest) = value.strip_prefix('!') {
        return if rest.is_empty() {
            (Sep::NotNull, rest)
        } else {
            (Sep::NotEquals, rest)
        };
    }

    let leading = value.starts_with('%');
    let trailing = value.len() > 1 && ends_with_unescaped(value, '%');
    match (leading, trailing) {
        (true, true) => (Sep::Contains, &value[1..value.len() - 1]),
        (true, false) => (Sep::EndsWith, &value[1..]),
        (false, true) => (Sep::StartsWith, &value[..value.len() - 1]),
        (false, false) => (Sep::Equals, value),
    }
}

fn parse_json_literal(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

pub(super) fn parse_text(schemas: &SchemaRegistry, table: &str, text: &str) -> Result<Filter> {
    let base = schemas.get(table)?;

    let mut raw = Vec::new();
    let mut structure = Vec::new();
    let mut args = Vec::new();

    for piece in lex(text) {
        let token = match piece {
            Piece::Arg(text) => {
                raw.push(text.clone());
                args.push((structure.len(), text));
                Token::Arg(args.len() - 1)
            }
            Piece::And => {
                raw.push("&&".to_string());
                Token::And
            }
            Piece::Or => {
                raw.push("||".to_string());
                Token::Or
            }
            Piece::Open => {
                raw.push("(".to_string());
                Token::Open
            }
            Piece::Close => {
                raw.push(")".to_string());
                Token::Close
            }
        };
        structure.push(token);
    }

    structure::validate(&structure, &raw)?;

    let columns = args
        .iter()
        .map(|(position, text)| parse_arg(schemas, &base, text, *position))
        .collect::<Result<Vec<_>>>()?;

    Ok(Filter {
        table: table.to_string(),
        raw,
        columns,
        structure,
        native: None,
    })
}

fn parse_arg(
    schemas: &SchemaRegistry,
    base: &TableSchema,
    text: &str,
    position: usize,
) -> Result<ArgSpec> {
    let colon = find_unescaped(text, ':')
        .ok_or_else(|| DbError::syntax(text, position, "expected 'name:value'"))?;
    let name = text[..colon].trim();
    let value = text[colon + 1..].trim();

    let segments: Vec<&str> = name.split('.').collect();
    if segments.iter().any(|s| !is_path_segment(s)) {
        return Err(DbError::syntax(text, position, "invalid column name"));
    }

    let qualified = segments.len() > 1
        && !base.has_column(segments[0])
        && schemas.contains(segments[0]);
    let (table, column_path) = if qualified {
        (Some(segments[0].to_string()), &segments[1..])
    } else {
        (None, &segments[..])
    };

    let joined;
    let schema: &TableSchema = match &table {
        Some(t) => {
            joined = schemas.get(t)?;
            &joined
        }
        None => base,
    };
    let column = column_path[0];
    let def = schema.get_column(column).ok_or_else(|| {
        DbError::Filter(format!("unknown column '{}' in '{}'", column, schema.name))
    })?;
    let key_name: Vec<String> = column_path[1..].iter().map(|s| s.to_string()).collect();
    if !key_name.is_empty() && def.column_type != ColumnType::Jsonb {
        return Err(DbError::Filter(format!(
            "column '{}' is not jsonb and has no key '{}'",
            column,
            key_name.join(".")
        )));
    }

    let (mut sep, operand) = detect_sep(value);
    let jsonb = def.column_type == ColumnType::Jsonb;

    let values = match sep {
        Sep::IsNull | Sep::NotNull => {
            if !operand.is_empty() {
                return Err(DbError::syntax(text, position, "null checks take no value"));
            }
            Vec::new()
        }
        Sep::KeyExists => {
            if !jsonb {
                return Err(DbError::Filter(format!(
                    "key-exists needs a jsonb column, '{}' is {}",
                    column, def.column_type
                )));
            }
            if operand.is_empty() {
                return Err(DbError::syntax(text, position, "missing key name"));
            }
            vec![operand.to_string()]
        }
        Sep::JsonContains | Sep::JsonNotContains => {
            if !jsonb {
                return Err(DbError::Filter(format!(
                    "containment needs a jsonb column, '{}' is {}",
                    column, def.column_type
                )));
            }
            if serde_json::from_str::<Value>(&collapse_backslashes(operand)).is_err() {
                return Err(DbError::Filter(format!(
                    "containment value for '{}' is not valid JSON",
                    column
                )));
            }
            vec![operand.to_string()]
        }
        Sep::RawEquals => {
            let values = split_unescaped(operand, ',');
            if let Some(bad) = values.iter().find(|v| !is_raw_literal(&collapse_backslashes(v))) {
                return Err(DbError::Filter(format!(
                    "raw equality on '{}' accepts only numbers, booleans or null, got '{}'",
                    column, bad
                )));
            }
            values
        }
        Sep::Equals | Sep::NotEquals
            if jsonb && parse_json_literal(&collapse_backslashes(operand)).is_some() =>
        {
            vec![operand.to_string()]
        }
        _ => split_unescaped(operand, ','),
    };

    if def.blank_to_null && values.len() == 1 {
        let text = collapse_backslashes(&values[0]);
        if text.is_empty() || text.eq_ignore_ascii_case("null") {
            match sep {
                Sep::Equals => sep = Sep::IsNull,
                Sep::NotEquals => sep = Sep::NotNull,
                _ => {}
            }
        }
    }

    Ok(ArgSpec {
        name: column.to_string(),
        table,
        key_name,
        values: if sep.is_null_check() { Vec::new() } else { values },
        sep,
        column_type: def.column_type,
        case_insensitive: def.case_insensitive,
        blank_to_null: def.blank_to_null,
    })
}

/// Object/array literal a jsonb argument compares against, if any.
pub(super) fn json_literal(arg: &ArgSpec) -> Option<Value> {
    if !arg.is_jsonb() || arg.values.len() != 1 {
        return None;
    }
    parse_json_literal(&collapse_backslashes(&arg.values[0]))
}
