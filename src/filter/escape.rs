//! Literal and identifier escaping for generated SQL text.
//!
//! Every value that ends up inside a rendered predicate passes through this
//! module. Nothing else in the crate builds quoted SQL literals.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLAIN_IDENT: Regex = Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap();
    static ref RAW_LITERAL: Regex =
        Regex::new(r"^(?i:-?[0-9]+(\.[0-9]+)?([eE][-+]?[0-9]+)?|true|false|null)$").unwrap();
    static ref PATH_SEGMENT: Regex = Regex::new(r"^[A-Za-z0-9_\-]+$").unwrap();
}

const RESERVED: &[&str] = &[
    "all", "and", "any", "as", "asc", "by", "case", "check", "column", "create", "desc",
    "distinct", "else", "end", "false", "from", "group", "having", "in", "is", "join", "like",
    "limit", "not", "null", "offset", "on", "or", "order", "select", "table", "then", "to",
    "true", "union", "user", "using", "when", "where", "with",
];

/// Removes backslash escapes (`\x` becomes `x`, a trailing lone backslash is
/// dropped) and NUL bytes.
pub fn collapse_backslashes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    if next != '\0' {
                        out.push(next);
                    }
                }
            }
            '\0' => {}
            other => out.push(other),
        }
    }
    out
}

/// Body of a single-quoted SQL literal: backslash escapes collapsed, single
/// quotes doubled.
pub fn escape_literal(raw: &str) -> String {
    collapse_backslashes(raw).replace('\'', "''")
}

/// A complete single-quoted SQL literal.
pub fn quote_literal(raw: &str) -> String {
    format!("'{}'", escape_literal(raw))
}

/// Single-quoted `LIKE` pattern body with `%`/`_` in the value made literal.
pub fn escape_like(raw: &str) -> String {
    like_body(&collapse_backslashes(raw))
}

/// A complete single-quoted SQL literal for a typed value. Backslashes are
/// kept as written.
pub fn quote_value(value: &str) -> String {
    format!("'{}'", value.replace('\0', "").replace('\'', "''"))
}

/// [`escape_like`] for a typed value. Backslashes are kept as written.
pub fn escape_like_value(value: &str) -> String {
    like_body(&value.replace('\0', ""))
}

fn like_body(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\'' => out.push_str("''"),
            '\0' => {}
            other => out.push(other),
        }
    }
    out
}

/// Identifier, double-quoted only when it is not a plain lower-case name.
pub fn quote_ident(name: &str) -> String {
    if PLAIN_IDENT.is_match(name) && !RESERVED.contains(&name) {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('\0', "").replace('"', "\"\""))
    }
}

/// `table.column` or `column`.
pub fn qualified_ident(table: Option<&str>, column: &str) -> String {
    match table {
        Some(table) => format!("{}.{}", quote_ident(table), quote_ident(column)),
        None => quote_ident(column),
    }
}

/// Literal accepted by raw (unquoted) equality: numbers, booleans, null.
pub fn is_raw_literal(raw: &str) -> bool {
    RAW_LITERAL.is_match(raw)
}

/// Key segment accepted inside a jsonb path.
pub fn is_path_segment(segment: &str) -> bool {
    PATH_SEGMENT.is_match(segment)
}

/// Postgres text-array path literal (`'{a,b}'`). Segments must satisfy
/// [`is_path_segment`].
pub fn json_path(segments: &[String]) -> String {
    format!("'{{{}}}'", segments.join(","))
}

/// Escapes wildcard metacharacters for a search-engine `wildcard` clause.
pub fn escape_wildcard(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_are_doubled() {
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
        assert_eq!(quote_literal("''"), "''''''");
    }

    #[test]
    fn test_injection_payloads_stay_inside_literal() {
        let payloads = [
            ("'; DROP TABLE users; --", "'''; DROP TABLE users; --'"),
            ("' OR '1'='1", "''' OR ''1''=''1'"),
            ("\\'; DELETE FROM users; --", "'''; DELETE FROM users; --'"),
            ("abc\\", "'abc'"),
            ("a\\\\'b", "'a\\''b'"),
            ("x\0' OR 1=1 --", "'x'' OR 1=1 --'"),
            ("$$; DROP TABLE t; $$", "'$$; DROP TABLE t; $$'"),
            ("1); DROP TABLE t; --", "'1); DROP TABLE t; --'"),
        ];
        for (payload, expected) in payloads {
            let quoted = quote_literal(payload);
            assert_eq!(quoted, expected, "payload {:?}", payload);

            // Strip the outer quotes: the body must contain only doubled quotes.
            let body = &quoted[1..quoted.len() - 1];
            assert_eq!(body.replace("''", "").find('\''), None, "payload {:?}", payload);
            assert!(!body.contains('\0'));
        }
    }

    #[test]
    fn test_backslash_sequences_collapse() {
        assert_eq!(collapse_backslashes(r"a\,b"), "a,b");
        assert_eq!(collapse_backslashes(r"a\\b"), r"a\b");
        assert_eq!(collapse_backslashes(r"trailing\"), "trailing");
        assert_eq!(escape_literal(r"it\'s"), "it''s");
    }

    #[test]
    fn test_like_escaping() {
        assert_eq!(escape_like("50%_off"), r"50\%\_off");
        assert_eq!(escape_like("it's"), "it''s");
        // an escaped backslash stays literal and cannot swallow the closing `%`
        assert_eq!(escape_like(r"dir\\"), r"dir\\");
        assert_eq!(format!("'%{}%'", escape_like(r"end\\")), r"'%end\\%'");
    }

    #[test]
    fn test_typed_values_keep_backslashes() {
        assert_eq!(quote_value(r"a\b"), r"'a\b'");
        assert_eq!(quote_value(r"it\'s"), r"'it\''s'");
        assert_eq!(quote_value("x\0' OR 1=1 --"), "'x'' OR 1=1 --'");
        assert_eq!(escape_like_value(r"a\b_%"), r"a\\b\_\%");
        assert_eq!(escape_like_value("O'Brien"), "O''Brien");
    }

    #[test]
    fn test_identifiers() {
        assert_eq!(quote_ident("age"), "age");
        assert_eq!(quote_ident("user"), "\"user\"");
        assert_eq!(quote_ident("CamelCase"), "\"CamelCase\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualified_ident(Some("users"), "age"), "users.age");
    }

    #[test]
    fn test_raw_literals() {
        assert!(is_raw_literal("42"));
        assert!(is_raw_literal("-3.5"));
        assert!(is_raw_literal("TRUE"));
        assert!(is_raw_literal("null"));
        assert!(!is_raw_literal("1 OR 1=1"));
        assert!(!is_raw_literal("now()"));
        assert!(!is_raw_literal("'x'"));
    }

    #[test]
    fn test_wildcard_escaping() {
        assert_eq!(escape_wildcard("a*b?c"), r"a\*b\?c");
    }
}
