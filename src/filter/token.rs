use crate::core::ColumnType;
use crate::filter::escape::collapse_backslashes;
use std::fmt;

/// Comparison operator of a single filter argument, identified by a fixed
/// two-character code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sep {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    StartsWith,
    EndsWith,
    KeyExists,
    RawEquals,
    IsNull,
    NotNull,
    JsonContains,
    JsonNotContains,
}

impl Sep {
    pub const ALL: [Sep; 15] = [
        Sep::Equals,
        Sep::NotEquals,
        Sep::GreaterThan,
        Sep::LessThan,
        Sep::GreaterOrEqual,
        Sep::LessOrEqual,
        Sep::Contains,
        Sep::StartsWith,
        Sep::EndsWith,
        Sep::KeyExists,
        Sep::RawEquals,
        Sep::IsNull,
        Sep::NotNull,
        Sep::JsonContains,
        Sep::JsonNotContains,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Sep::Equals => "==",
            Sep::NotEquals => "!=",
            Sep::GreaterThan => ">>",
            Sep::LessThan => "<<",
            Sep::GreaterOrEqual => ">=",
            Sep::LessOrEqual => "<=",
            Sep::Contains => "%%",
            Sep::StartsWith => "a%",
            Sep::EndsWith => "%a",
            Sep::KeyExists => "??",
            Sep::RawEquals => "=#",
            Sep::IsNull => "^^",
            Sep::NotNull => "!^",
            Sep::JsonContains => "@>",
            Sep::JsonNotContains => "!@",
        }
    }

    pub fn from_code(code: &str) -> Option<Sep> {
        Self::ALL.iter().copied().find(|sep| sep.code() == code)
    }

    /// Negated operators combine multiple values with AND, the others with OR.
    pub fn is_negated(&self) -> bool {
        matches!(self, Sep::NotEquals | Sep::JsonNotContains)
    }

    /// Operators that take no value.
    pub fn is_null_check(&self) -> bool {
        matches!(self, Sep::IsNull | Sep::NotNull)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(self, Sep::Contains | Sep::StartsWith | Sep::EndsWith)
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Sep::GreaterThan | Sep::LessThan | Sep::GreaterOrEqual | Sep::LessOrEqual
        )
    }
}

impl fmt::Display for Sep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One `name:value` fragment, resolved against the table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    /// Column name, without table qualifier or key path.
    pub name: String,
    /// Table qualifier, when written as `table.column`.
    pub table: Option<String>,
    /// Key path inside a jsonb column (`data.address.city` gives `[address, city]`).
    pub key_name: Vec<String>,
    /// Values with their backslash escapes still in place; comma separated
    /// input yields several.
    pub values: Vec<String>,
    pub sep: Sep,
    pub column_type: ColumnType,
    pub case_insensitive: bool,
    pub blank_to_null: bool,
}

impl ArgSpec {
    /// Values with escapes resolved.
    pub fn texts(&self) -> Vec<String> {
        self.values.iter().map(|v| collapse_backslashes(v)).collect()
    }

    pub fn is_jsonb(&self) -> bool {
        self.column_type == ColumnType::Jsonb
    }

    /// Dotted field path (`column.key.path`), as used by the search index and
    /// in-memory lookups.
    pub fn field_path(&self) -> String {
        let mut path = self.name.clone();
        for key in &self.key_name {
            path.push('.');
            path.push_str(key);
        }
        path
    }
}

/// Element of the flattened structure stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Index into [`Filter::columns`](super::Filter::columns).
    Arg(usize),
    And,
    Or,
    Open,
    Close,
}

impl Token {
    pub fn is_operator(&self) -> bool {
        matches!(self, Token::And | Token::Or)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Arg(_) => f.write_str("arg"),
            Token::And => f.write_str("&&"),
            Token::Or => f.write_str("||"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique_and_two_chars() {
        for sep in Sep::ALL {
            assert_eq!(sep.code().len(), 2);
            assert_eq!(Sep::from_code(sep.code()), Some(sep));
        }
        assert_eq!(Sep::from_code("=="), Some(Sep::Equals));
        assert_eq!(Sep::from_code("xx"), None);
    }
}
