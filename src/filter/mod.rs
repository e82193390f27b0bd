//! The filter language: `name:value` fragments joined with `&&` / `||` and
//! grouped with brackets, parsed against the table schema and rendered to SQL
//! text or a search-engine query body.
//!
//! ```text
//! age:>=18&&(status:active||status:trial)
//! ```

pub mod escape;
pub mod matcher;
mod parser;
pub mod search;
pub mod sql;
pub mod structure;
pub mod token;

pub use token::{ArgSpec, Sep, Token};

use crate::core::{Backend, DbError, Record, Result, SchemaRegistry};
use serde_json::Value;

/// Backend-specific predicate supplied verbatim by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Native {
    Where(String),
    Query(Value),
}

impl Native {
    pub fn backend(&self) -> Backend {
        match self {
            Native::Where(_) => Backend::Db,
            Native::Query(_) => Backend::Es,
        }
    }
}

/// Filter expression as supplied by callers.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterInput {
    Text(String),
    /// Fragments, implicitly AND-joined.
    List(Vec<String>),
    Native(Native),
}

impl FilterInput {
    /// Accepts a string, an array of strings, or
    /// `{"native": true, "where": "..."}` / `{"native": true, "query": {...}}`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(FilterInput::Text(String::new())),
            Value::String(text) => Ok(FilterInput::Text(text)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(DbError::Filter(format!(
                        "filter fragments must be strings, got {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()
                .map(FilterInput::List),
            Value::Object(mut map) => {
                if map.get("native") != Some(&Value::Bool(true)) {
                    return Err(DbError::Filter(
                        "filter objects must set \"native\": true".to_string(),
                    ));
                }
                match (map.remove("where"), map.remove("query")) {
                    (Some(Value::String(sql)), None) => Ok(FilterInput::Native(Native::Where(sql))),
                    (None, Some(query @ Value::Object(_))) => {
                        Ok(FilterInput::Native(Native::Query(query)))
                    }
                    _ => Err(DbError::Filter(
                        "native filters need exactly one of a \"where\" string or a \"query\" object"
                            .to_string(),
                    )),
                }
            }
            other => Err(DbError::Filter(format!("unsupported filter value {}", other))),
        }
    }

    /// Single expression for the parser; list fragments are bracketed when
    /// there is more than one.
    fn to_text(&self) -> Option<String> {
        match self {
            FilterInput::Text(text) => Some(text.clone()),
            FilterInput::List(fragments) => {
                let fragments: Vec<&str> = fragments
                    .iter()
                    .map(|f| f.trim())
                    .filter(|f| !f.is_empty())
                    .collect();
                Some(match fragments.as_slice() {
                    [single] => single.to_string(),
                    many => many
                        .iter()
                        .map(|f| format!("({})", f))
                        .collect::<Vec<_>>()
                        .join("&&"),
                })
            }
            FilterInput::Native(_) => None,
        }
    }
}

impl From<&str> for FilterInput {
    fn from(text: &str) -> Self {
        FilterInput::Text(text.to_string())
    }
}

impl From<String> for FilterInput {
    fn from(text: String) -> Self {
        FilterInput::Text(text)
    }
}

impl From<Vec<String>> for FilterInput {
    fn from(fragments: Vec<String>) -> Self {
        FilterInput::List(fragments)
    }
}

impl From<Vec<&str>> for FilterInput {
    fn from(fragments: Vec<&str>) -> Self {
        FilterInput::List(fragments.into_iter().map(str::to_string).collect())
    }
}

impl From<Native> for FilterInput {
    fn from(native: Native) -> Self {
        FilterInput::Native(native)
    }
}

/// A parsed filter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    /// Base table the filter was parsed against.
    pub table: String,
    /// Lexeme of every structure token.
    pub raw: Vec<String>,
    pub columns: Vec<ArgSpec>,
    pub structure: Vec<Token>,
    pub native: Option<Native>,
}

impl Filter {
    pub fn empty(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// `column IN (values)` built without going through the text syntax.
    pub fn values_in(
        schemas: &SchemaRegistry,
        table: &str,
        column: &str,
        values: &[String],
    ) -> Result<Self> {
        let schema = schemas.get(table)?;
        let def = schema.get_column(column).ok_or_else(|| {
            DbError::Filter(format!("unknown column '{}' in '{}'", column, table))
        })?;
        let arg = ArgSpec {
            name: column.to_string(),
            table: None,
            key_name: Vec::new(),
            values: values.iter().map(|v| v.replace('\\', "\\\\")).collect(),
            sep: Sep::Equals,
            column_type: def.column_type,
            case_insensitive: false,
            blank_to_null: false,
        };
        Ok(Self {
            table: table.to_string(),
            raw: vec![format!("{}:{}", column, values.join(","))],
            columns: vec![arg],
            structure: vec![Token::Arg(0)],
            native: None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.native.is_none() && self.structure.is_empty()
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    /// Tables referenced through `table.column` qualifiers other than the base table.
    pub fn joined_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = self
            .columns
            .iter()
            .filter_map(|c| c.table.as_deref())
            .filter(|t| *t != self.table)
            .collect();
        tables.sort_unstable();
        tables.dedup();
        tables
    }

    pub fn matches(&self, record: &Record) -> Result<bool> {
        matcher::matches(self, record)
    }

    pub fn to_sql(&self) -> Result<Option<String>> {
        sql::render(self)
    }

    pub fn to_search(&self) -> Result<Option<Value>> {
        search::render(self)
    }
}

/// Parses filter expressions against a set of table schemas.
#[derive(Debug, Clone, Default)]
pub struct FilterCompiler {
    schemas: SchemaRegistry,
}

impl FilterCompiler {
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self { schemas }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn parse(&self, table: &str, input: &FilterInput) -> Result<Filter> {
        match input {
            FilterInput::Native(native) => {
                self.schemas.get(table)?;
                Ok(Filter {
                    table: table.to_string(),
                    native: Some(native.clone()),
                    ..Filter::default()
                })
            }
            other => {
                let text = other.to_text().unwrap_or_default();
                parser::parse_text(&self.schemas, table, &text)
            }
        }
    }

    /// SQL predicate for `filter` ANDed with the authorization predicate.
    pub fn render_sql(&self, filter: &Filter, authorization: Option<&str>) -> Result<Option<String>> {
        let rendered = sql::render(filter)?;
        Ok(sql::merge(authorization, rendered.as_deref()))
    }

    /// Query body for `filter` ANDed with the authorization clause.
    pub fn render_search(&self, filter: &Filter, authorization: Option<&Value>) -> Result<Value> {
        let rendered = search::render(filter)?;
        Ok(search::merge(authorization.cloned(), rendered))
    }

    /// Renders for either backend, rejecting native filters of the other kind.
    pub fn render(
        &self,
        backend: Backend,
        filter: &Filter,
        authorization: Option<&crate::rules::Predicate>,
    ) -> Result<crate::rules::Predicate> {
        use crate::rules::Predicate;

        if let Some(native) = &filter.native {
            if native.backend() != backend {
                return Err(DbError::Filter(format!(
                    "native {} filter cannot run against the {} backend",
                    native.backend(),
                    backend
                )));
            }
        }
        match backend {
            Backend::Db => {
                let auth = authorization.and_then(Predicate::as_sql);
                Ok(Predicate::Sql(
                    self.render_sql(filter, auth)?.unwrap_or_else(|| "1 = 1".to_string()),
                ))
            }
            Backend::Es => {
                let auth = authorization.and_then(Predicate::as_search);
                Ok(Predicate::Search(self.render_search(filter, auth)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDef, ColumnType, TableSchema};
    use serde_json::json;

    fn compiler() -> FilterCompiler {
        let schemas = SchemaRegistry::new()
            .with_table(
                TableSchema::new("users", "id")
                    .column("id", ColumnDef::new(ColumnType::Text).primary())
                    .column("age", ColumnDef::new(ColumnType::Integer))
                    .column("status", ColumnDef::new(ColumnType::Text))
                    .column("email", ColumnDef::new(ColumnType::Text).case_insensitive())
                    .column("nickname", ColumnDef::new(ColumnType::Text).blank_to_null())
                    .column("data", ColumnDef::new(ColumnType::Jsonb)),
            )
            .unwrap();
        FilterCompiler::new(schemas)
    }

    #[test]
    fn test_end_to_end_sql_and_search() {
        let compiler = compiler();
        let filter = compiler
            .parse("users", &"age:>=18&&(status:active||status:trial)".into())
            .unwrap();

        assert_eq!(
            compiler.render_sql(&filter, None).unwrap().unwrap(),
            "age >= '18' AND (status = 'active' OR status = 'trial')"
        );
        assert_eq!(
            compiler.render_search(&filter, None).unwrap(),
            json!({"bool": {"must": [
                {"range": {"age": {"gte": "18"}}},
                {"bool": {"should": [
                    {"term": {"status": "active"}},
                    {"term": {"status": "trial"}}
                ], "minimum_should_match": 1}}
            ]}})
        );
    }

    #[test]
    fn test_list_input_is_bracketed() {
        let compiler = compiler();
        let input = FilterInput::from(vec!["age:>18", "status:a||status:b"]);
        let filter = compiler.parse("users", &input).unwrap();
        assert_eq!(
            filter.to_sql().unwrap().unwrap(),
            "(age > '18') AND (status = 'a' OR status = 'b')"
        );
    }

    #[test]
    fn test_native_filters_are_backend_bound() {
        let compiler = compiler();
        let input = FilterInput::from_value(json!({"native": true, "where": "age > 3"})).unwrap();
        let filter = compiler.parse("users", &input).unwrap();

        assert_eq!(
            compiler.render(Backend::Db, &filter, None).unwrap(),
            crate::rules::Predicate::Sql("age > 3".to_string())
        );
        let err = compiler.render(Backend::Es, &filter, None).unwrap_err();
        assert_eq!(err.code(), "FILTER_ERROR");
    }

    #[test]
    fn test_authorization_merge() {
        let compiler = compiler();
        let filter = compiler.parse("users", &"status:active".into()).unwrap();
        assert_eq!(
            compiler.render_sql(&filter, Some("(owner = 'u1')")).unwrap().unwrap(),
            "((owner = 'u1')) AND (status = 'active')"
        );
        let empty = compiler.parse("users", &"".into()).unwrap();
        assert_eq!(
            compiler.render_sql(&empty, Some("(owner = 'u1')")).unwrap().unwrap(),
            "(owner = 'u1')"
        );
        assert_eq!(compiler.render_sql(&empty, None).unwrap(), None);
    }

    #[test]
    fn test_column_flags() {
        let compiler = compiler();
        let filter = compiler.parse("users", &"email:A@X.io".into()).unwrap();
        assert_eq!(
            filter.to_sql().unwrap().unwrap(),
            "LOWER(email) = LOWER('A@X.io')"
        );

        let filter = compiler.parse("users", &"nickname:null".into()).unwrap();
        assert_eq!(filter.to_sql().unwrap().unwrap(), "nickname IS NULL");
        let filter = compiler.parse("users", &"nickname:!=".into()).unwrap();
        assert_eq!(filter.to_sql().unwrap().unwrap(), "nickname IS NOT NULL");
    }

    #[test]
    fn test_jsonb_rendering() {
        let compiler = compiler();
        let filter = compiler.parse("users", &"data.address.city:Oslo".into()).unwrap();
        assert_eq!(
            filter.to_sql().unwrap().unwrap(),
            "data #>> '{address,city}' = 'Oslo'"
        );
        assert_eq!(
            filter.to_search().unwrap().unwrap(),
            json!({"term": {"data.address.city": "Oslo"}})
        );

        let filter = compiler.parse("users", &r#"data:{"vip":true}"#.into()).unwrap();
        assert_eq!(filter.to_sql().unwrap().unwrap(), r#"data @> '{"vip":true}'::jsonb"#);
    }

    #[test]
    fn test_unknown_column_and_bad_raw_literal() {
        let compiler = compiler();
        let err = compiler.parse("users", &"missing:1".into()).unwrap_err();
        assert_eq!(err.code(), "FILTER_ERROR");

        let err = compiler.parse("users", &"age:=#1 OR 1=1".into()).unwrap_err();
        assert_eq!(err.code(), "FILTER_ERROR");

        let err = compiler.parse("users", &"age".into()).unwrap_err();
        assert_eq!(err.code(), "FILTER_SYNTAX_ERROR");

        let err = compiler.parse("users", &"status:x; DROP TABLE users".into());
        assert_eq!(
            err.unwrap().to_sql().unwrap().unwrap(),
            "status = 'x; DROP TABLE users'"
        );
    }

    #[test]
    fn test_matches_in_memory() {
        let compiler = compiler();
        let filter = compiler
            .parse("users", &"age:>=18&&(status:active||email:%@x.io)".into())
            .unwrap();
        let row = |v: Value| v.as_object().cloned().unwrap();

        assert!(filter.matches(&row(json!({"age": 20, "status": "active"}))).unwrap());
        assert!(filter.matches(&row(json!({"age": 20, "email": "A@X.IO"}))).unwrap());
        assert!(!filter.matches(&row(json!({"age": 17, "status": "active"}))).unwrap());
        assert!(!filter.matches(&row(json!({"status": "active"}))).unwrap());
    }
}
