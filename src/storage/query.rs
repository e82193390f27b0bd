use crate::core::value::{compare, key_of, lookup_record};
use crate::core::{DbError, Key, Record, Result};
use crate::filter::Filter;
use crate::filter::escape::{is_path_segment, json_path, qualified_ident, quote_ident};
use crate::rules::{Condition, RuleEvaluator};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// `"age"`, `"-age"`, `"age desc"` or `"age asc"`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (field, descending) = if let Some(field) = text.strip_prefix('-') {
            (field, true)
        } else {
            match text.rsplit_once(char::is_whitespace) {
                Some((field, dir)) if dir.eq_ignore_ascii_case("desc") => (field.trim(), true),
                Some((field, dir)) if dir.eq_ignore_ascii_case("asc") => (field.trim(), false),
                _ => (text, false),
            }
        };
        if field.is_empty() || !field.split('.').all(is_path_segment) {
            return Err(DbError::Filter(format!("invalid sort field '{}'", text)));
        }
        Ok(Self {
            field: field.to_string(),
            descending,
        })
    }

    fn to_sql(&self) -> String {
        format!(
            "{} {}",
            sql_field(&self.field),
            if self.descending { "DESC" } else { "ASC" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateFn::Count => "COUNT",
            AggregateFn::Sum => "SUM",
            AggregateFn::Min => "MIN",
            AggregateFn::Max => "MAX",
            AggregateFn::Avg => "AVG",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFn,
    /// `None` counts rows.
    #[serde(default)]
    pub field: Option<String>,
    pub alias: String,
}

impl Aggregate {
    pub fn count(alias: impl Into<String>) -> Self {
        Self {
            function: AggregateFn::Count,
            field: None,
            alias: alias.into(),
        }
    }

    pub fn of(function: AggregateFn, field: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            function,
            field: Some(field.into()),
            alias: alias.into(),
        }
    }

    fn to_sql(&self) -> String {
        let arg = self.field.as_deref().map(sql_field).unwrap_or_else(|| "*".to_string());
        format!("{}({}) AS {}", self.function, arg, quote_ident(&self.alias))
    }

    fn compute(&self, rows: &[&Record]) -> Value {
        let values: Vec<&Value> = match &self.field {
            None => return Value::from(rows.len() as u64),
            Some(field) => rows
                .iter()
                .filter_map(|r| lookup_record(r, field))
                .filter(|v| !v.is_null())
                .collect(),
        };
        match self.function {
            AggregateFn::Count => Value::from(values.len() as u64),
            AggregateFn::Min => values
                .iter()
                .copied()
                .min_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
                .cloned()
                .unwrap_or(Value::Null),
            AggregateFn::Max => values
                .iter()
                .copied()
                .max_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
                .cloned()
                .unwrap_or(Value::Null),
            AggregateFn::Sum | AggregateFn::Avg => {
                let numbers: Vec<f64> = values.iter().filter_map(|v| number(v)).collect();
                if numbers.is_empty() {
                    return Value::Null;
                }
                let sum: f64 = numbers.iter().sum();
                let result = if self.function == AggregateFn::Sum {
                    sum
                } else {
                    sum / numbers.len() as f64
                };
                json_number(result)
            }
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// `LEFT JOIN table ON table.referenced_column = base.column`. The joined row
/// is attached to each result under the joined table's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub table: String,
    pub column: String,
    pub referenced_column: String,
}

impl Join {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Row conditions the in-memory store evaluates directly.
#[derive(Debug, Clone)]
pub struct RowConditions {
    pub rules: Arc<RuleEvaluator>,
    pub conditions: Vec<Condition>,
}

impl RowConditions {
    pub fn permits(&self, record: &Record) -> Result<bool> {
        for condition in &self.conditions {
            if !self.rules.evaluate(condition, record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// A read against the relational store.
///
/// `sql`/`count_sql` are the rendered statements; the structured fields carry
/// the same request for stores that do not speak SQL.
#[derive(Debug, Clone)]
pub struct Query {
    pub table: String,
    pub primary_key: String,
    pub sql: String,
    pub count_sql: String,
    pub filter: Filter,
    pub conditions: Option<RowConditions>,
    pub keys: Option<Vec<Key>>,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub group: Vec<String>,
    pub aggregates: Vec<Aggregate>,
    pub joins: Vec<Join>,
}

impl Query {
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            filter: Filter::empty(table.clone()),
            table,
            primary_key: primary_key.into(),
            sql: String::new(),
            count_sql: String::new(),
            conditions: None,
            keys: None,
            sort: Vec::new(),
            limit: None,
            offset: 0,
            group: Vec::new(),
            aggregates: Vec::new(),
            joins: Vec::new(),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        !self.group.is_empty() || !self.aggregates.is_empty()
    }

    /// Fills `sql` and `count_sql` for the given `WHERE` predicate.
    pub fn render(mut self, predicate: Option<&str>) -> Self {
        let mut from = quote_ident(&self.table);
        for join in &self.joins {
            from.push_str(&format!(
                " LEFT JOIN {} ON {} = {}",
                quote_ident(&join.table),
                qualified_ident(Some(&join.table), &join.referenced_column),
                qualified_ident(Some(&self.table), &join.column)
            ));
        }
        let mut where_clause = String::new();
        if let Some(predicate) = predicate {
            where_clause = format!(" WHERE {}", predicate);
        }
        let group_by = if self.group.is_empty() {
            String::new()
        } else {
            let fields: Vec<String> = self.group.iter().map(|g| sql_field(g)).collect();
            format!(" GROUP BY {}", fields.join(", "))
        };

        let projection = if self.is_aggregate() {
            let mut columns: Vec<String> = self.group.iter().map(|g| sql_field(g)).collect();
            columns.extend(self.aggregates.iter().map(Aggregate::to_sql));
            columns.join(", ")
        } else if self.joins.is_empty() {
            "*".to_string()
        } else {
            format!("{}.*", quote_ident(&self.table))
        };

        let mut sql = format!("SELECT {} FROM {}{}{}", projection, from, where_clause, group_by);
        if !self.sort.is_empty() {
            let order: Vec<String> = self.sort.iter().map(SortKey::to_sql).collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if self.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", self.offset));
        }

        self.count_sql = if self.group.is_empty() {
            format!("SELECT COUNT(*) AS total FROM {}{}", from, where_clause)
        } else {
            format!(
                "SELECT COUNT(*) AS total FROM (SELECT 1 FROM {}{}{}) AS grouped",
                from, where_clause, group_by
            )
        };
        self.sql = sql;
        self
    }

    /// Rows of `rows` this query selects, before sorting and paging.
    pub fn select<'a>(&self, rows: impl Iterator<Item = &'a Record>) -> Result<Vec<Record>> {
        let mut selected = Vec::new();
        for row in rows {
            if let Some(keys) = &self.keys {
                let key = row.get(&self.primary_key).map(key_of);
                match key {
                    Some(Ok(key)) if keys.contains(&key) => {}
                    _ => continue,
                }
            }
            if !self.filter.matches(row)? {
                continue;
            }
            if let Some(conditions) = &self.conditions {
                if !conditions.permits(row)? {
                    continue;
                }
            }
            selected.push(row.clone());
        }
        Ok(selected)
    }

    /// Groups and aggregates `rows`; a no-op for plain queries.
    pub fn aggregate(&self, rows: Vec<Record>) -> Vec<Record> {
        if !self.is_aggregate() {
            return rows;
        }
        let mut groups: BTreeMap<String, (Record, Vec<&Record>)> = BTreeMap::new();
        for row in &rows {
            let mut head = Record::new();
            for field in &self.group {
                head.insert(
                    field.clone(),
                    lookup_record(row, field).cloned().unwrap_or(Value::Null),
                );
            }
            let id = Value::Object(head.clone()).to_string();
            groups.entry(id).or_insert_with(|| (head, Vec::new())).1.push(row);
        }
        if groups.is_empty() && self.group.is_empty() {
            groups.insert(String::new(), (Record::new(), Vec::new()));
        }
        groups
            .into_values()
            .map(|(mut head, members)| {
                for aggregate in &self.aggregates {
                    head.insert(aggregate.alias.clone(), aggregate.compute(&members));
                }
                head
            })
            .collect()
    }

    /// Sorts then applies offset and limit.
    pub fn page(&self, mut rows: Vec<Record>) -> Vec<Record> {
        sort_records(&mut rows, &self.sort);
        let rows = rows.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

/// Stable multi-key sort; nulls and missing values sort last in either direction.
pub fn sort_records(rows: &mut [Record], sort: &[SortKey]) {
    if sort.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for key in sort {
            let left = lookup_record(a, &key.field).filter(|v| !v.is_null());
            let right = lookup_record(b, &key.field).filter(|v| !v.is_null());
            let ordering = match (left, right) {
                (Some(l), Some(r)) => {
                    let o = compare(l, r).unwrap_or(Ordering::Equal);
                    if key.descending { o.reverse() } else { o }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Column reference for a possibly dotted field (`data.a.b` reads jsonb text).
fn sql_field(field: &str) -> String {
    match field.split_once('.') {
        Some((column, path)) => {
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            format!(
                "{} #>> {}",
                quote_ident(column),
                json_path(&segments)
            )
        }
        None => quote_ident(field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        [
            json!({"id": "1", "team": "a", "score": 10}),
            json!({"id": "2", "team": "b", "score": 5}),
            json!({"id": "3", "team": "a", "score": null}),
            json!({"id": "4", "team": "a", "score": 7}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
    }

    #[test]
    fn test_sort_key_parse() {
        assert_eq!(SortKey::parse("-age").unwrap(), SortKey::desc("age"));
        assert_eq!(SortKey::parse("age DESC").unwrap(), SortKey::desc("age"));
        assert_eq!(SortKey::parse(" age ").unwrap(), SortKey::asc("age"));
        assert!(SortKey::parse("age; drop").is_err());
    }

    #[test]
    fn test_render_sql() {
        let mut query = Query::new("users", "id");
        query.sort = vec![SortKey::desc("age")];
        query.limit = Some(10);
        query.offset = 20;
        let query = query.render(Some("age >= '18'"));
        assert_eq!(
            query.sql,
            "SELECT * FROM users WHERE age >= '18' ORDER BY age DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(query.count_sql, "SELECT COUNT(*) AS total FROM users WHERE age >= '18'");
    }

    #[test]
    fn test_render_join_and_group() {
        let mut query = Query::new("users", "id");
        query.joins = vec![Join::new("orgs", "org_id", "id")];
        let query = query.render(None);
        assert_eq!(
            query.sql,
            "SELECT users.* FROM users LEFT JOIN orgs ON orgs.id = users.org_id"
        );

        let mut query = Query::new("users", "id");
        query.group = vec!["team".into()];
        query.aggregates = vec![Aggregate::count("n")];
        let query = query.render(None);
        assert_eq!(query.sql, "SELECT team, COUNT(*) AS n FROM users GROUP BY team");
        assert_eq!(
            query.count_sql,
            "SELECT COUNT(*) AS total FROM (SELECT 1 FROM users GROUP BY team) AS grouped"
        );
    }

    #[test]
    fn test_page_sorts_nulls_last() {
        let mut query = Query::new("users", "id");
        query.sort = vec![SortKey::desc("score")];
        let ids: Vec<Value> = query
            .page(rows())
            .into_iter()
            .map(|r| r["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("1"), json!("4"), json!("2"), json!("3")]);

        query.offset = 1;
        query.limit = Some(2);
        assert_eq!(query.page(rows()).len(), 2);
    }

    #[test]
    fn test_aggregate_groups() {
        let mut query = Query::new("users", "id");
        query.group = vec!["team".into()];
        query.aggregates = vec![
            Aggregate::count("n"),
            Aggregate::of(AggregateFn::Sum, "score", "total"),
            Aggregate::of(AggregateFn::Max, "score", "best"),
        ];
        let out = query.aggregate(rows());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["team"], json!("a"));
        assert_eq!(out[0]["n"], json!(3));
        assert_eq!(out[0]["total"], json!(17));
        assert_eq!(out[0]["best"], json!(10));
        assert_eq!(out[1]["n"], json!(1));
    }

    #[test]
    fn test_select_by_keys() {
        let mut query = Query::new("users", "id");
        query.keys = Some(vec!["2".into(), "4".into()]);
        let selected = query.select(rows().iter()).unwrap();
        assert_eq!(selected.len(), 2);
    }
}
