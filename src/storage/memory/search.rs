use crate::core::value::{as_text, compare, lookup_record, loosely_equal};
use crate::core::{BackendKind, DbError, Key, Record, Result};
use crate::storage::{BulkOp, SearchHits, SearchIndex, SearchRequest, sort_records};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// Search index kept in process memory.
///
/// Understands the query-body subset the filter compiler and rule evaluator
/// generate: `match_all`, `bool`, `term`, `terms`, `range`, `wildcard` and
/// `exists`.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    indices: RwLock<HashMap<String, BTreeMap<Key, Record>>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Record> {
        let indices = self.indices.read().await;
        indices.get(index).and_then(|docs| docs.get(id)).cloned()
    }

    pub async fn len(&self, index: &str) -> usize {
        let indices = self.indices.read().await;
        indices.get(index).map(BTreeMap::len).unwrap_or(0)
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn bulk(&self, operations: Vec<BulkOp>) -> Result<()> {
        let mut indices = self.indices.write().await;
        let count = operations.len();
        for op in operations {
            match op {
                BulkOp::Index {
                    index,
                    id,
                    document,
                } => {
                    indices.entry(index).or_default().insert(id, document);
                }
                BulkOp::Delete { index, id } => {
                    if let Some(docs) = indices.get_mut(&index) {
                        docs.remove(&id);
                    }
                }
            }
        }
        tracing::debug!(operations = count, "bulk indexed");
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> Result<SearchHits> {
        let indices = self.indices.read().await;
        let mut hits = Vec::new();
        if let Some(docs) = indices.get(&request.index) {
            for doc in docs.values() {
                if evaluate(&request.query, doc)? {
                    hits.push(doc.clone());
                }
            }
        }
        let total = hits.len() as u64;
        sort_records(&mut hits, &request.sort);
        let items = hits.into_iter().skip(request.from);
        let items = match request.size {
            Some(size) => items.take(size).collect(),
            None => items.collect(),
        };
        Ok(SearchHits { total, items })
    }
}

fn unsupported(clause: &Value) -> DbError {
    DbError::backend(
        BackendKind::Search,
        format!("unsupported query clause: {}", clause),
    )
}

/// The single `{field: spec}` pair of a leaf clause.
fn single_field(body: &Value) -> Option<(&String, &Value)> {
    let map = body.as_object()?;
    if map.len() == 1 { map.iter().next() } else { None }
}

/// Document values at `field`; arrays contribute each element.
fn field_values<'a>(doc: &'a Record, field: &str) -> Vec<&'a Value> {
    match lookup_record(doc, field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter(|v| !v.is_null()).collect(),
        Some(value) => vec![value],
    }
}

fn term_matches(actual: &Value, expected: &Value, case_insensitive: bool) -> bool {
    if case_insensitive {
        return match (as_text(actual), as_text(expected)) {
            (Some(a), Some(e)) => a.to_lowercase() == e.to_lowercase(),
            _ => false,
        };
    }
    loosely_equal(actual, expected)
}

/// `{value, case_insensitive}` or a bare value.
fn value_spec(spec: &Value) -> (&Value, bool) {
    match spec {
        Value::Object(map) if map.contains_key("value") => (
            &map["value"],
            map.get("case_insensitive").and_then(Value::as_bool).unwrap_or(false),
        ),
        other => (other, false),
    }
}

fn wildcard_regex(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    let mut regex = String::with_capacity(pattern.len() + 8);
    if case_insensitive {
        regex.push_str("(?i)");
    }
    regex.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    regex.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex).map_err(|e| DbError::backend(BackendKind::Search, e.to_string()))
}

fn clauses(body: &Map<String, Value>, name: &str) -> Vec<Value> {
    match body.get(name) {
        Some(Value::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
        None => Vec::new(),
    }
}

pub(crate) fn evaluate(query: &Value, doc: &Record) -> Result<bool> {
    let Some((kind, body)) = single_field(query) else {
        return Err(unsupported(query));
    };

    match kind.as_str() {
        "match_all" => Ok(true),
        "bool" => {
            let body = body.as_object().ok_or_else(|| unsupported(query))?;
            for clause in clauses(body, "must").iter().chain(&clauses(body, "filter")) {
                if !evaluate(clause, doc)? {
                    return Ok(false);
                }
            }
            for clause in &clauses(body, "must_not") {
                if evaluate(clause, doc)? {
                    return Ok(false);
                }
            }
            let should = clauses(body, "should");
            if should.is_empty() {
                return Ok(true);
            }
            let required = body
                .get("minimum_should_match")
                .and_then(Value::as_u64)
                .unwrap_or(if body.contains_key("must") || body.contains_key("filter") {
                    0
                } else {
                    1
                });
            let mut matched = 0;
            for clause in &should {
                if evaluate(clause, doc)? {
                    matched += 1;
                }
            }
            Ok(matched >= required)
        }
        "term" => {
            let (field, spec) = single_field(body).ok_or_else(|| unsupported(query))?;
            let (expected, ci) = value_spec(spec);
            Ok(field_values(doc, field)
                .into_iter()
                .any(|actual| term_matches(actual, expected, ci)))
        }
        "terms" => {
            let (field, spec) = single_field(body).ok_or_else(|| unsupported(query))?;
            let expected = spec.as_array().ok_or_else(|| unsupported(query))?;
            Ok(field_values(doc, field)
                .into_iter()
                .any(|actual| expected.iter().any(|e| term_matches(actual, e, false))))
        }
        "range" => {
            let (field, spec) = single_field(body).ok_or_else(|| unsupported(query))?;
            let bounds = spec.as_object().ok_or_else(|| unsupported(query))?;
            Ok(field_values(doc, field).into_iter().any(|actual| {
                bounds.iter().all(|(op, bound)| {
                    let ordering = compare(actual, bound);
                    match op.as_str() {
                        "gt" => ordering == Some(Ordering::Greater),
                        "gte" => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                        "lt" => ordering == Some(Ordering::Less),
                        "lte" => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                        _ => false,
                    }
                })
            }))
        }
        "wildcard" => {
            let (field, spec) = single_field(body).ok_or_else(|| unsupported(query))?;
            let (pattern, ci) = value_spec(spec);
            let pattern = pattern.as_str().ok_or_else(|| unsupported(query))?;
            let regex = wildcard_regex(pattern, ci)?;
            Ok(field_values(doc, field)
                .into_iter()
                .filter_map(as_text)
                .any(|text| regex.is_match(&text)))
        }
        "exists" => {
            let field = body
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| unsupported(query))?;
            Ok(!field_values(doc, field).is_empty())
        }
        _ => Err(unsupported(query)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SortKey;
    use serde_json::json;

    fn doc(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_bool_query() {
        let d = doc(json!({"age": 20, "status": "trial", "tags": ["x", "y"]}));
        let query = json!({"bool": {"must": [
            {"range": {"age": {"gte": "18"}}},
            {"bool": {"should": [{"term": {"status": "active"}}, {"term": {"status": "trial"}}], "minimum_should_match": 1}}
        ]}});
        assert!(evaluate(&query, &d).unwrap());
        assert!(evaluate(&json!({"term": {"tags": "y"}}), &d).unwrap());
        assert!(!evaluate(&json!({"bool": {"must_not": [{"exists": {"field": "age"}}]}}), &d).unwrap());
    }

    #[test]
    fn test_wildcard_and_case() {
        let d = doc(json!({"name": "John*Smith"}));
        assert!(evaluate(&json!({"wildcard": {"name": {"value": r"john\**", "case_insensitive": true}}}), &d).unwrap());
        assert!(!evaluate(&json!({"wildcard": {"name": {"value": "john*"}}}), &d).unwrap());
        assert!(evaluate(&json!({"term": {"name": {"value": "JOHN*SMITH", "case_insensitive": true}}}), &d).unwrap());
    }

    #[test]
    fn test_unknown_clause_is_backend_error() {
        let err = evaluate(&json!({"fuzzy": {"a": "b"}}), &doc(json!({}))).unwrap_err();
        assert_eq!(err.code(), "BACKEND_ERROR");
    }

    #[tokio::test]
    async fn test_search_pages_and_counts() {
        let index = MemorySearchIndex::new();
        let ops = (1..=5)
            .map(|i| BulkOp::Index {
                index: "users".into(),
                id: i.to_string(),
                document: doc(json!({"id": i, "n": i})),
            })
            .collect();
        index.bulk(ops).await.unwrap();
        index
            .bulk(vec![BulkOp::Delete { index: "users".into(), id: "5".into() }])
            .await
            .unwrap();

        let hits = index
            .search(&SearchRequest {
                index: "users".into(),
                query: json!({"match_all": {}}),
                sort: vec![SortKey::desc("n")],
                from: 1,
                size: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(hits.total, 4);
        assert_eq!(hits.items[0]["n"], json!(3));
        assert_eq!(hits.items.len(), 2);
    }
}
