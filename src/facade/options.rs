use crate::access::Access;
use crate::filter::FilterInput;
use crate::storage::{Aggregate, Join, SortKey};
use serde::{Deserialize, Serialize};

/// Which backend a search runs against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Db,
    Es,
    /// The search index when the table is indexed and the request has no
    /// joins or grouping, the relational store otherwise.
    #[default]
    Auto,
}

impl SearchType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "db" => Some(SearchType::Db),
            "es" => Some(SearchType::Es),
            "auto" => Some(SearchType::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub access: Access,
    /// Properties to return; the primary key is always returned.
    pub fields: Option<Vec<String>>,
    pub includes: Vec<String>,
    pub for_update: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn include(mut self, id: impl Into<String>) -> Self {
        self.includes.push(id.into());
        self
    }

    pub fn for_update(mut self) -> Self {
        self.for_update = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub access: Access,
    /// Properties the payload may carry. Validation is narrowed to them.
    pub fields: Option<Vec<String>>,
    pub ignore_read_only: bool,
    /// Recorded on audit entries.
    pub actor: Option<String>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn ignore_read_only(mut self) -> Self {
        self.ignore_read_only = true;
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub access: Access,
    pub filter: Option<FilterInput>,
    pub fields: Option<Vec<String>>,
    pub includes: Vec<String>,
    pub sort: Vec<SortKey>,
    /// Defaults to `default_limit`, capped at `max_limit`.
    pub limit: Option<usize>,
    pub offset: usize,
    pub group: Vec<String>,
    pub aggregates: Vec<Aggregate>,
    pub joins: Vec<Join>,
    /// Defaults to the configured `default_search_type`.
    pub search_type: Option<SearchType>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn filter(mut self, filter: impl Into<FilterInput>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn include(mut self, id: impl Into<String>) -> Self {
        self.includes.push(id.into());
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn group(mut self, field: impl Into<String>) -> Self {
        self.group.push(field.into());
        self
    }

    pub fn aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregates.push(aggregate);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = Some(search_type);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Overrides the configured `rollback_on_error`.
    pub rollback_on_error: Option<bool>,
}

impl CommitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rollback_on_error(mut self, rollback: bool) -> Self {
        self.rollback_on_error = Some(rollback);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_type_parse() {
        assert_eq!(SearchType::parse("ES"), Some(SearchType::Es));
        assert_eq!(SearchType::parse("auto"), Some(SearchType::Auto));
        assert_eq!(SearchType::parse("solr"), None);
        assert_eq!(
            serde_json::to_value(SearchType::Db).unwrap(),
            serde_json::json!("db")
        );
    }
}
