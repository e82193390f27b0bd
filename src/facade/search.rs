use super::Store;
use super::options::{SearchOptions, SearchType};
use crate::access::Authorization;
use crate::core::value::record_key;
use crate::core::{Action, Backend, DbError, Key, OperationContext, Record, Result, TableSchema};
use crate::filter::Filter;
use crate::rules::Predicate;
use crate::storage::{Join, Query, RowConditions, SearchRequest, SortKey};
use serde::Serialize;

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub sort: Vec<SortKey>,
    pub offset: usize,
    pub limit: usize,
    /// Matches across all pages.
    pub total: u64,
    pub items: Vec<Record>,
}

impl Store {
    pub async fn search(&self, table: &str, options: &SearchOptions) -> Result<SearchResult> {
        self.run_search(table, options, true)
            .await
            .operation("search")
    }

    /// Number of rows (or groups) the search matches.
    pub async fn count(&self, table: &str, options: &SearchOptions) -> Result<u64> {
        self.run_search(table, options, false)
            .await
            .map(|result| result.total)
            .operation("count")
    }

    async fn run_search(
        &self,
        table: &str,
        options: &SearchOptions,
        with_items: bool,
    ) -> Result<SearchResult> {
        let inner = &self.inner;
        let schema = inner.schemas.get(table)?;
        let auth = self.authorize(&options.access, table, Action::Read)?;
        let filter = match &options.filter {
            Some(input) => inner.compiler.parse(table, input)?,
            None => Filter::empty(table),
        };
        let limit = options
            .limit
            .unwrap_or(inner.config.default_limit)
            .min(inner.config.max_limit);
        let joins = self.joins_for(&schema, &filter, &options.joins)?;
        check_sort(&schema, options, &joins)?;

        let (total, items) = match self.backend_for(&schema, &auth, &filter, options, &joins)? {
            Backend::Db => {
                let mut query = self.relational_query(&schema, &auth, filter, joins)?;
                query.sort = options.sort.clone();
                query.limit = Some(limit);
                query.offset = options.offset;
                query.group = options.group.clone();
                query.aggregates = options.aggregates.clone();
                let predicate = self.where_clause(&auth, &query.filter)?;
                let query = query.render(predicate.as_deref());
                tracing::debug!(sql = %query.sql, count_sql = %query.count_sql, "relational search");

                let total = inner.relational.count(&query).await?;
                let items = if with_items {
                    inner.relational.select(&query).await?
                } else {
                    Vec::new()
                };
                (total, items)
            }
            Backend::Es => {
                let clause = inner.engine.authorized_filter(&auth, Backend::Es)?;
                let body = inner.compiler.render(Backend::Es, &filter, clause.as_ref())?;
                let query = body.as_search().cloned().ok_or_else(|| {
                    DbError::Internal("search rendering produced no query body".to_string())
                })?;
                let request = SearchRequest {
                    index: table.to_string(),
                    query,
                    sort: options.sort.clone(),
                    from: options.offset,
                    size: Some(if with_items { limit } else { 0 }),
                };
                tracing::debug!(index = table, query = %request.query, "index search");
                let hits = inner.search.search(&request).await?;
                (hits.total, hits.items)
            }
        };

        let items = if with_items && options.group.is_empty() && options.aggregates.is_empty() {
            let mut shaped = Vec::with_capacity(items.len());
            for item in items {
                shaped.push(self.present(&schema, &auth, item, options.fields.as_deref())?);
            }
            self.expand_includes(&schema, &mut shaped, &options.includes)
                .await?;
            shaped
        } else {
            items
        };

        Ok(SearchResult {
            sort: options.sort.clone(),
            offset: options.offset,
            limit,
            total,
            items,
        })
    }

    fn backend_for(
        &self,
        schema: &TableSchema,
        auth: &Authorization,
        filter: &Filter,
        options: &SearchOptions,
        joins: &[Join],
    ) -> Result<Backend> {
        let relational_only =
            !joins.is_empty() || !options.group.is_empty() || !options.aggregates.is_empty();
        let requested = options
            .search_type
            .unwrap_or(self.inner.config.default_search_type);
        match requested {
            SearchType::Db => Ok(Backend::Db),
            SearchType::Es => {
                if !schema.es_enabled {
                    return Err(DbError::Configuration(format!(
                        "table '{}' is not search-indexed",
                        schema.name
                    )));
                }
                if relational_only {
                    return Err(DbError::Filter(
                        "joins, grouping and aggregates need the relational store".to_string(),
                    ));
                }
                Ok(Backend::Es)
            }
            SearchType::Auto => {
                if let Some(native) = &filter.native {
                    return Ok(native.backend());
                }
                let indexable = schema.es_enabled
                    && !relational_only
                    && self
                        .inner
                        .engine
                        .authorized_filter(auth, Backend::Es)
                        .is_ok();
                Ok(if indexable { Backend::Es } else { Backend::Db })
            }
        }
    }

    /// Requested joins plus one per table the filter references through a
    /// `source` relation.
    fn joins_for(&self, schema: &TableSchema, filter: &Filter, requested: &[Join]) -> Result<Vec<Join>> {
        let mut joins = requested.to_vec();
        for join in &joins {
            self.inner.schemas.get(&join.table)?;
        }
        for table in filter.joined_tables() {
            if joins.iter().any(|j| j.table == table) {
                continue;
            }
            let relation = schema
                .includes
                .source
                .values()
                .find(|r| r.table == table)
                .ok_or_else(|| {
                    DbError::Filter(format!(
                        "'{}' has no relation to '{}' to join on",
                        schema.name, table
                    ))
                })?;
            joins.push(Join::new(
                &relation.table,
                &relation.column,
                &relation.referenced_column,
            ));
        }
        Ok(joins)
    }

    /// A relational read of `filter` restricted by the caller's row conditions.
    fn relational_query(
        &self,
        schema: &TableSchema,
        auth: &Authorization,
        filter: Filter,
        joins: Vec<Join>,
    ) -> Result<Query> {
        if let Some(native) = &filter.native {
            if native.backend() != Backend::Db {
                return Err(DbError::Filter(
                    "native search queries cannot run against the relational store".to_string(),
                ));
            }
        }
        let mut query = Query::new(&schema.name, &schema.primary_key);
        query.filter = filter;
        query.joins = joins;
        if auth.has_conditions() {
            query.conditions = Some(RowConditions {
                rules: self.inner.engine.rules().clone(),
                conditions: auth.conditions.clone(),
            });
        }
        Ok(query)
    }

    /// `WHERE` predicate: the row conditions ANDed with the filter.
    fn where_clause(&self, auth: &Authorization, filter: &Filter) -> Result<Option<String>> {
        let conditions = self.inner.engine.authorized_filter(auth, Backend::Db)?;
        self.inner
            .compiler
            .render_sql(filter, conditions.as_ref().and_then(Predicate::as_sql))
    }

    /// Primary keys of the rows `filter` selects for the caller.
    pub(super) async fn matching_keys(
        &self,
        schema: &TableSchema,
        auth: &Authorization,
        filter: Filter,
    ) -> Result<Vec<Key>> {
        let joins = self.joins_for(schema, &filter, &[])?;
        let query = self.relational_query(schema, auth, filter, joins)?;
        let predicate = self.where_clause(auth, &query.filter)?;
        let query = query.render(predicate.as_deref());
        tracing::debug!(sql = %query.sql, "selecting keys");
        self.inner
            .relational
            .select(&query)
            .await?
            .iter()
            .map(|row| record_key(row, &schema.primary_key, &schema.name))
            .collect()
    }
}

/// Sort fields must name a column, a joined table's column, a group field or
/// an aggregate alias.
fn check_sort(schema: &TableSchema, options: &SearchOptions, joins: &[Join]) -> Result<()> {
    for key in &options.sort {
        let head = key.field.split('.').next().unwrap_or_default();
        let known = schema.has_column(head)
            || joins.iter().any(|j| j.table == head)
            || options.group.iter().any(|g| g == &key.field)
            || options.aggregates.iter().any(|a| a.alias == key.field);
        if !known {
            return Err(DbError::Filter(format!(
                "cannot sort '{}' by '{}'",
                schema.name, key.field
            )));
        }
    }
    Ok(())
}
