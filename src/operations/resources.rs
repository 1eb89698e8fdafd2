//! # Query Assembler
//!
//! List getters resolve the requested fields, compose the predicate tree,
//! apply sort and pagination, then issue a count statement and a page
//! statement.
//!
//! Count and page run one after the other on the same executor. On a
//! [`sea_orm::DatabaseTransaction`] they share its snapshot; on a plain
//! connection a concurrent write between the two can make the count and the
//! page disagree, which is accepted.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Alias, Asterisk, Expr, Func, JoinType, Order, Query, SelectStatement};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

use super::storage::{COUNT_ALIAS, StorageExecutor, with_deadline};
use crate::config::AdapterConfig;
use crate::errors::QueryError;
use crate::filtering::conditions;
use crate::filtering::dates::parse_timezone;
use crate::filtering::pagination::Pagination;
use crate::filtering::predicates::{CompileContext, PredicateCompiler};
use crate::filtering::sort::{SortSpec, resolve_sort};
use crate::filtering::tree::{PredicateTree, compose};
use crate::models::QueryParams;
use crate::schema::collection::COMPOSITE_ID_SEPARATOR;
use crate::schema::{
    AssociationKind, COMPOSITE_ID_FIELD, Collection, CollectionRegistry, FieldDescriptor,
};

/// Compilation context for a request against `backend`
pub(crate) fn compile_context(
    backend: sea_orm::DatabaseBackend,
    timezone: Option<&str>,
    now: DateTime<Utc>,
    config: &AdapterConfig,
) -> Result<CompileContext, QueryError> {
    let timezone = match timezone {
        Some(name) => parse_timezone(name)?,
        None => chrono_tz::UTC,
    };
    Ok(CompileContext::new(backend, timezone, now).case_sensitive(config.case_sensitive_matching))
}

/// Single-column key of a collection, as a database column name
fn key_column(collection: &Collection) -> Result<&str, QueryError> {
    let keys = collection.primary_key_fields();
    if let [key] = keys[..] {
        return Ok(&key.column_name);
    }
    Err(QueryError::invalid_request(format!(
        "Collection '{}' has a composite key and cannot be joined",
        collection.name
    )))
}

/// `FROM` the base table, `LEFT JOIN` each association once (aliased by its
/// name) and `WHERE` the predicate tree unless it matches everything
pub(crate) fn base_select(
    compiler: &PredicateCompiler<'_>,
    tree: &PredicateTree,
    extra_joins: impl IntoIterator<Item = String>,
) -> Result<SelectStatement, QueryError> {
    let collection = compiler.collection();
    let mut joins = tree.associations();
    joins.extend(extra_joins);

    let mut select = Query::select();
    select.from(Alias::new(&collection.table));
    for name in &joins {
        let association = collection.association(name)?;
        let target = compiler.registry().get(&association.target)?;
        let on = match association.kind {
            AssociationKind::BelongsTo => Expr::col((
                Alias::new(&collection.table),
                Alias::new(&association.foreign_key),
            ))
            .equals((Alias::new(&association.name), Alias::new(key_column(target)?))),
            AssociationKind::HasOne | AssociationKind::HasMany => Expr::col((
                Alias::new(&association.name),
                Alias::new(&association.foreign_key),
            ))
            .equals((Alias::new(&collection.table), Alias::new(key_column(collection)?))),
        };
        select.join_as(
            JoinType::LeftJoin,
            Alias::new(&target.table),
            Alias::new(&association.name),
            on,
        );
    }
    if !tree.matches_everything() {
        select.cond_where(tree.to_condition());
    }
    Ok(select)
}

/// Fields selected from one table, with the alias prefix used in result rows
struct Projection<'r> {
    table_alias: String,
    prefix: Option<String>,
    fields: Vec<&'r FieldDescriptor>,
}

impl Projection<'_> {
    fn apply(&self, select: &mut SelectStatement) {
        for field in &self.fields {
            let alias = match &self.prefix {
                Some(prefix) => format!("{prefix}.{}", field.name),
                None => field.name.clone(),
            };
            select.expr_as(
                Expr::col((Alias::new(&self.table_alias), Alias::new(&field.column_name))),
                Alias::new(alias),
            );
        }
    }
}

/// Requested fields of a collection. Primary keys are always included; names
/// that match no queryable field (association names among them) are skipped.
fn pick_fields<'r>(
    collection: &'r Collection,
    requested: Option<Vec<&str>>,
) -> Vec<&'r FieldDescriptor> {
    let Some(names) = requested else {
        return collection.fields.iter().collect();
    };
    for name in names.iter().filter(|name| collection.field(name).is_none()) {
        tracing::debug!(
            collection = %collection.name,
            field = %name,
            "Ignoring unknown requested field"
        );
    }
    collection
        .fields
        .iter()
        .filter(|f| f.is_primary_key || names.contains(&f.name.as_str()))
        .collect()
}

/// Base fields plus the to-one associations named in `fields`
fn projections<'r>(
    compiler: &PredicateCompiler<'r>,
    params: &QueryParams,
) -> Result<Vec<Projection<'r>>, QueryError> {
    let collection = compiler.collection();
    let mut projections = vec![Projection {
        table_alias: collection.table.clone(),
        prefix: None,
        fields: pick_fields(collection, params.fields_for(&collection.name)),
    }];
    for association in collection.associations.iter().filter(|a| a.is_to_one()) {
        let Some(requested) = params.fields_for(&association.name) else {
            continue;
        };
        let target = compiler.registry().get(&association.target)?;
        projections.push(Projection {
            table_alias: association.name.clone(),
            prefix: Some(association.name.clone()),
            fields: pick_fields(target, Some(requested)),
        });
    }
    Ok(projections)
}

/// Fold `association.field` columns into nested objects and add the
/// composite id when the collection has one
fn shape_row(collection: &Collection, row: JsonValue) -> JsonValue {
    let JsonValue::Object(columns) = row else {
        return row;
    };
    let mut shaped = Map::new();
    let mut nested_keys = BTreeSet::new();
    for (key, value) in columns {
        match key.split_once('.') {
            Some((association, field)) => {
                nested_keys.insert(association.to_string());
                let nested = shaped
                    .entry(association.to_string())
                    .or_insert_with(|| JsonValue::Object(Map::new()));
                if let JsonValue::Object(nested) = nested {
                    nested.insert(field.to_string(), value);
                }
            }
            None => {
                shaped.insert(key, value);
            }
        }
    }
    // LEFT JOIN without a match yields an object of nulls
    for key in nested_keys {
        let unmatched = match shaped.get(&key) {
            Some(JsonValue::Object(nested)) => nested.values().all(JsonValue::is_null),
            _ => false,
        };
        if unmatched {
            shaped.insert(key, JsonValue::Null);
        }
    }
    if collection.is_composite_primary() {
        let id = collection
            .primary_keys
            .iter()
            .map(|key| match shaped.get(key) {
                Some(JsonValue::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .collect::<Vec<_>>()
            .join(&COMPOSITE_ID_SEPARATOR.to_string());
        shaped.insert(COMPOSITE_ID_FIELD.to_string(), JsonValue::String(id));
    }
    JsonValue::Object(shaped)
}

/// Children of one parent record, through a has-many association
struct ParentScope {
    foreign_key_field: String,
    record_id: String,
}

struct ListQuery<'r> {
    registry: &'r CollectionRegistry,
    collection: &'r Collection,
    params: &'r QueryParams,
    config: &'r AdapterConfig,
    now: Option<DateTime<Utc>>,
    parent: Option<ParentScope>,
}

impl ListQuery<'_> {
    /// Compile both statements; nothing touches storage before this succeeds
    fn statements(
        &self,
        backend: sea_orm::DatabaseBackend,
    ) -> Result<(SelectStatement, SelectStatement), QueryError> {
        let ctx = compile_context(
            backend,
            self.params.timezone.as_deref(),
            self.now.unwrap_or_else(Utc::now),
            self.config,
        )?;
        let compiler = PredicateCompiler::new(self.registry, self.collection, ctx);

        let mut tree = compose(&compiler, &self.params.filters)?;
        if let Some(parent) = &self.parent {
            let field = compiler.resolve(&parent.foreign_key_field)?;
            let condition =
                conditions::equals(&field.path, &parent.record_id, field.semantic_type())?;
            let scope = compiler.compile(&parent.foreign_key_field, condition)?;
            tree = PredicateTree::And(vec![PredicateTree::Leaf(scope), tree]);
        }

        let sort = SortSpec::parse(self.params.sort.as_deref());
        let sort_field = sort
            .as_ref()
            .map(|spec| resolve_sort(&compiler, spec))
            .transpose()?;
        let projections = projections(&compiler, self.params)?;
        let pagination = Pagination::resolve(&self.params.page, self.config)?;

        let mut extra_joins: BTreeSet<String> = projections
            .iter()
            .filter_map(|p| p.prefix.clone())
            .collect();
        if let Some(name) = sort_field.as_ref().and_then(|f| f.association_name()) {
            extra_joins.insert(name);
        }

        let select = base_select(&compiler, &tree, extra_joins)?;

        let mut count = select.clone();
        count.expr_as(Func::count(Expr::col(Asterisk)), Alias::new(COUNT_ALIAS));

        let mut page = select;
        for projection in &projections {
            projection.apply(&mut page);
        }
        if let (Some(field), Some(spec)) = (&sort_field, &sort) {
            page.order_by(
                (
                    Alias::new(&field.table_alias),
                    Alias::new(&field.descriptor.column_name),
                ),
                spec.order(),
            );
        }
        // Primary keys keep pages stable when the sort column has ties
        for key in self.collection.primary_key_fields() {
            page.order_by(
                (Alias::new(&self.collection.table), Alias::new(&key.column_name)),
                Order::Asc,
            );
        }
        page.limit(pagination.limit).offset(pagination.offset);

        Ok((count, page))
    }

    async fn perform<S>(&self, store: &S) -> Result<(u64, Vec<JsonValue>), QueryError>
    where
        S: StorageExecutor + ?Sized,
    {
        let (count, page) = self.statements(store.backend())?;
        let timeout = self.config.request_timeout;
        let total = with_deadline(timeout, store.fetch_count(&count)).await?;
        let rows = with_deadline(timeout, store.fetch_rows(&page)).await?;
        tracing::debug!(
            collection = %self.collection.name,
            total,
            returned = rows.len(),
            "Fetched page"
        );
        let rows = rows
            .into_iter()
            .map(|row| shape_row(self.collection, row))
            .collect();
        Ok((total, rows))
    }
}

/// Filtered, sorted, paginated records of one collection
pub struct ResourcesGetter<'r> {
    query: ListQuery<'r>,
}

impl<'r> ResourcesGetter<'r> {
    pub fn new(
        registry: &'r CollectionRegistry,
        collection: &str,
        params: &'r QueryParams,
        config: &'r AdapterConfig,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            query: ListQuery {
                registry,
                collection: registry.get(collection)?,
                params,
                config,
                now: None,
                parent: None,
            },
        })
    }

    /// Evaluate relative dates against `now` instead of the current time
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.query.now = Some(now);
        self
    }

    /// Total matching count and the requested page
    pub async fn perform<S>(&self, store: &S) -> Result<(u64, Vec<JsonValue>), QueryError>
    where
        S: StorageExecutor + ?Sized,
    {
        self.query.perform(store).await
    }
}

/// Records associated with one parent record through a has-many association
pub struct HasManyGetter<'r> {
    query: ListQuery<'r>,
}

impl<'r> HasManyGetter<'r> {
    pub fn new(
        registry: &'r CollectionRegistry,
        collection: &str,
        record_id: &str,
        association: &str,
        params: &'r QueryParams,
        config: &'r AdapterConfig,
    ) -> Result<Self, QueryError> {
        let parent = registry.get(collection)?;
        let association = parent.association(association)?;
        if association.kind == AssociationKind::BelongsTo {
            return Err(QueryError::invalid_request(format!(
                "Association '{}' of '{collection}' is not a has-many association",
                association.name
            )));
        }
        let target = registry.get(&association.target)?;
        let foreign_key = target
            .field_by_column(&association.foreign_key)
            .ok_or_else(|| QueryError::unknown_field(&target.name, &association.foreign_key))?;

        Ok(Self {
            query: ListQuery {
                registry,
                collection: target,
                params,
                config,
                now: None,
                parent: Some(ParentScope {
                    foreign_key_field: foreign_key.name.clone(),
                    record_id: record_id.to_string(),
                }),
            },
        })
    }

    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.query.now = Some(now);
        self
    }

    pub async fn perform<S>(&self, store: &S) -> Result<(u64, Vec<JsonValue>), QueryError>
    where
        S: StorageExecutor + ?Sized,
    {
        self.query.perform(store).await
    }
}

/// One record by id. Composite ids join their key parts with `-`.
pub struct ResourceGetter<'r> {
    registry: &'r CollectionRegistry,
    collection: &'r Collection,
    record_id: String,
    config: &'r AdapterConfig,
}

impl<'r> ResourceGetter<'r> {
    pub fn new(
        registry: &'r CollectionRegistry,
        collection: &str,
        record_id: &str,
        config: &'r AdapterConfig,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            registry,
            collection: registry.get(collection)?,
            record_id: record_id.to_string(),
            config,
        })
    }

    fn statement(&self, backend: sea_orm::DatabaseBackend) -> Result<SelectStatement, QueryError> {
        let ctx = compile_context(backend, None, Utc::now(), self.config)?;
        let compiler = PredicateCompiler::new(self.registry, self.collection, ctx);

        let keys = self.collection.primary_key_fields();
        let parts: Vec<&str> = self
            .record_id
            .splitn(keys.len().max(1), COMPOSITE_ID_SEPARATOR)
            .collect();
        if parts.len() != keys.len() {
            return Err(QueryError::invalid_request(format!(
                "Record id '{}' does not match the {} key fields of '{}'",
                self.record_id,
                keys.len(),
                self.collection.name
            )));
        }

        let leaves = keys
            .iter()
            .zip(parts)
            .map(|(key, part)| {
                let condition = conditions::equals(&key.name, part, key.semantic_type)?;
                compiler.compile(&key.name, condition).map(PredicateTree::Leaf)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let tree = PredicateTree::And(leaves);

        let mut select = base_select(&compiler, &tree, [])?;
        Projection {
            table_alias: self.collection.table.clone(),
            prefix: None,
            fields: self.collection.fields.iter().collect(),
        }
        .apply(&mut select);
        select.limit(1);
        Ok(select)
    }

    pub async fn perform<S>(&self, store: &S) -> Result<Option<JsonValue>, QueryError>
    where
        S: StorageExecutor + ?Sized,
    {
        let select = self.statement(store.backend())?;
        let rows = with_deadline(self.config.request_timeout, store.fetch_rows(&select)).await?;
        Ok(rows
            .into_iter()
            .next()
            .map(|row| shape_row(self.collection, row)))
    }
}
