//! # Aggregation Getters
//!
//! Pie stats group by a plain field in SQL. Line stats group in SQL by
//! quarter-hour UTC slot (or by day for date-only fields), then fold the slots
//! into local calendar buckets, so bucket boundaries follow the request
//! timezone on every backend. The rows fetched are bounded by the time span,
//! not by the number of matching records.
//!
//! Both apply the same predicate tree as the record getters before grouping.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use chrono_tz::Tz;
use sea_orm::sea_query::{Alias, Asterisk, Expr, Func, Order, SelectStatement, SimpleExpr};
use sea_orm::{DatabaseBackend, DbErr, FromQueryResult, QueryResult};
use serde_json::{Number, Value as JsonValue};
use std::collections::BTreeMap;

use super::resources::{base_select, compile_context};
use super::storage::{StorageExecutor, number_column, with_deadline};
use crate::config::AdapterConfig;
use crate::errors::QueryError;
use crate::filtering::predicates::{PredicateCompiler, ResolvedField, custom_expr};
use crate::filtering::tree::compose;
use crate::models::{Aggregate, LineEntry, PieEntry, StatKind, StatRequest, StatResult, TimeRange};
use crate::schema::{Collection, CollectionRegistry, SemanticType};

const KEY_ALIAS: &str = "key";
const VALUE_ALIAS: &str = "value";
const BUCKET_ALIAS: &str = "bucket";
/// Width of a Line stat slot; every timezone offset in use is a multiple of it
const SLOT_SECONDS: i64 = 900;

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, QueryError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| QueryError::invalid_request(format!("Stat request is missing '{name}'")))
}

/// Field summed by a `Sum` aggregate; it must be numeric
fn sum_field<'r>(
    compiler: &PredicateCompiler<'r>,
    request: &StatRequest,
) -> Result<ResolvedField<'r>, QueryError> {
    let path = required(request.aggregate_field.as_deref(), "aggregate_field")?;
    let field = compiler.resolve(path)?;
    if field.semantic_type() != SemanticType::Number {
        return Err(QueryError::invalid_request(format!(
            "Cannot sum {} field '{path}'",
            field.semantic_type()
        )));
    }
    Ok(field)
}

/// `SUM` widened to a floating type where the backend would return a decimal
fn sum_expr(backend: DatabaseBackend, field: &ResolvedField<'_>) -> SimpleExpr {
    let sum = Func::sum(field.column());
    match backend {
        DatabaseBackend::Postgres => Func::cast_as(sum, Alias::new("DOUBLE PRECISION")).into(),
        DatabaseBackend::MySql => Func::cast_as(sum, Alias::new("DOUBLE")).into(),
        _ => sum.into(),
    }
}

fn check_kind(request: &StatRequest, expected: StatKind) -> Result<(), QueryError> {
    if request.kind == expected {
        Ok(())
    } else {
        Err(QueryError::invalid_request(format!(
            "Expected a {expected:?} stat request, got {:?}",
            request.kind
        )))
    }
}

/// Per-group aggregate of one field, ordered by value descending
pub struct PieStatGetter<'r> {
    registry: &'r CollectionRegistry,
    collection: &'r Collection,
    request: &'r StatRequest,
    config: &'r AdapterConfig,
    now: Option<DateTime<Utc>>,
}

impl<'r> PieStatGetter<'r> {
    pub fn new(
        registry: &'r CollectionRegistry,
        request: &'r StatRequest,
        config: &'r AdapterConfig,
    ) -> Result<Self, QueryError> {
        check_kind(request, StatKind::Pie)?;
        Ok(Self {
            registry,
            collection: registry.get(&request.collection)?,
            request,
            config,
            now: None,
        })
    }

    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn statement(&self, backend: DatabaseBackend) -> Result<SelectStatement, QueryError> {
        let ctx = compile_context(
            backend,
            self.request.timezone.as_deref(),
            self.now.unwrap_or_else(Utc::now),
            self.config,
        )?;
        let compiler = PredicateCompiler::new(self.registry, self.collection, ctx);

        let path = required(self.request.group_by_field.as_deref(), "group_by_field")?;
        let group = compiler.resolve(path)?;
        if !group.semantic_type().is_sortable() {
            return Err(QueryError::invalid_request(format!(
                "Cannot group by {} field '{path}'",
                group.semantic_type()
            )));
        }
        let (value, summed) = match self.request.aggregate {
            Aggregate::Count => (Func::count(Expr::col(Asterisk)).into(), None),
            Aggregate::Sum => {
                let field = sum_field(&compiler, self.request)?;
                (sum_expr(backend, &field), Some(field))
            }
        };

        let tree = compose(&compiler, &self.request.filter_spec())?;
        let joins = [group.association_name(), summed.and_then(|f| f.association_name())];
        let mut select = base_select(&compiler, &tree, joins.into_iter().flatten())?;
        select
            .expr_as(group.column(), Alias::new(KEY_ALIAS))
            .expr_as(value, Alias::new(VALUE_ALIAS))
            .group_by_col((
                Alias::new(&group.table_alias),
                Alias::new(&group.descriptor.column_name),
            ))
            .order_by_expr(Expr::col(Alias::new(VALUE_ALIAS)).into(), Order::Desc);
        Ok(select)
    }

    pub async fn perform<S>(&self, store: &S) -> Result<StatResult<PieEntry>, QueryError>
    where
        S: StorageExecutor + ?Sized,
    {
        let select = self.statement(store.backend())?;
        let rows = with_deadline(self.config.request_timeout, store.query(&select)).await?;
        let value = rows
            .iter()
            .map(pie_entry)
            .collect::<Result<Vec<_>, DbErr>>()?;
        Ok(StatResult { value })
    }
}

fn pie_entry(row: &QueryResult) -> Result<PieEntry, DbErr> {
    // The key is a plain column, so its declared type drives the decoding
    let key = match JsonValue::from_query_result(row, "")? {
        JsonValue::Object(mut columns) => columns.remove(KEY_ALIAS).unwrap_or_default(),
        _ => JsonValue::Null,
    };
    Ok(PieEntry {
        key,
        value: number_column(row, VALUE_ALIAS)?,
    })
}

/// Start of the bucket containing `day`. Weeks start on Monday.
fn bucket_start(day: NaiveDate, range: TimeRange) -> NaiveDate {
    match range {
        TimeRange::Day => day,
        TimeRange::Week => {
            day - TimeDelta::days(i64::from(day.weekday().num_days_from_monday()))
        }
        TimeRange::Month => day.with_day(1).unwrap_or(day),
        TimeRange::Year => day.with_ordinal(1).unwrap_or(day),
    }
}

fn bucket_label(start: NaiveDate, range: TimeRange) -> String {
    let format = match range {
        TimeRange::Day => "%d/%m/%Y",
        TimeRange::Week => "W%V-%G",
        TimeRange::Month => "%b %y",
        TimeRange::Year => "%Y",
    };
    start.format(format).to_string()
}

/// Grouping key of a Line stat row.
///
/// Date-only fields group by the stored day. Timestamps group by the start
/// of their quarter-hour slot in seconds since the epoch, with naive
/// timestamps taken as UTC.
fn slot_expr(backend: DatabaseBackend, field: &ResolvedField<'_>) -> SimpleExpr {
    let column = SimpleExpr::from(field.column());
    if field.semantic_type() == SemanticType::Dateonly {
        return column;
    }
    let width = SLOT_SECONDS;
    let template = match backend {
        DatabaseBackend::Postgres => {
            format!("CAST(floor(extract(epoch FROM ?) / {width}) * {width} AS BIGINT)")
        }
        // sqlx connections run with a UTC session time zone
        DatabaseBackend::MySql => {
            format!("CAST(FLOOR(UNIX_TIMESTAMP(?) / {width}) * {width} AS SIGNED)")
        }
        _ => {
            let seconds = custom_expr(
                DatabaseBackend::Sqlite,
                "CAST(strftime('%s', ?) AS INTEGER)",
                [column],
            );
            // SQLite's % keeps the sign of the dividend
            return custom_expr(
                DatabaseBackend::Sqlite,
                &format!("(? - ((? % {width}) + {width}) % {width})"),
                [seconds.clone(), seconds],
            );
        }
    };
    custom_expr(backend, &template, [column])
}

/// Local calendar day of the slot starting `seconds` after the epoch
fn slot_local_day(seconds: i64, timezone: Tz) -> Option<NaiveDate> {
    DateTime::from_timestamp(seconds, 0).map(|at| at.with_timezone(&timezone).date_naive())
}

fn slot_day(
    row: &QueryResult,
    field_type: SemanticType,
    timezone: Tz,
) -> Result<Option<NaiveDate>, DbErr> {
    if field_type == SemanticType::Dateonly {
        return row.try_get("", BUCKET_ALIAS);
    }
    let start: Option<i64> = row.try_get("", BUCKET_ALIAS)?;
    Ok(start.and_then(|seconds| slot_local_day(seconds, timezone)))
}

/// Per-bucket aggregate over a date field, in chronological order.
/// Buckets without rows are left out.
pub struct LineStatGetter<'r> {
    registry: &'r CollectionRegistry,
    collection: &'r Collection,
    request: &'r StatRequest,
    config: &'r AdapterConfig,
    now: Option<DateTime<Utc>>,
}

impl<'r> LineStatGetter<'r> {
    pub fn new(
        registry: &'r CollectionRegistry,
        request: &'r StatRequest,
        config: &'r AdapterConfig,
    ) -> Result<Self, QueryError> {
        check_kind(request, StatKind::Line)?;
        Ok(Self {
            registry,
            collection: registry.get(&request.collection)?,
            request,
            config,
            now: None,
        })
    }

    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn statement(
        &self,
        backend: DatabaseBackend,
    ) -> Result<(SelectStatement, SemanticType, Tz, TimeRange), QueryError> {
        let ctx = compile_context(
            backend,
            self.request.timezone.as_deref(),
            self.now.unwrap_or_else(Utc::now),
            self.config,
        )?;
        let timezone = ctx.timezone;
        let compiler = PredicateCompiler::new(self.registry, self.collection, ctx);

        let path = required(self.request.group_by_date_field.as_deref(), "group_by_date_field")?;
        let date = compiler.resolve(path)?;
        if !date.semantic_type().is_temporal() {
            return Err(QueryError::invalid_request(format!(
                "Cannot bucket {} field '{path}' by time",
                date.semantic_type()
            )));
        }
        let range = self
            .request
            .time_range
            .ok_or_else(|| QueryError::invalid_request("Stat request is missing 'time_range'"))?;
        let summed = match self.request.aggregate {
            Aggregate::Count => None,
            Aggregate::Sum => Some(sum_field(&compiler, self.request)?),
        };

        let tree = compose(&compiler, &self.request.filter_spec())?;
        let joins = [
            date.association_name(),
            summed.as_ref().and_then(ResolvedField::association_name),
        ];
        let value = match &summed {
            Some(field) => sum_expr(backend, field),
            None => Func::count(Expr::col(Asterisk)).into(),
        };
        let slot = slot_expr(backend, &date);
        let mut select = base_select(&compiler, &tree, joins.into_iter().flatten())?;
        select
            .cond_where(date.column().is_not_null())
            .expr_as(slot.clone(), Alias::new(BUCKET_ALIAS))
            .expr_as(value, Alias::new(VALUE_ALIAS))
            .add_group_by([slot.clone()])
            .order_by_expr(slot, Order::Asc);
        Ok((select, date.semantic_type(), timezone, range))
    }

    pub async fn perform<S>(&self, store: &S) -> Result<StatResult<LineEntry>, QueryError>
    where
        S: StorageExecutor + ?Sized,
    {
        let (select, field_type, timezone, range) = self.statement(store.backend())?;
        let rows = with_deadline(self.config.request_timeout, store.query(&select)).await?;

        let mut buckets: BTreeMap<NaiveDate, (u64, f64)> = BTreeMap::new();
        for row in &rows {
            let Some(day) = slot_day(row, field_type, timezone)? else {
                tracing::warn!("Skipping line stat slot without a date");
                continue;
            };
            let value = number_column(row, VALUE_ALIAS)?;
            let bucket = buckets.entry(bucket_start(day, range)).or_default();
            bucket.0 += value.as_u64().unwrap_or_default();
            bucket.1 += value.as_f64().unwrap_or_default();
        }
        tracing::debug!(slots = rows.len(), buckets = buckets.len(), "Bucketed line stat");

        let value = buckets
            .into_iter()
            .map(|(start, (count, sum))| LineEntry {
                label: bucket_label(start, range),
                value: match self.request.aggregate {
                    Aggregate::Count => JsonValue::from(count),
                    Aggregate::Sum => Number::from_f64(sum).map_or(JsonValue::Null, JsonValue::Number),
                },
            })
            .collect();
        Ok(StatResult { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::test_support::{registry, to_sql};
    use crate::models::{Aggregator, StatFilter};

    fn request(kind: StatKind) -> StatRequest {
        StatRequest {
            collection: "user".into(),
            kind,
            group_by_field: None,
            group_by_date_field: None,
            aggregate: Aggregate::Count,
            aggregate_field: None,
            time_range: None,
            filters: Vec::new(),
            filter_type: Aggregator::And,
            timezone: None,
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_bucket_start_and_label() {
        // Sunday
        let sunday = day(2024, 3, 10);
        assert_eq!(bucket_start(sunday, TimeRange::Week), day(2024, 3, 4));
        assert_eq!(bucket_label(day(2024, 3, 4), TimeRange::Week), "W10-2024");
        assert_eq!(bucket_label(sunday, TimeRange::Day), "10/03/2024");
        assert_eq!(bucket_start(sunday, TimeRange::Month), day(2024, 3, 1));
        assert_eq!(bucket_label(day(2024, 3, 1), TimeRange::Month), "Mar 24");
        assert_eq!(bucket_start(sunday, TimeRange::Year), day(2024, 1, 1));
        assert_eq!(bucket_label(day(2024, 1, 1), TimeRange::Year), "2024");
        // ISO week year differs from the calendar year
        assert_eq!(bucket_start(day(2021, 1, 1), TimeRange::Week), day(2020, 12, 28));
        assert_eq!(bucket_label(day(2020, 12, 28), TimeRange::Week), "W53-2020");
    }

    #[test]
    fn test_slot_local_day_follows_timezone() {
        // 2024-03-10T23:30:00Z
        let late = 1_710_113_400;
        assert_eq!(slot_local_day(late, chrono_tz::UTC), Some(day(2024, 3, 10)));
        assert_eq!(slot_local_day(late, chrono_tz::Europe::Paris), Some(day(2024, 3, 11)));
        // Kathmandu is 5:45 ahead, so its day starts at 18:15Z
        let midnight = 1_710_094_500;
        assert_eq!(slot_local_day(midnight, chrono_tz::Asia::Kathmandu), Some(day(2024, 3, 11)));
        assert_eq!(
            slot_local_day(midnight - SLOT_SECONDS, chrono_tz::Asia::Kathmandu),
            Some(day(2024, 3, 10))
        );
    }

    #[test]
    fn test_pie_statement() {
        let registry = registry();
        let config = AdapterConfig::default();
        let mut request = request(StatKind::Pie);
        request.group_by_field = Some("status".into());
        request.filters.push(StatFilter {
            field: "address.country".into(),
            value: "France".into(),
        });
        let sql = PieStatGetter::new(&registry, &request, &config)
            .unwrap()
            .statement(DatabaseBackend::Sqlite)
            .unwrap();
        let sql = to_sql(DatabaseBackend::Sqlite, &sql);
        assert!(sql.contains(r#""users"."status" AS "key""#), "{sql}");
        assert!(sql.contains(r#"COUNT(*) AS "value""#), "{sql}");
        assert!(sql.contains(r#"LEFT JOIN "addresses" AS "address""#), "{sql}");
        assert!(sql.contains(r#"GROUP BY "users"."status""#), "{sql}");
        assert!(sql.ends_with(r#"ORDER BY "value" DESC"#), "{sql}");
    }

    #[test]
    fn test_pie_sum_casts_on_postgres() {
        let registry = registry();
        let config = AdapterConfig::default();
        let mut request = request(StatKind::Pie);
        request.group_by_field = Some("team.name".into());
        request.aggregate = Aggregate::Sum;
        request.aggregate_field = Some("score".into());
        let select = PieStatGetter::new(&registry, &request, &config)
            .unwrap()
            .statement(DatabaseBackend::Postgres)
            .unwrap();
        let sql = to_sql(DatabaseBackend::Postgres, &select);
        assert!(sql.contains(r#"CAST(SUM("users"."score") AS DOUBLE PRECISION)"#), "{sql}");
        assert!(sql.contains(r#"GROUP BY "team"."name""#), "{sql}");

        request.aggregate_field = Some("email".into());
        let err = PieStatGetter::new(&registry, &request, &config)
            .unwrap()
            .statement(DatabaseBackend::Postgres);
        assert!(matches!(err, Err(QueryError::InvalidRequest { .. })));
    }

    #[test]
    fn test_line_statement() {
        let registry = registry();
        let config = AdapterConfig::default();
        let mut request = request(StatKind::Line);
        request.group_by_date_field = Some("createdAt".into());
        request.time_range = Some(TimeRange::Week);
        let (select, field_type, _, range) = LineStatGetter::new(&registry, &request, &config)
            .unwrap()
            .statement(DatabaseBackend::Sqlite)
            .unwrap();
        let sql = to_sql(DatabaseBackend::Sqlite, &select);
        let slot = r#"(CAST(strftime('%s', "users"."created_at") AS INTEGER) - ((CAST(strftime('%s', "users"."created_at") AS INTEGER) % 900) + 900) % 900)"#;
        assert!(sql.contains(r#""users"."created_at" IS NOT NULL"#), "{sql}");
        assert!(sql.contains(&format!(r#"{slot} AS "bucket""#)), "{sql}");
        assert!(sql.contains(r#"COUNT(*) AS "value""#), "{sql}");
        assert!(sql.contains(&format!("GROUP BY {slot}")), "{sql}");
        assert!(sql.ends_with(&format!("ORDER BY {slot} ASC")), "{sql}");
        assert_eq!(field_type, SemanticType::Date);
        assert_eq!(range, TimeRange::Week);
    }

    #[test]
    fn test_line_slots_per_dialect() {
        let registry = registry();
        let config = AdapterConfig::default();
        let mut request = request(StatKind::Line);
        request.group_by_date_field = Some("createdAt".into());
        request.time_range = Some(TimeRange::Day);
        request.aggregate = Aggregate::Sum;
        request.aggregate_field = Some("score".into());
        let getter = LineStatGetter::new(&registry, &request, &config).unwrap();

        let (select, ..) = getter.statement(DatabaseBackend::Postgres).unwrap();
        let sql = to_sql(DatabaseBackend::Postgres, &select);
        let slot = r#"CAST(floor(extract(epoch FROM "users"."created_at") / 900) * 900 AS BIGINT)"#;
        assert!(sql.contains(&format!(r#"{slot} AS "bucket""#)), "{sql}");
        assert!(sql.contains(r#"CAST(SUM("users"."score") AS DOUBLE PRECISION) AS "value""#), "{sql}");
        assert!(sql.contains(&format!("GROUP BY {slot}")), "{sql}");

        let (select, ..) = getter.statement(DatabaseBackend::MySql).unwrap();
        let sql = to_sql(DatabaseBackend::MySql, &select);
        assert!(
            sql.contains("CAST(FLOOR(UNIX_TIMESTAMP(`users`.`created_at`) / 900) * 900 AS SIGNED) AS `bucket`"),
            "{sql}"
        );
    }

    #[test]
    fn test_malformed_stat_requests() {
        let registry = registry();
        let config = AdapterConfig::default();

        let pie = request(StatKind::Pie);
        assert!(matches!(
            LineStatGetter::new(&registry, &pie, &config),
            Err(QueryError::InvalidRequest { .. })
        ));
        let missing_group = PieStatGetter::new(&registry, &pie, &config)
            .unwrap()
            .statement(DatabaseBackend::Sqlite);
        assert!(matches!(missing_group, Err(QueryError::InvalidRequest { .. })));

        let mut line = request(StatKind::Line);
        line.group_by_date_field = Some("email".into());
        line.time_range = Some(TimeRange::Day);
        let not_a_date = LineStatGetter::new(&registry, &line, &config)
            .unwrap()
            .statement(DatabaseBackend::Sqlite);
        assert!(matches!(not_a_date, Err(QueryError::InvalidRequest { .. })));

        line.group_by_date_field = Some("createdAt".into());
        line.timezone = Some("Atlantis/Capital".into());
        let bad_zone = LineStatGetter::new(&registry, &line, &config)
            .unwrap()
            .statement(DatabaseBackend::Sqlite);
        assert!(matches!(bad_zone, Err(QueryError::InvalidTimezone { .. })));
    }
}
