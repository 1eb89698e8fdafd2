//! Execution seam between compiled statements and the database.

use async_trait::async_trait;
use sea_orm::sea_query::SelectStatement;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, DbErr,
    FromQueryResult, JsonValue, QueryResult,
};
use serde_json::Number;
use std::future::Future;
use std::time::Duration;

use crate::errors::QueryError;

/// Column alias carrying the row count of count statements
pub const COUNT_ALIAS: &str = "total";

/// Runs compiled select statements.
///
/// Only [`StorageExecutor::query`] is required; rows as JSON objects keyed by
/// column alias and counts are derived from it.
#[async_trait]
pub trait StorageExecutor: Send + Sync {
    fn backend(&self) -> DatabaseBackend;

    async fn query(&self, statement: &SelectStatement) -> Result<Vec<QueryResult>, DbErr>;

    async fn fetch_rows(&self, statement: &SelectStatement) -> Result<Vec<JsonValue>, DbErr> {
        self.query(statement)
            .await?
            .iter()
            .map(|row| JsonValue::from_query_result(row, ""))
            .collect()
    }

    /// Run a statement selecting a single [`COUNT_ALIAS`] column
    async fn fetch_count(&self, statement: &SelectStatement) -> Result<u64, DbErr> {
        let rows = self.query(statement).await?;
        let Some(row) = rows.first() else {
            return Ok(0);
        };
        let total: i64 = row.try_get("", COUNT_ALIAS)?;
        Ok(u64::try_from(total).unwrap_or_default())
    }
}

async fn run<C: ConnectionTrait>(
    connection: &C,
    statement: &SelectStatement,
) -> Result<Vec<QueryResult>, DbErr> {
    let statement = connection.get_database_backend().build(statement);
    tracing::debug!(sql = %statement.sql, "Running select");
    connection.query_all(statement).await
}

#[async_trait]
impl StorageExecutor for DatabaseConnection {
    fn backend(&self) -> DatabaseBackend {
        self.get_database_backend()
    }

    async fn query(&self, statement: &SelectStatement) -> Result<Vec<QueryResult>, DbErr> {
        run(self, statement).await
    }
}

/// Running count and page inside one transaction gives them the same snapshot
#[async_trait]
impl StorageExecutor for DatabaseTransaction {
    fn backend(&self) -> DatabaseBackend {
        self.get_database_backend()
    }

    async fn query(&self, statement: &SelectStatement) -> Result<Vec<QueryResult>, DbErr> {
        run(self, statement).await
    }
}

/// Numeric aggregate column as JSON.
///
/// Aggregates carry no declared column type on SQLite, so they are decoded
/// explicitly: integers first (`COUNT`, `SUM` of integers), then floats.
pub(crate) fn number_column(row: &QueryResult, alias: &str) -> Result<JsonValue, DbErr> {
    if let Ok(integer) = row.try_get::<Option<i64>>("", alias) {
        return Ok(integer.map_or(JsonValue::Null, JsonValue::from));
    }
    let float: Option<f64> = row.try_get("", alias)?;
    Ok(float
        .and_then(Number::from_f64)
        .map_or(JsonValue::Null, JsonValue::Number))
}

/// Await a storage call, bounded by the configured deadline
pub(crate) async fn with_deadline<T, F>(timeout: Option<Duration>, call: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, DbErr>>,
{
    let Some(after) = timeout else {
        return Ok(call.await?);
    };
    match tokio::time::timeout(after, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(QueryError::Timeout { after }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;
    use sea_orm::sea_query::{Alias, Expr, Query};
    use serde_json::json;

    #[tokio::test]
    async fn test_aggregate_columns_are_typed() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let select = Query::select()
            .expr_as(Expr::val(3), Alias::new("tally"))
            .expr_as(Expr::val(2.5), Alias::new("ratio"))
            .expr_as(Expr::cust("NULL"), Alias::new("missing"))
            .expr_as(Expr::val(4), Alias::new(COUNT_ALIAS))
            .to_owned();

        let rows = db.query(&select).await.unwrap();
        assert_eq!(number_column(&rows[0], "tally").unwrap(), json!(3));
        assert_eq!(number_column(&rows[0], "ratio").unwrap(), json!(2.5));
        assert_eq!(number_column(&rows[0], "missing").unwrap(), JsonValue::Null);
        assert_eq!(db.fetch_count(&select).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_deadline_elapses() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, DbErr>(1)
        };
        let err = with_deadline(Some(Duration::from_millis(10)), slow).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, QueryError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_storage_errors_pass_through() {
        let failing = async { Err::<u64, _>(DbErr::Custom("boom".into())) };
        let err = with_deadline(Some(Duration::from_secs(1)), failing).await.unwrap_err();
        assert!(matches!(err, QueryError::Database { .. }));

        let value = with_deadline(None, async { Ok::<_, DbErr>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
