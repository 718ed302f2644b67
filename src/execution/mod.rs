//! Query execution
//!
//! Engines never raise: driver failures come back as a `QueryResult` with
//! `success == false` and the database message in `error`.

pub mod result;

pub use result::{format_result, QueryResult, Row, MAX_DISPLAY_ROWS};

use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::validation::ValidatedSql;
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{Column, Executor, Row as _, Statement, TypeInfo, ValueRef};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Core contract for execution engines
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Engine name (e.g., "postgres")
    fn name(&self) -> &'static str;

    /// Run a validated statement.
    async fn execute(&self, sql: &ValidatedSql) -> QueryResult;

    /// Check that the engine's store answers.
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Executes against Postgres through the shared, lazily connected pool.
pub struct PostgresEngine {
    db: Arc<Database>,
}

impl PostgresEngine {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn run(&self, sql: &ValidatedSql) -> Result<(Vec<String>, Vec<Row>)> {
        let pool = self.db.pool().await?;
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| PipelineError::Connection(format!("Failed to acquire connection: {}", e)))?;

        let rows: Vec<PgRow> = sqlx::query(sql.as_str())
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| PipelineError::QueryExecution(format!("Database error: {}", e)))?;

        let raw_names: Vec<String> = match rows.first() {
            Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
            // Column names of an empty result come from the statement description
            None => (&mut *conn)
                .prepare(sql.as_str())
                .await
                .map(|stmt| stmt.columns().iter().map(|c| c.name().to_string()).collect())
                .map_err(|e| PipelineError::QueryExecution(format!("Database error: {}", e)))?,
        };

        let columns = unique_names(raw_names);
        let rows = rows.iter().map(|row| row_to_map(row, &columns)).collect();
        Ok((columns, rows))
    }
}

#[async_trait]
impl ExecutionEngine for PostgresEngine {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, sql: &ValidatedSql) -> QueryResult {
        let started = Instant::now();
        info!("Executing query: {}", sql);

        match self.run(sql).await {
            Ok((columns, rows)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                info!("Query executed successfully. Returned {} rows in {}ms", rows.len(), elapsed);
                QueryResult::success(columns, rows, self.name(), elapsed)
            }
            Err(e) => {
                let message = match e {
                    PipelineError::QueryExecution(msg) => msg,
                    other => other.to_string(),
                };
                error!("{}", message);
                QueryResult::error(self.name(), message, started.elapsed().as_millis() as u64)
            }
        }
    }

    async fn health_check(&self) -> Result<()> {
        let pool = self.db.pool().await?;
        let row = sqlx::query("SELECT 1 as health_check")
            .fetch_one(&pool)
            .await
            .map_err(|e| PipelineError::Connection(format!("Health check failed: {}", e)))?;
        let value: i32 = row
            .try_get("health_check")
            .map_err(|e| PipelineError::Connection(format!("Health check failed: {}", e)))?;
        if value != 1 {
            return Err(PipelineError::Connection(format!(
                "Health check returned {}",
                value
            )));
        }
        Ok(())
    }
}

/// Make column names unique so every row map keeps every column.
fn unique_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            if seen.insert(name.clone()) {
                return name;
            }
            let mut n = 2;
            loop {
                let candidate = format!("{}_{}", name, n);
                if seen.insert(candidate.clone()) {
                    return candidate;
                }
                n += 1;
            }
        })
        .collect()
}

fn row_to_map(row: &PgRow, names: &[String]) -> Row {
    let mut map = Row::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = names.get(i).cloned().unwrap_or_else(|| column.name().to_string());
        let type_name = column.type_info().name();

        // NULL check before decoding
        let is_null = row.try_get_raw(i).map(|v| v.is_null()).unwrap_or(true);
        if is_null {
            map.insert(name, Value::Null);
            continue;
        }

        let value = match type_name {
            "BOOL" => row.try_get::<bool, _>(i).map(Value::Bool).unwrap_or(Value::Null),
            "INT2" => row
                .try_get::<i16, _>(i)
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "INT4" => row
                .try_get::<i32, _>(i)
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "INT8" => row
                .try_get::<i64, _>(i)
                .map(|v| Value::Number(v.into()))
                .unwrap_or(Value::Null),
            "FLOAT4" => row
                .try_get::<f32, _>(i)
                .ok()
                .and_then(|v| serde_json::Number::from_f64(v as f64))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "FLOAT8" => row
                .try_get::<f64, _>(i)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "NUMERIC" => row
                .try_get::<rust_decimal::Decimal, _>(i)
                .map(|d| {
                    d.normalize()
                        .to_f64()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                        .unwrap_or_else(|| Value::String(d.to_string()))
                })
                .unwrap_or(Value::Null),
            "UUID" => row
                .try_get::<sqlx::types::Uuid, _>(i)
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            "TIMESTAMPTZ" => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .map(|v| Value::String(v.to_rfc3339()))
                .unwrap_or(Value::Null),
            "TIMESTAMP" => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            "DATE" => row
                .try_get::<chrono::NaiveDate, _>(i)
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            "TIME" => row
                .try_get::<chrono::NaiveTime, _>(i)
                .map(|v| Value::String(v.to_string()))
                .unwrap_or(Value::Null),
            "JSON" | "JSONB" => row.try_get::<Value, _>(i).unwrap_or(Value::Null),
            _ => row
                .try_get::<String, _>(i)
                .map(Value::String)
                .unwrap_or_else(|_| Value::String(format!("<{}>", type_name))),
        };

        map.insert(name, value);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names() {
        let names = unique_names(vec![
            "?column?".to_string(),
            "?column?".to_string(),
            "station_name".to_string(),
            "?column?".to_string(),
        ]);
        assert_eq!(names, vec!["?column?", "?column?_2", "station_name", "?column?_3"]);
    }

    #[tokio::test]
    async fn test_unreachable_database_is_failed_result() {
        use sqlx::postgres::PgConnectOptions;

        let options = PgConnectOptions::new().host("127.0.0.1").port(9).username("nobody");
        let engine = PostgresEngine::new(Arc::new(Database::new(options)));
        let sql = crate::validation::validate("SELECT 1").unwrap();

        let result = engine.execute(&sql).await;
        assert!(!result.success);
        assert_eq!(result.row_count, 0);
        assert!(result.error.unwrap().contains("Connection error"));
    }
}
