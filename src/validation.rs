//! Read-only SQL gate
//!
//! Generated SQL passes a textual policy (single `SELECT`, fixed keyword
//! denylist) and then a structural check with sqlparser before anything can be
//! executed. The executor only accepts [`ValidatedSql`].

use crate::error::{PipelineError, Result};
use serde::Serialize;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::fmt;
use tracing::warn;

/// Matched case-insensitively anywhere in the statement, string literals
/// included.
const DENYLIST: [&str; 15] = [
    "drop", "delete", "truncate", "alter", "create", "insert", "update", "exec", "execute",
    "sp_", "xp_", "--", "/*", "*/", "union all",
];

/// SQL that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedSql {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SqlValidator {
    /// Also parse the statement and check its shape
    pub structural: bool,
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self { structural: true }
    }
}

impl SqlValidator {
    pub fn textual_only() -> Self {
        Self { structural: false }
    }

    pub fn validate(&self, sql: &str) -> Result<ValidatedSql> {
        let cleaned = sql
            .trim()
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
            .trim();

        if cleaned.is_empty() {
            return Err(reject("Empty SQL query".to_string()));
        }

        let lower = cleaned.to_lowercase();
        if !lower.starts_with("select") {
            return Err(reject("Only SELECT queries are allowed".to_string()));
        }

        if let Some(keyword) = DENYLIST.iter().find(|k| lower.contains(*k)) {
            return Err(reject(format!("Dangerous SQL keyword detected: {}", keyword)));
        }

        if self.structural {
            check_structure(cleaned)?;
        }

        Ok(ValidatedSql(cleaned.to_string()))
    }
}

/// Validate with the default policy.
pub fn validate(sql: &str) -> Result<ValidatedSql> {
    SqlValidator::default().validate(sql)
}

fn check_structure(sql: &str) -> Result<()> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| reject(format!("SQL could not be parsed: {}", e)))?;

    match statements.as_slice() {
        [Statement::Query(query)] => {
            if selects_into(&query.body) {
                return Err(reject("SELECT INTO is not allowed".to_string()));
            }
            Ok(())
        }
        [_] => Err(reject("Only SELECT queries are allowed".to_string())),
        _ => Err(reject(format!(
            "Expected exactly one statement, found {}",
            statements.len()
        ))),
    }
}

fn selects_into(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => selects_into(&query.body),
        SetExpr::SetOperation { left, right, .. } => selects_into(left) || selects_into(right),
        _ => false,
    }
}

fn reject(message: String) -> PipelineError {
    warn!("Rejected SQL: {}", message);
    PipelineError::SqlValidation(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_select_is_cleaned() {
        let sql = validate("SELECT AVG(duration) FROM journeys WHERE start_time > '2025-01-01';").unwrap();
        assert_eq!(
            sql.as_str(),
            "SELECT AVG(duration) FROM journeys WHERE start_time > '2025-01-01'"
        );

        let sql = validate("  select 1 ;; \n").unwrap();
        assert_eq!(sql.as_str(), "select 1");
    }

    #[test]
    fn test_dangerous_keywords_rejected() {
        let dangerous = [
            "DROP TABLE journeys;",
            "DELETE FROM journeys;",
            "INSERT INTO journeys VALUES (1, 2, 3);",
            "UPDATE journeys SET duration = 0;",
            "SELECT * FROM journeys; DROP TABLE stations;--",
            "SELECT * FROM trips /* hidden */",
            "SELECT 1 UNION ALL SELECT 2",
            "SELECT * FROM trips FOR UPDATE",
        ];
        for sql in dangerous {
            assert!(
                matches!(validate(sql), Err(PipelineError::SqlValidation(_))),
                "accepted: {}",
                sql
            );
        }
    }

    #[test]
    fn test_non_select_rejected() {
        let err = validate("CREATE TABLE test (id INT);").unwrap_err();
        assert_eq!(err.to_string(), "SQL validation error: Only SELECT queries are allowed");
        assert!(validate("WITH x AS (SELECT 1) SELECT * FROM x").is_err());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(validate("").is_err());
        assert!(validate("  ;  ").is_err());
    }

    #[test]
    fn test_denylist_matches_inside_literals() {
        // Known limitation of the textual policy
        assert!(validate("SELECT * FROM stations WHERE station_name = 'Drop Zone'").is_err());
    }

    #[test]
    fn test_structural_checks() {
        assert!(validate("SELECT * INTO backup FROM trips").is_err());
        assert!(validate("SELECT 1; SELECT 2").is_err());
        assert!(validate("SELECT * FROM").is_err());

        // The textual policy alone lets both through
        let textual = SqlValidator::textual_only();
        assert!(textual.validate("SELECT 1; SELECT 2").is_ok());
        assert!(textual.validate("SELECT * INTO backup FROM trips").is_ok());
    }

    #[test]
    fn test_fallback_templates_pass() {
        let sql = "SELECT s.station_name, COUNT(*) AS departure_count\n\
                   FROM trips t\n\
                   JOIN stations s ON t.start_station_id = s.station_id\n\
                   WHERE t.started_at >= '2025-06-01' AND t.started_at < '2025-06-08'\n\
                   GROUP BY s.station_id, s.station_name\n\
                   ORDER BY departure_count DESC\n\
                   LIMIT 1";
        assert!(validate(sql).is_ok());

        let sql = "SELECT AVG(EXTRACT(EPOCH FROM (t.ended_at - t.started_at)) / 60) AS average_ride_minutes\n\
                   FROM trips t\n\
                   JOIN daily_weather w ON DATE(t.started_at) = w.weather_date\n\
                   WHERE w.precipitation_mm > 0";
        assert!(validate(sql).is_ok());
    }
}
