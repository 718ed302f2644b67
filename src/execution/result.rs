//! Query Result - Standardized result format from execution engines

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rows shown before the listing is summarised.
pub const MAX_DISPLAY_ROWS: usize = 10;

pub type Row = Map<String, Value>;

/// Standardized query result from any execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Success status
    pub success: bool,

    /// Rows as column -> value maps, keys in column order
    #[serde(rename = "data")]
    pub rows: Vec<Row>,

    /// Column names, unique within a result
    pub columns: Vec<String>,

    /// Number of rows returned; always `rows.len()`
    pub row_count: usize,

    /// Execution time in milliseconds
    #[serde(default)]
    pub execution_time_ms: u64,

    /// Engine that executed the query
    #[serde(default)]
    pub engine_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Create a successful result
    pub fn success(columns: Vec<String>, rows: Vec<Row>, engine_name: &str, execution_time_ms: u64) -> Self {
        let row_count = rows.len();
        let message = if row_count == 0 {
            "No data found matching your criteria".to_string()
        } else {
            format!("Query executed successfully. Found {} result(s)", row_count)
        };

        Self {
            success: true,
            rows,
            columns,
            row_count,
            execution_time_ms,
            engine_name: engine_name.to_string(),
            message: Some(message),
            error: None,
        }
    }

    /// Create an error result
    pub fn error(engine_name: &str, error: String, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            execution_time_ms,
            engine_name: engine_name.to_string(),
            message: None,
            error: Some(error),
        }
    }

    /// Single value of a one-row, one-column result.
    pub fn scalar(&self) -> Option<&Value> {
        match (self.rows.as_slice(), self.columns.as_slice()) {
            ([row], [column]) => row.get(column),
            _ => None,
        }
    }
}

/// Render a result as plain text for an end user.
pub fn format_result(result: &QueryResult) -> String {
    if !result.success {
        return format!(
            "Error: {}",
            result.error.as_deref().unwrap_or("Unknown error occurred")
        );
    }

    if result.rows.is_empty() {
        return "No data available for your query.".to_string();
    }

    if let Some(value) = result.scalar() {
        return format!("Result: {}", display_value(value));
    }

    if let [row] = result.rows.as_slice() {
        return render_row(&result.columns, row, ", ");
    }

    let mut lines: Vec<String> = result
        .rows
        .iter()
        .take(MAX_DISPLAY_ROWS)
        .map(|row| render_row(&result.columns, row, " | "))
        .collect();

    if result.rows.len() > MAX_DISPLAY_ROWS {
        lines.push(format!(
            "... and {} more rows",
            result.rows.len() - MAX_DISPLAY_ROWS
        ));
    }

    lines.join("\n")
}

fn render_row(columns: &[String], row: &Row, separator: &str) -> String {
    columns
        .iter()
        .map(|column| {
            let value = row.get(column).unwrap_or(&Value::Null);
            format!("{}: {}", column, display_value(value))
        })
        .join(separator)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
