use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel reported to callers when no question term matched the schema.
pub const NO_DATA_FOUND: &str = "NO_DATA_FOUND";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Schema discovery error: {0}")]
    SchemaDiscovery(String),

    #[error("No semantic match for question: {0}")]
    NoSemanticMatch(String),

    #[error("Unsupported question: {0}")]
    UnsupportedQuestion(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("SQL validation error: {0}")]
    SqlValidation(String),

    #[error("Query execution error: {0}")]
    QueryExecution(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure taxonomy of the pipeline, independent of the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Connection,
    SchemaDiscovery,
    NoSemanticMatch,
    UnsupportedQuestion,
    Generation,
    SqlValidation,
    QueryExecution,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION_ERROR",
            ErrorKind::SchemaDiscovery => "SCHEMA_DISCOVERY_ERROR",
            ErrorKind::NoSemanticMatch => NO_DATA_FOUND,
            ErrorKind::UnsupportedQuestion => "UNSUPPORTED_QUESTION",
            ErrorKind::Generation => "GENERATION_ERROR",
            ErrorKind::SqlValidation => "SQL_VALIDATION_ERROR",
            ErrorKind::QueryExecution => "QUERY_EXECUTION_ERROR",
            ErrorKind::Config => "CONFIG_ERROR",
        }
    }

    /// Whether the failure is a clarification request rather than a fault.
    pub fn is_clarification(&self) -> bool {
        matches!(self, ErrorKind::NoSemanticMatch)
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Connection(_) => ErrorKind::Connection,
            PipelineError::SchemaDiscovery(_) => ErrorKind::SchemaDiscovery,
            PipelineError::NoSemanticMatch(_) => ErrorKind::NoSemanticMatch,
            PipelineError::UnsupportedQuestion(_) => ErrorKind::UnsupportedQuestion,
            PipelineError::Generation(_) | PipelineError::Json(_) => ErrorKind::Generation,
            PipelineError::SqlValidation(_) => ErrorKind::SqlValidation,
            PipelineError::QueryExecution(_) => ErrorKind::QueryExecution,
            PipelineError::Config(_) => ErrorKind::Config,
        }
    }

    /// Message handed across the service boundary.
    ///
    /// Coverage failures collapse to the `NO_DATA_FOUND` sentinel; everything
    /// else carries its descriptive message.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::NoSemanticMatch(_) => NO_DATA_FOUND.to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_semantic_match_uses_sentinel() {
        let err = PipelineError::NoSemanticMatch("what is the capital of France?".to_string());
        assert_eq!(err.kind(), ErrorKind::NoSemanticMatch);
        assert_eq!(err.user_message(), NO_DATA_FOUND);
        assert!(err.kind().is_clarification());
    }

    #[test]
    fn test_other_errors_keep_message() {
        let err = PipelineError::SqlValidation("Only SELECT queries are allowed".to_string());
        assert_eq!(err.kind(), ErrorKind::SqlValidation);
        assert_eq!(
            err.user_message(),
            "SQL validation error: Only SELECT queries are allowed"
        );
        assert!(!err.kind().is_clarification());
    }

    #[test]
    fn test_json_errors_count_as_generation() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: PipelineError = parse.into();
        assert_eq!(err.kind(), ErrorKind::Generation);
    }
}
