//! Question answering service
//!
//! Wires schema discovery, matching, generation, validation and execution
//! together and exposes the service-level contract. Nothing here returns an
//! error past the boundary: failures come back inside the response structs.

use crate::config::{AppConfig, EmbedderKind, MatcherKind};
use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::execution::{format_result, ExecutionEngine, PostgresEngine, QueryResult};
use crate::generator::{GenerationStrategy, ModelStrategy, Provenance, SqlGenerator, TemplateStrategy};
use crate::llm::LlmClient;
use crate::schema::{PgCatalog, SchemaIntrospector, SchemaSnapshot};
use crate::semantic::{
    Embedder, EmbeddingMatcher, HashingEmbedder, LexicalMatcher, MatchOptions, SemanticMatchMap,
    SemanticMatcher,
};
use crate::validation::SqlValidator;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of `generate_sql`. `sql` is `None` whenever `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateSqlResponse {
    pub sql: Option<String>,
    pub semantic_matches: SemanticMatchMap,
    /// Extracted terms in the question's own wording
    pub user_terms: Vec<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerMetadata {
    pub row_count: usize,
    pub columns: Vec<String>,
    pub semantic_matches: SemanticMatchMap,
    pub user_terms: Vec<String>,
}

/// Full answer to one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub sql: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnswerMetadata>,
}

impl Answer {
    fn failed(sql: Option<String>, error: String, kind: Option<ErrorKind>) -> Self {
        Self {
            sql,
            result: None,
            error: Some(error),
            error_kind: kind,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

pub struct NlQueryService {
    introspector: Arc<SchemaIntrospector>,
    generator: SqlGenerator,
    validator: SqlValidator,
    engine: Arc<dyn ExecutionEngine>,
}

impl NlQueryService {
    pub fn new(
        introspector: Arc<SchemaIntrospector>,
        generator: SqlGenerator,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        Self {
            introspector,
            generator,
            validator: SqlValidator::default(),
            engine,
        }
    }

    pub fn with_validator(mut self, validator: SqlValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Build the production service: Postgres catalog and engine, matcher and
    /// generation strategy chosen from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let db = Arc::new(Database::from_config(&config.database)?);

        let introspector = Arc::new(
            SchemaIntrospector::new(Arc::new(PgCatalog::new(db.clone())), config.database.schema.clone())
                .with_category_columns(config.matching.category_columns.clone()),
        );

        let client = if config.has_model() {
            Some(Arc::new(LlmClient::from_config(&config.llm)?))
        } else {
            info!("No model API key configured, using template generation");
            None
        };

        let matcher: Arc<dyn SemanticMatcher> = match config.matching.strategy {
            MatcherKind::Lexical => Arc::new(LexicalMatcher::new()),
            MatcherKind::Embedding => {
                let embedder: Arc<dyn Embedder> = match (config.matching.embedder, &client) {
                    (EmbedderKind::Remote, Some(client)) => client.clone(),
                    (EmbedderKind::Remote, None) => {
                        warn!("Remote embedder needs a model API key, using hashing embedder");
                        Arc::new(HashingEmbedder::default())
                    }
                    (EmbedderKind::Hashing, _) => Arc::new(HashingEmbedder::default()),
                };
                Arc::new(
                    EmbeddingMatcher::new(embedder).with_category_thresholds(
                        config.matching.entity_threshold,
                        config.matching.enum_threshold,
                    ),
                )
            }
        };

        let options = MatchOptions {
            threshold: config.matching.threshold,
            top_k: config.matching.top_k,
        };

        let generator = match client {
            Some(client) => {
                let model: Arc<dyn GenerationStrategy> = Arc::new(ModelStrategy::new(client));
                SqlGenerator::new(introspector.clone(), matcher, model)
                    .with_fallback(Arc::new(TemplateStrategy::new()))
            }
            None => SqlGenerator::new(introspector.clone(), matcher, Arc::new(TemplateStrategy::new())),
        }
        .with_options(options);

        let engine = Arc::new(PostgresEngine::new(db));
        Ok(Self::new(introspector, generator, engine))
    }

    /// Question to validated SQL.
    pub async fn generate_sql(&self, question: &str) -> GenerateSqlResponse {
        let trace = self.generator.generate_traced(question).await;
        let user_terms = trace.user_terms.iter().map(|t| t.display().to_string()).collect();

        let outcome = trace
            .result
            .and_then(|query| Ok((self.validator.validate(&query.sql)?, query.provenance)));

        match outcome {
            Ok((sql, provenance)) => GenerateSqlResponse {
                sql: Some(sql.into_string()),
                semantic_matches: trace.matches,
                user_terms,
                error: None,
                error_kind: None,
                provenance: Some(provenance),
            },
            Err(e) => {
                error!("SQL generation failed: {}", e);
                GenerateSqlResponse {
                    sql: None,
                    semantic_matches: trace.matches,
                    user_terms,
                    error: Some(e.user_message()),
                    error_kind: Some(e.kind()),
                    provenance: None,
                }
            }
        }
    }

    /// Validate then execute. Rejected SQL never reaches the engine.
    pub async fn execute_query(&self, sql: &str) -> QueryResult {
        match self.validator.validate(sql) {
            Ok(validated) => self.engine.execute(&validated).await,
            Err(e) => QueryResult::error(self.engine.name(), e.to_string(), 0),
        }
    }

    pub fn format_result_for_user(&self, result: &QueryResult) -> String {
        format_result(result)
    }

    pub async fn schema_text(&self) -> Result<String> {
        self.introspector.schema_text().await
    }

    pub async fn all_columns(&self) -> Result<Vec<String>> {
        self.introspector.all_columns().await
    }

    pub async fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>> {
        self.introspector.table_columns(table).await
    }

    pub async fn discover_schema(&self, force_refresh: bool) -> Result<Arc<SchemaSnapshot>> {
        self.introspector.discover(force_refresh).await
    }

    pub async fn health(&self) -> HealthReport {
        match self.engine.health_check().await {
            Ok(()) => HealthReport {
                status: "healthy".to_string(),
                database: "connected".to_string(),
                schema_version: self.introspector.cache().get().map(|s| s.version),
                error: None,
            },
            Err(e) => HealthReport {
                status: "unhealthy".to_string(),
                database: "disconnected".to_string(),
                schema_version: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Generate, validate, execute and format in one pass.
    pub async fn ask(&self, question: &str) -> Answer {
        let question = question.trim();
        if question.is_empty() {
            return Answer::failed(None, "Question is required".to_string(), None);
        }
        info!("Processing question: {}", question);

        let generated = self.generate_sql(question).await;
        let sql = match generated.sql.clone() {
            Some(sql) if generated.error.is_none() => sql,
            _ => {
                let error = generated
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                return Answer::failed(
                    None,
                    format!("SQL generation failed: {}", error),
                    generated.error_kind,
                );
            }
        };

        let result = self.execute_query(&sql).await;
        if !result.success {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| "Query execution failed".to_string());
            return Answer::failed(Some(sql), error, Some(ErrorKind::QueryExecution));
        }

        info!("Query processed successfully. Returned {} rows", result.row_count);
        Answer {
            result: Some(format_result(&result)),
            sql: Some(sql),
            error: None,
            error_kind: None,
            metadata: Some(AnswerMetadata {
                row_count: result.row_count,
                columns: result.columns,
                semantic_matches: generated.semantic_matches,
                user_terms: generated.user_terms,
            }),
        }
    }
}
