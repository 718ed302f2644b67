//! SQL generation
//!
//! One request walks `ExtractTerms -> MatchTerms -> CheckCoverage ->
//! BuildContext -> Generate` and ends in `Done` or `Failed`. The schema
//! snapshot is fetched once at the start and used for every later stage.

pub mod fallback;
pub mod model;

pub use fallback::TemplateStrategy;
pub use model::{sanitize_response, ModelStrategy};

use crate::error::{PipelineError, Result};
use crate::schema::SchemaIntrospector;
use crate::semantic::{MatchOptions, MatchUniverse, SemanticMatchMap, SemanticMatcher, SemanticTerm};
use crate::time::TimeWindow;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Model,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub sql: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationStage {
    ExtractTerms,
    MatchTerms,
    CheckCoverage,
    BuildContext,
    Generate,
    Done,
    Failed,
}

/// Everything a strategy may use to produce SQL.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    pub schema_text: &'a str,
    pub semantic_context: &'a str,
    /// Threshold-passing matches only
    pub matches: &'a SemanticMatchMap,
    pub window: Option<TimeWindow>,
}

/// A way of turning a request into one SQL statement.
#[async_trait]
pub trait GenerationStrategy: Send + Sync {
    fn provenance(&self) -> Provenance;

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

/// Record of one pass through the state machine.
#[derive(Debug)]
pub struct GenerationTrace {
    pub user_terms: Vec<SemanticTerm>,
    pub matches: SemanticMatchMap,
    pub stage: GenerationStage,
    pub result: Result<GeneratedQuery>,
}

impl GenerationTrace {
    fn failed(user_terms: Vec<SemanticTerm>, matches: SemanticMatchMap, error: PipelineError) -> Self {
        Self {
            user_terms,
            matches,
            stage: GenerationStage::Failed,
            result: Err(error),
        }
    }
}

pub struct SqlGenerator {
    introspector: Arc<SchemaIntrospector>,
    matcher: Arc<dyn SemanticMatcher>,
    strategy: Arc<dyn GenerationStrategy>,
    fallback: Option<Arc<dyn GenerationStrategy>>,
    options: MatchOptions,
    reference_date: Option<NaiveDate>,
}

impl SqlGenerator {
    pub fn new(
        introspector: Arc<SchemaIntrospector>,
        matcher: Arc<dyn SemanticMatcher>,
        strategy: Arc<dyn GenerationStrategy>,
    ) -> Self {
        Self {
            introspector,
            matcher,
            strategy,
            fallback: None,
            options: MatchOptions::default(),
            reference_date: None,
        }
    }

    /// Strategy used when the primary one fails.
    pub fn with_fallback(mut self, fallback: Arc<dyn GenerationStrategy>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_options(mut self, options: MatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Pin "today" for relative time phrases.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    pub fn matcher_name(&self) -> &'static str {
        self.matcher.name()
    }

    pub async fn generate(&self, question: &str) -> Result<GeneratedQuery> {
        self.generate_traced(question).await.result
    }

    pub async fn generate_traced(&self, question: &str) -> GenerationTrace {
        debug!("Stage {:?}", GenerationStage::ExtractTerms);
        let snapshot = match self.introspector.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => return GenerationTrace::failed(Vec::new(), SemanticMatchMap::new(), e),
        };
        let universe = MatchUniverse::from_snapshot(&snapshot);
        let terms = self.matcher.extract_terms(question, &universe);
        if terms.iter().all(|t| t.is_sentinel()) {
            debug!("No usable terms in question: {}", question);
        }
        info!(
            "Extracted terms: {:?}",
            terms.iter().map(|t| t.text.as_str()).collect::<Vec<_>>()
        );

        debug!("Stage {:?}", GenerationStage::MatchTerms);
        let matches = match self.matcher.match_terms(&terms, &universe, self.options).await {
            Ok(matches) => matches,
            Err(e) => return GenerationTrace::failed(terms, SemanticMatchMap::new(), e),
        };

        debug!("Stage {:?}", GenerationStage::CheckCoverage);
        let covered = matches.filtered(self.options.threshold);
        if !covered.has_coverage() {
            warn!("No term matched the schema for question: {}", question);
            return GenerationTrace::failed(
                terms,
                matches,
                PipelineError::NoSemanticMatch(question.to_string()),
            );
        }

        debug!("Stage {:?}", GenerationStage::BuildContext);
        let semantic_context = build_semantic_context(&covered);
        let schema_text = snapshot.schema_text();
        let today = self.reference_date.unwrap_or_else(|| Utc::now().date_naive());
        let request = GenerationRequest {
            question,
            schema_text: &schema_text,
            semantic_context: &semantic_context,
            matches: &covered,
            window: TimeWindow::resolve(question, today),
        };

        debug!("Stage {:?}", GenerationStage::Generate);
        let result = self.run_strategies(&request).await;
        let stage = if result.is_ok() {
            GenerationStage::Done
        } else {
            GenerationStage::Failed
        };

        GenerationTrace {
            user_terms: terms,
            matches,
            stage,
            result,
        }
    }

    async fn run_strategies(&self, request: &GenerationRequest<'_>) -> Result<GeneratedQuery> {
        let primary = self
            .strategy
            .generate(request)
            .await
            .and_then(|sql| non_empty(sql, self.strategy.provenance()));

        let primary_error = match primary {
            Ok(sql) => {
                info!("Generated SQL ({:?}): {}", self.strategy.provenance(), sql);
                return Ok(GeneratedQuery {
                    sql,
                    provenance: self.strategy.provenance(),
                });
            }
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_error);
        };

        warn!("{:?} generation failed, using fallback: {}", self.strategy.provenance(), primary_error);
        match fallback
            .generate(request)
            .await
            .and_then(|sql| non_empty(sql, fallback.provenance()))
        {
            Ok(sql) => {
                info!("Generated SQL ({:?}): {}", fallback.provenance(), sql);
                Ok(GeneratedQuery {
                    sql,
                    provenance: fallback.provenance(),
                })
            }
            Err(fallback_error) => Err(PipelineError::Generation(format!(
                "{}; fallback also failed: {}",
                primary_error, fallback_error
            ))),
        }
    }
}

fn non_empty(sql: String, provenance: Provenance) -> Result<String> {
    if sql.trim().is_empty() {
        return Err(PipelineError::Generation(format!(
            "{:?} generation returned no SQL",
            provenance
        )));
    }
    Ok(sql)
}

/// Render matches as prompt context, one line per term with candidates.
pub fn build_semantic_context(matches: &SemanticMatchMap) -> String {
    let lines: Vec<String> = matches
        .iter()
        .filter(|e| !e.candidates.is_empty())
        .map(|e| {
            let candidates: Vec<String> = e
                .candidates
                .iter()
                .map(|c| format!("{} (score: {:.2})", c.element, c.score))
                .collect();
            format!("'{}' maps to {}", e.term.text, candidates.join(", "))
        })
        .collect();

    if lines.is_empty() {
        "No semantic matches found".to_string()
    } else {
        lines.join("\n")
    }
}
