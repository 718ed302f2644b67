//! Embedding-based matching
//!
//! Schema elements and category values are embedded once per snapshot version
//! and kept in memory; question terms are embedded in a single batch per call.
//! When the embedder fails the matcher degrades to lexical scoring.

use super::{
    rank, resolve_structured, scoring_text, CategoryKind, LexicalMatcher, MatchCandidate,
    MatchOptions, MatchUniverse, SemanticMatchMap, SemanticMatcher, SemanticTerm,
};
use crate::error::Result;
use crate::llm::LlmClient;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

pub type Embedding = Vec<f32>;

/// Anything that turns text into vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;
}

#[async_trait]
impl Embedder for LlmClient {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.embed_texts(texts).await
    }
}

/// Local embedder hashing character trigrams and whole words into a fixed
/// number of buckets. Deterministic and offline.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimension: 256 }
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_one(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        let normalized = text.to_lowercase().replace(['_', '.'], " ");

        for word in normalized.split_whitespace() {
            self.add_feature(&mut vector, word.as_bytes(), 2.0);

            let padded: Vec<char> = format!(" {} ", word).chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut vector, gram.as_bytes(), 1.0);
            }
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], bytes: &[u8], weight: f32) {
        let hash = fnv1a(bytes);
        let bucket = (hash % self.dimension as u64) as usize;
        vector[bucket] += weight;
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf29ce484222325u64, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x100000001b3)
    })
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

struct CategoryIndex {
    column: String,
    kind: CategoryKind,
    values: Vec<Embedding>,
}

/// Vectors for one universe.
struct UniverseIndex {
    version: u64,
    elements: Vec<String>,
    element_vectors: Vec<Embedding>,
    categories: Vec<CategoryIndex>,
}

pub struct EmbeddingMatcher {
    embedder: Arc<dyn Embedder>,
    entity_threshold: f32,
    enum_threshold: f32,
    index: RwLock<Option<Arc<UniverseIndex>>>,
    fallback: LexicalMatcher,
}

impl EmbeddingMatcher {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entity_threshold: 0.75,
            enum_threshold: 0.6,
            index: RwLock::new(None),
            fallback: LexicalMatcher::new(),
        }
    }

    pub fn with_category_thresholds(mut self, entity: f32, enumerated: f32) -> Self {
        self.entity_threshold = entity;
        self.enum_threshold = enumerated;
        self
    }

    fn cached(&self, universe: &MatchUniverse) -> Option<Arc<UniverseIndex>> {
        let guard = self.index.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|idx| idx.version == universe.version && idx.elements == universe.elements)
            .cloned()
    }

    async fn index_for(&self, universe: &MatchUniverse) -> Result<Arc<UniverseIndex>> {
        if let Some(index) = self.cached(universe) {
            return Ok(index);
        }

        let texts: Vec<String> = universe.elements.iter().map(|e| humanize(e)).collect();
        let element_vectors = self.embedder.embed(&texts).await?;

        let mut categories = Vec::with_capacity(universe.categories.len());
        for category in &universe.categories {
            let values = if category.values.is_empty() {
                Vec::new()
            } else {
                self.embedder.embed(&category.values).await?
            };
            categories.push(CategoryIndex {
                column: category.column.clone(),
                kind: category.kind,
                values,
            });
        }

        debug!(
            "Embedded {} schema elements for snapshot v{} using {}",
            element_vectors.len(),
            universe.version,
            self.embedder.name()
        );

        let index = Arc::new(UniverseIndex {
            version: universe.version,
            elements: universe.elements.clone(),
            element_vectors,
            categories,
        });
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = Some(index.clone());
        Ok(index)
    }

    async fn score(
        &self,
        terms: &[SemanticTerm],
        universe: &MatchUniverse,
        options: MatchOptions,
    ) -> Result<SemanticMatchMap> {
        let index = self.index_for(universe).await?;

        let pending: Vec<&SemanticTerm> = terms
            .iter()
            .filter(|t| resolve_structured(t, universe).is_none())
            .collect();
        let texts: Vec<String> = pending.iter().map(|t| scoring_text(t).to_string()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };

        let mut map = SemanticMatchMap::new();
        let mut next = 0;
        for term in terms {
            if let Some(candidates) = resolve_structured(term, universe) {
                map.push(term.clone(), rank(candidates, options));
                continue;
            }
            let Some(vector) = vectors.get(next) else {
                map.push(term.clone(), Vec::new());
                continue;
            };
            next += 1;

            // Category values take precedence over column names
            let category_hits = self.category_candidates(&index, vector);
            let candidates = if category_hits.is_empty() {
                let scored = index
                    .elements
                    .iter()
                    .zip(index.element_vectors.iter())
                    .map(|(e, v)| MatchCandidate::new(e.clone(), cosine_similarity(vector, v).max(0.0)))
                    .collect();
                rank(scored, options)
            } else {
                rank(
                    category_hits,
                    MatchOptions {
                        threshold: 0.0,
                        top_k: options.top_k,
                    },
                )
            };
            map.push(term.clone(), candidates);
        }
        Ok(map)
    }

    fn category_candidates(&self, index: &UniverseIndex, vector: &[f32]) -> Vec<MatchCandidate> {
        index
            .categories
            .iter()
            .filter_map(|category| {
                let threshold = match category.kind {
                    CategoryKind::Entity => self.entity_threshold,
                    CategoryKind::Enumerated => self.enum_threshold,
                };
                let best = category
                    .values
                    .iter()
                    .map(|v| cosine_similarity(vector, v))
                    .fold(f32::MIN, f32::max);
                (best >= threshold).then(|| MatchCandidate::new(category.column.clone(), best))
            })
            .collect()
    }
}

#[async_trait]
impl SemanticMatcher for EmbeddingMatcher {
    fn name(&self) -> &'static str {
        "embedding"
    }

    async fn match_terms(
        &self,
        terms: &[SemanticTerm],
        universe: &MatchUniverse,
        options: MatchOptions,
    ) -> Result<SemanticMatchMap> {
        if terms.is_empty() {
            return Ok(SemanticMatchMap::new());
        }

        match self.score(terms, universe, options).await {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!("Embedding match failed, using lexical scores: {}", e);
                Ok(self.fallback.score_terms(terms, universe, options))
            }
        }
    }
}

/// `trips.start_station_id` -> `trips start station id`
fn humanize(element: &str) -> String {
    element.replace(['_', '.'], " ")
}
