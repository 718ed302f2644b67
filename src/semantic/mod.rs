//! Semantic matching between question vocabulary and schema elements
//!
//! Terms are pulled out of the question, then scored against the `table.column`
//! universe of the current snapshot by one of two interchangeable strategies.

pub mod embedding;
pub mod lexical;
pub mod terms;

pub use embedding::{cosine_similarity, Embedder, Embedding, EmbeddingMatcher, HashingEmbedder};
pub use lexical::LexicalMatcher;
pub use terms::TermExtractor;

use crate::error::Result;
use crate::schema::SchemaSnapshot;
use async_trait::async_trait;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Term text emitted when a question yields nothing usable.
pub const NO_TERMS: &str = "__no_terms__";

/// Score given to date/time columns for calendar phrases.
pub const CALENDAR_SCORE: f32 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TermKind {
    /// Single generic token
    Word,
    /// Domain phrase rewritten to schema vocabulary
    Phrase,
    /// Calendar reference or time window
    Temporal,
    /// Value of a category column found in the live data
    Category { column: String },
    /// Canonical gender category (`female` / `male`)
    Gender,
    /// Nothing usable was found
    Sentinel,
}

/// A normalized token or phrase taken from a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticTerm {
    /// Normalized form used for matching
    pub text: String,
    /// Wording as it appeared in the question (or the dataset, for categories)
    pub surface: String,
    #[serde(flatten)]
    pub kind: TermKind,
}

impl SemanticTerm {
    pub fn new(text: impl Into<String>, surface: impl Into<String>, kind: TermKind) -> Self {
        Self {
            text: text.into(),
            surface: surface.into(),
            kind,
        }
    }

    pub fn word(text: &str) -> Self {
        Self::new(text, text, TermKind::Word)
    }

    pub fn sentinel() -> Self {
        Self::new(NO_TERMS, "", TermKind::Sentinel)
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind == TermKind::Sentinel
    }

    /// The question's wording, or the normalized text when there is none.
    pub fn display(&self) -> &str {
        if self.surface.is_empty() {
            &self.text
        } else {
            &self.surface
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub element: String,
    pub score: f32,
}

impl MatchCandidate {
    pub fn new(element: impl Into<String>, score: f32) -> Self {
        Self {
            element: element.into(),
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TermMatches {
    pub term: SemanticTerm,
    pub candidates: Vec<MatchCandidate>,
}

/// Candidates per term, in extraction order. A term without candidates stays
/// in the map with an empty list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticMatchMap {
    entries: Vec<TermMatches>,
}

impl SemanticMatchMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, term: SemanticTerm, candidates: Vec<MatchCandidate>) {
        self.entries.push(TermMatches { term, candidates });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TermMatches> {
        self.entries.iter()
    }

    /// Candidates for a term, looked up case-insensitively.
    pub fn get(&self, term: &str) -> Option<&[MatchCandidate]> {
        let term = term.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.term.text.to_lowercase() == term)
            .map(|e| e.candidates.as_slice())
    }

    /// Whether at least one term kept a candidate.
    pub fn has_coverage(&self) -> bool {
        self.entries.iter().any(|e| !e.candidates.is_empty())
    }

    /// Copy keeping only candidates at or above `threshold`.
    pub fn filtered(&self, threshold: f32) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|e| TermMatches {
                    term: e.term.clone(),
                    candidates: e
                        .candidates
                        .iter()
                        .filter(|c| c.score >= threshold)
                        .cloned()
                        .collect(),
                })
                .collect(),
        }
    }
}

impl Serialize for SemanticMatchMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            let pairs: Vec<(&str, f32)> = entry
                .candidates
                .iter()
                .map(|c| (c.element.as_str(), c.score))
                .collect();
            map.serialize_entry(&entry.term.text, &pairs)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryKind {
    /// Proper nouns such as station names
    Entity,
    /// Small closed sets such as gender or weather conditions
    Enumerated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryColumn {
    pub column: String,
    pub kind: CategoryKind,
    pub values: Vec<String>,
}

impl CategoryColumn {
    pub fn new(column: &str, values: Vec<String>) -> Self {
        let name = column.rsplit('.').next().unwrap_or(column);
        let kind = if name.contains("name") {
            CategoryKind::Entity
        } else {
            CategoryKind::Enumerated
        };
        Self {
            column: column.to_string(),
            kind,
            values,
        }
    }
}

/// Everything a question can be matched against.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchUniverse {
    /// Snapshot version the universe was built from (0 for ad-hoc universes)
    pub version: u64,
    /// `table.column` identifiers
    pub elements: Vec<String>,
    /// Subset of `elements` holding dates or timestamps
    pub temporal: Vec<String>,
    pub categories: Vec<CategoryColumn>,
}

impl MatchUniverse {
    pub fn new(elements: Vec<String>) -> Self {
        Self {
            version: 0,
            elements,
            temporal: Vec::new(),
            categories: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: &SchemaSnapshot) -> Self {
        Self {
            version: snapshot.version,
            elements: snapshot.all_columns().to_vec(),
            temporal: snapshot.temporal_columns(),
            categories: snapshot
                .categories
                .iter()
                .map(|(column, values)| CategoryColumn::new(column, values.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub threshold: f32,
    pub top_k: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            top_k: 3,
        }
    }
}

/// One matching strategy.
#[async_trait]
pub trait SemanticMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract_terms(&self, question: &str, universe: &MatchUniverse) -> Vec<SemanticTerm> {
        TermExtractor::default().extract(question, &universe.categories)
    }

    /// Score every term against the universe. An empty `terms` slice gives an
    /// empty map.
    async fn match_terms(
        &self,
        terms: &[SemanticTerm],
        universe: &MatchUniverse,
        options: MatchOptions,
    ) -> Result<SemanticMatchMap>;
}

/// Drop candidates under the threshold, keep the best score per element,
/// order by score and cut to `top_k`.
pub(crate) fn rank(candidates: Vec<MatchCandidate>, options: MatchOptions) -> Vec<MatchCandidate> {
    let mut kept: Vec<MatchCandidate> = Vec::new();
    for candidate in candidates.into_iter().filter(|c| c.score >= options.threshold) {
        match kept.iter_mut().find(|k| k.element == candidate.element) {
            Some(existing) if existing.score < candidate.score => existing.score = candidate.score,
            Some(_) => {}
            None => kept.push(candidate),
        }
    }
    kept.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.element.cmp(&b.element))
    });
    kept.truncate(options.top_k);
    kept
}

/// Candidates for terms whose kind pins them to known columns.
///
/// Returns `None` when the term has to go through generic scoring.
pub(crate) fn resolve_structured(term: &SemanticTerm, universe: &MatchUniverse) -> Option<Vec<MatchCandidate>> {
    match &term.kind {
        TermKind::Sentinel => Some(Vec::new()),
        TermKind::Category { column } if universe.elements.contains(column) => {
            Some(vec![MatchCandidate::new(column.clone(), 1.0)])
        }
        TermKind::Temporal if !universe.temporal.is_empty() => Some(
            universe
                .temporal
                .iter()
                .map(|c| MatchCandidate::new(c.clone(), CALENDAR_SCORE))
                .collect(),
        ),
        TermKind::Gender => {
            let columns: Vec<MatchCandidate> = universe
                .categories
                .iter()
                .filter(|c| c.values.iter().any(|v| v.eq_ignore_ascii_case(&term.text)))
                .map(|c| MatchCandidate::new(c.column.clone(), 1.0))
                .collect();
            if columns.is_empty() {
                None
            } else {
                Some(columns)
            }
        }
        _ => None,
    }
}

/// Text used when a term falls through to generic scoring.
pub(crate) fn scoring_text(term: &SemanticTerm) -> &str {
    match term.kind {
        TermKind::Gender => "gender",
        _ => &term.text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::bike_share_snapshot;

    #[test]
    fn test_display_prefers_question_wording() {
        let alias = SemanticTerm::new("duration", "ride time", TermKind::Phrase);
        assert_eq!(alias.display(), "ride time");
        assert_eq!(SemanticTerm::sentinel().display(), NO_TERMS);
    }

    #[test]
    fn test_rank_filters_sorts_and_truncates() {
        let ranked = rank(
            vec![
                MatchCandidate::new("a.x", 0.5),
                MatchCandidate::new("a.y", 0.9),
                MatchCandidate::new("a.z", 0.2),
                MatchCandidate::new("a.x", 0.7),
                MatchCandidate::new("a.w", 0.6),
            ],
            MatchOptions {
                threshold: 0.4,
                top_k: 2,
            },
        );
        assert_eq!(
            ranked,
            vec![MatchCandidate::new("a.y", 0.9), MatchCandidate::new("a.x", 0.7)]
        );
    }

    #[test]
    fn test_universe_from_snapshot() {
        let universe = MatchUniverse::from_snapshot(&bike_share_snapshot());
        assert_eq!(universe.version, 1);
        assert_eq!(universe.elements.len(), 13);
        assert_eq!(universe.temporal.len(), 3);

        let stations = universe
            .categories
            .iter()
            .find(|c| c.column == "stations.station_name")
            .unwrap();
        assert_eq!(stations.kind, CategoryKind::Entity);
        let gender = universe
            .categories
            .iter()
            .find(|c| c.column == "trips.rider_gender")
            .unwrap();
        assert_eq!(gender.kind, CategoryKind::Enumerated);
    }

    #[test]
    fn test_structured_resolution() {
        let universe = MatchUniverse::from_snapshot(&bike_share_snapshot());

        let station = SemanticTerm::new(
            "congress avenue",
            "Congress Avenue",
            TermKind::Category {
                column: "stations.station_name".to_string(),
            },
        );
        assert_eq!(
            resolve_structured(&station, &universe).unwrap(),
            vec![MatchCandidate::new("stations.station_name", 1.0)]
        );

        let women = SemanticTerm::new("female", "women", TermKind::Gender);
        assert_eq!(
            resolve_structured(&women, &universe).unwrap(),
            vec![MatchCandidate::new("trips.rider_gender", 1.0)]
        );

        let june = SemanticTerm::new("june 2025", "June 2025", TermKind::Temporal);
        assert_eq!(resolve_structured(&june, &universe).unwrap().len(), 3);

        assert!(resolve_structured(&SemanticTerm::sentinel(), &universe)
            .unwrap()
            .is_empty());
        assert!(resolve_structured(&SemanticTerm::word("distance"), &universe).is_none());
    }

    #[test]
    fn test_gender_without_category_values_scores_generically() {
        let universe = MatchUniverse::new(vec!["trips.rider_gender".to_string()]);
        let women = SemanticTerm::new("female", "women", TermKind::Gender);
        assert!(resolve_structured(&women, &universe).is_none());
        assert_eq!(scoring_text(&women), "gender");
    }

    #[test]
    fn test_match_map_serializes_in_order() {
        let mut map = SemanticMatchMap::new();
        map.push(
            SemanticTerm::word("started"),
            vec![MatchCandidate::new("trips.started_at", 0.7)],
        );
        map.push(SemanticTerm::word("capital"), vec![]);

        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"started":[["trips.started_at",0.7]],"capital":[]}"#);
        assert!(map.has_coverage());
        assert!(map.get("STARTED").is_some());
        assert!(!map.filtered(0.9).has_coverage());
    }
}
