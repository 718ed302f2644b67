//! String-similarity matching

use super::{
    rank, resolve_structured, scoring_text, MatchCandidate, MatchOptions, MatchUniverse,
    SemanticMatchMap, SemanticMatcher, SemanticTerm,
};
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;

/// Score for a whole-word hit inside an identifier.
const WORD_SCORE: f32 = 0.8;

/// Scores terms by exact equality, substring containment and whole-word hits.
#[derive(Debug, Default, Clone)]
pub struct LexicalMatcher;

impl LexicalMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core, also used by the embedding matcher as its fallback.
    pub fn score_terms(
        &self,
        terms: &[SemanticTerm],
        universe: &MatchUniverse,
        options: MatchOptions,
    ) -> SemanticMatchMap {
        let mut map = SemanticMatchMap::new();
        for term in terms {
            let candidates = match resolve_structured(term, universe) {
                Some(candidates) => candidates,
                None => score_elements(scoring_text(term), &universe.elements),
            };
            map.push(term.clone(), rank(candidates, options));
        }
        map
    }
}

#[async_trait]
impl SemanticMatcher for LexicalMatcher {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn match_terms(
        &self,
        terms: &[SemanticTerm],
        universe: &MatchUniverse,
        options: MatchOptions,
    ) -> Result<SemanticMatchMap> {
        Ok(self.score_terms(terms, universe, options))
    }
}

fn score_elements(term: &str, elements: &[String]) -> Vec<MatchCandidate> {
    let term = term.to_lowercase();
    let word = Regex::new(&format!(r"\b{}\b", regex::escape(&term))).ok();

    elements
        .iter()
        .filter_map(|element| {
            lexical_score(&term, element, word.as_ref()).map(|score| MatchCandidate::new(element.clone(), score))
        })
        .collect()
}

/// Best score of a term against the whole `table.column` identifier and its
/// column segment.
pub fn lexical_score(term: &str, element: &str, word: Option<&Regex>) -> Option<f32> {
    let element = element.to_lowercase();
    let column = element.rsplit('.').next().unwrap_or(&element);

    let full = score_against(term, &element, word);
    let segment = score_against(term, column, word);

    match (full, segment) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn score_against(term: &str, target: &str, word: Option<&Regex>) -> Option<f32> {
    if term.is_empty() || target.is_empty() {
        return None;
    }
    if term == target {
        return Some(1.0);
    }

    let term_len = term.chars().count() as f32;
    let target_len = target.chars().count() as f32;

    if target.contains(term) || term.contains(target) {
        return Some(term_len.min(target_len) / term_len.max(target_len));
    }

    let spaced = target.replace(['_', '.'], " ");
    match word {
        Some(re) if re.is_match(&spaced) => Some(WORD_SCORE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::bike_share_snapshot;
    use crate::semantic::{TermExtractor, TermKind};

    fn score(term: &str, element: &str) -> Option<f32> {
        let word = Regex::new(&format!(r"\b{}\b", regex::escape(term))).ok();
        lexical_score(term, element, word.as_ref())
    }

    fn approx(actual: Option<f32>, expected: f32) {
        let actual = actual.unwrap();
        assert!((actual - expected).abs() < 1e-3, "{} != {}", actual, expected);
    }

    #[test]
    fn test_exact_match_scores_one() {
        approx(score("trips.rider_gender", "trips.rider_gender"), 1.0);
        approx(score("rider_gender", "trips.rider_gender"), 1.0);
    }

    #[test]
    fn test_substring_ratio() {
        // 7 / 12 against the column segment
        approx(score("station", "stations.station_name"), 7.0 / 12.0);
        approx(score("started", "trips.started_at"), 0.7);
        approx(score("distance", "trips.trip_distance_km"), 0.5);
    }

    #[test]
    fn test_whole_word_in_identifier() {
        approx(score("start station", "trips.start_station_id"), 0.8);
        approx(score("end station", "trips.end_station_id"), 0.8);
    }

    #[test]
    fn test_unrelated_term_has_no_score() {
        assert!(score("capital", "stations.station_name").is_none());
        assert!(score("france", "trips.trip_id").is_none());
    }

    #[test]
    fn test_term_containing_column_segment() {
        // "gender" is inside the term, not the other way round
        approx(score("rider genders", "people.gender"), 6.0 / 13.0);
        approx(score("paid", "trips.id"), 0.5);
        approx(score("weather_date_local", "daily_weather.weather_date"), 12.0 / 18.0);
    }

    #[tokio::test]
    async fn test_match_terms_respects_threshold_and_top_k() {
        let universe = MatchUniverse::from_snapshot(&bike_share_snapshot());
        let options = MatchOptions {
            threshold: 0.4,
            top_k: 2,
        };
        let terms = vec![SemanticTerm::word("station"), SemanticTerm::word("capital")];
        let map = LexicalMatcher::new()
            .match_terms(&terms, &universe, options)
            .await
            .unwrap();

        let station = map.get("station").unwrap();
        assert!(station.len() <= 2);
        assert!(station.iter().all(|c| c.score >= 0.4));
        assert!(station.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(map.get("capital").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_terms_give_empty_map() {
        let universe = MatchUniverse::from_snapshot(&bike_share_snapshot());
        let map = LexicalMatcher::new()
            .match_terms(&[], &universe, MatchOptions::default())
            .await
            .unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_off_domain_question_has_no_coverage() {
        let universe = MatchUniverse::from_snapshot(&bike_share_snapshot());
        let matcher = LexicalMatcher::new();
        let terms = matcher.extract_terms("What is the capital of France?", &universe);
        let map = matcher
            .match_terms(&terms, &universe, MatchOptions::default())
            .await
            .unwrap();
        assert!(!map.has_coverage());
    }

    #[tokio::test]
    async fn test_rainy_women_question_is_covered() {
        let universe = MatchUniverse::from_snapshot(&bike_share_snapshot());
        let terms = TermExtractor::default().extract(
            "How many kilometres were ridden by women on rainy days in June 2025?",
            &universe.categories,
        );
        let map = LexicalMatcher::new()
            .match_terms(&terms, &universe, MatchOptions::default())
            .await
            .unwrap();

        assert_eq!(map.get("distance").unwrap()[0].element, "trips.trip_distance_km");
        assert_eq!(map.get("female").unwrap()[0].element, "trips.rider_gender");
        assert_eq!(
            map.get("precipitation").unwrap()[0].element,
            "daily_weather.precipitation_mm"
        );
        let gender = map.iter().find(|e| e.term.kind == TermKind::Gender).unwrap();
        assert_eq!(gender.candidates[0].score, 1.0);
    }
}
