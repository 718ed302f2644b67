//! Term extraction from natural-language questions

use super::{CategoryColumn, SemanticTerm, TermKind};
use crate::time::find_time_phrases;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use strsim::jaro_winkler;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\b\w+\b").unwrap();
    static ref STOP_WORDS: HashSet<&'static str> = [
        "what", "was", "the", "how", "many", "which", "where", "when", "who", "is", "are",
        "were", "been", "have", "has", "had", "do", "does", "did", "will", "would", "could",
        "should", "may", "might", "must", "can", "a", "an", "and", "or", "but", "in", "on",
        "at", "to", "for", "of", "with", "by", "from", "up", "about", "into", "through",
        "during", "before", "after", "above", "below", "between", "among", "across", "that",
        "this", "these", "those", "there", "their", "they", "them", "than", "then", "over",
        "under", "saw", "see", "seen", "get", "got", "give", "show", "list", "tell", "most",
        "least", "some", "any", "all", "each", "per",
    ]
    .into_iter()
    .collect();
}

/// Domain wording rewritten to schema vocabulary, longest phrases first.
const ALIASES: &[(&str, &str)] = &[
    ("docking point", "station"),
    ("ride time", "duration"),
    ("trip time", "duration"),
    ("kilometres", "distance"),
    ("kilometers", "distance"),
    ("departures", "start station"),
    ("departure", "start station"),
    ("arrivals", "end station"),
    ("arrival", "end station"),
    ("journeys", "trips"),
    ("journey", "trips"),
    ("rides", "trips"),
    ("rainy", "precipitation"),
    ("sunny", "weather"),
    ("cloudy", "weather"),
    ("dock", "station"),
    ("rain", "precipitation"),
    ("km", "distance"),
];

const FEMALE_WORDS: &[&str] = &["women", "woman", "female", "females", "ladies", "lady"];
const MALE_WORDS: &[&str] = &["men", "man", "male", "males", "gentlemen"];

/// Pulls matchable terms out of a question.
pub struct TermExtractor {
    /// Jaro-Winkler similarity needed to accept a misspelled category value
    pub fuzzy_threshold: f64,
    /// Tokens of this many characters or fewer are ignored
    pub min_token_len: usize,
}

impl Default for TermExtractor {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.93,
            min_token_len: 2,
        }
    }
}

struct Found {
    start: usize,
    end: usize,
    term: SemanticTerm,
}

impl TermExtractor {
    /// Extract terms in question order, deduplicated case-insensitively.
    ///
    /// Never returns an empty list: a question with nothing usable yields the
    /// sentinel term.
    pub fn extract(&self, question: &str, categories: &[CategoryColumn]) -> Vec<SemanticTerm> {
        let folded = Folded::new(question);
        let lower = folded.lower.as_str();
        let surface = |start: usize, end: usize| folded.original(question, start, end).to_string();

        let mut found: Vec<Found> = Vec::new();

        // Category values seen in the data
        for category in categories {
            for value in &category.values {
                if let Some((start, end)) = self.find_value(lower, value) {
                    found.push(Found {
                        start,
                        end,
                        term: SemanticTerm::new(
                            value.to_lowercase(),
                            value.clone(),
                            TermKind::Category {
                                column: category.column.clone(),
                            },
                        ),
                    });
                }
            }
        }

        for (start, end, phrase) in find_time_phrases(lower) {
            found.push(Found {
                start,
                end,
                term: SemanticTerm::new(phrase, surface(start, end), TermKind::Temporal),
            });
        }

        for word in WORD.find_iter(lower) {
            let canonical = if FEMALE_WORDS.contains(&word.as_str()) {
                "female"
            } else if MALE_WORDS.contains(&word.as_str()) {
                "male"
            } else {
                continue;
            };
            found.push(Found {
                start: word.start(),
                end: word.end(),
                term: SemanticTerm::new(canonical, surface(word.start(), word.end()), TermKind::Gender),
            });
        }

        for (phrase, canonical) in ALIASES {
            for (start, end) in word_bounded_matches(lower, phrase) {
                if overlaps(&found, start, end) {
                    continue;
                }
                found.push(Found {
                    start,
                    end,
                    term: SemanticTerm::new(*canonical, surface(start, end), TermKind::Phrase),
                });
            }
        }

        // Remaining generic tokens
        let mut generic = Vec::new();
        for word in WORD.find_iter(lower) {
            let token = word.as_str();
            if token.chars().count() <= self.min_token_len || STOP_WORDS.contains(token) {
                continue;
            }
            if overlaps(&found, word.start(), word.end()) {
                continue;
            }
            generic.push(Found {
                start: word.start(),
                end: word.end(),
                term: SemanticTerm::new(token, surface(word.start(), word.end()), TermKind::Word),
            });
        }
        found.extend(generic);

        found.sort_by_key(|f| f.start);

        let mut seen = HashSet::new();
        let terms: Vec<SemanticTerm> = found
            .into_iter()
            .map(|f| f.term)
            .filter(|t| seen.insert(t.text.to_lowercase()))
            .collect();

        if terms.is_empty() {
            vec![SemanticTerm::sentinel()]
        } else {
            terms
        }
    }

    /// Locate a category value exactly, or fuzzily for longer values.
    fn find_value(&self, lower: &str, value: &str) -> Option<(usize, usize)> {
        let value = value.to_lowercase();
        if value.chars().count() < 3 {
            return None;
        }
        if let Some(span) = word_bounded_matches(lower, &value).into_iter().next() {
            return Some(span);
        }
        if value.chars().count() < 5 {
            return None;
        }

        // Compare against windows holding the same number of words
        let width = value.split_whitespace().count();
        let words: Vec<regex::Match> = WORD.find_iter(lower).collect();
        if width == 0 || words.len() < width {
            return None;
        }
        words.windows(width).find_map(|window| {
            let start = window[0].start();
            let end = window[width - 1].end();
            let candidate = lower[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
            (jaro_winkler(&candidate, &value) >= self.fuzzy_threshold).then_some((start, end))
        })
    }
}

/// Lowercased question with a byte map back into the original text.
struct Folded {
    lower: String,
    /// For each byte of `lower` (plus one past the end), the start of the
    /// originating character in the question
    offsets: Vec<usize>,
}

impl Folded {
    fn new(question: &str) -> Self {
        let mut lower = String::with_capacity(question.len());
        let mut offsets = Vec::with_capacity(question.len() + 1);
        for (i, c) in question.char_indices() {
            for lc in c.to_lowercase() {
                lower.push(lc);
                offsets.extend(std::iter::repeat(i).take(lc.len_utf8()));
            }
        }
        offsets.push(question.len());
        Self { lower, offsets }
    }

    /// Slice of `question` covering the `lower` span `start..end`.
    fn original<'q>(&self, question: &'q str, start: usize, end: usize) -> &'q str {
        let from = self.offsets[start];
        let to = if end > 0 && end < self.offsets.len() - 1 && self.offsets[end] == self.offsets[end - 1] {
            // `end` splits the lowercase expansion of one character
            self.next_char_start(end)
        } else {
            self.offsets[end]
        };
        &question[from..to]
    }

    fn next_char_start(&self, at: usize) -> usize {
        let current = self.offsets[at];
        self.offsets[at..]
            .iter()
            .copied()
            .find(|&o| o != current)
            .unwrap_or(current)
    }
}

/// Byte spans where `needle` occurs with non-word characters on both sides.
fn word_bounded_matches(haystack: &str, needle: &str) -> Vec<(usize, usize)> {
    haystack
        .match_indices(needle)
        .filter(|(start, _)| {
            let end = start + needle.len();
            let before = haystack[..*start].chars().next_back();
            let after = haystack[end..].chars().next();
            !before.map_or(false, is_word_char) && !after.map_or(false, is_word_char)
        })
        .map(|(start, _)| (start, start + needle.len()))
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn overlaps(found: &[Found], start: usize, end: usize) -> bool {
    found.iter().any(|f| start < f.end && f.start < end)
}
