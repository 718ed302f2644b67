use super::{GenerationRequest, GenerationStrategy, Provenance};
use crate::error::{PipelineError, Result};
use crate::llm::LlmClient;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::info;

lazy_static! {
    static ref FENCE_OPEN: Regex = Regex::new(r"(?i)```sql\s*").unwrap();
    static ref FENCE: Regex = Regex::new(r"```\s*").unwrap();
}

/// Lines starting with these end the SQL part of a response.
const PROSE_MARKERS: [&str; 4] = ["note:", "this query", "the above", "assumes"];

/// Generates SQL through the hosted model.
pub struct ModelStrategy {
    client: Arc<LlmClient>,
}

impl ModelStrategy {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GenerationStrategy for ModelStrategy {
    fn provenance(&self) -> Provenance {
        Provenance::Model
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let prompt = build_prompt(request);
        info!("Calling {} for SQL generation", self.client.model());

        let response = self.client.complete(&prompt).await?;
        let sql = sanitize_response(&response);
        if sql.is_empty() {
            return Err(PipelineError::Generation(
                "Model response contained no SQL".to_string(),
            ));
        }
        Ok(sql)
    }
}

pub fn build_prompt(request: &GenerationRequest<'_>) -> String {
    let time_hint = match &request.window {
        Some(window) => format!(
            "\nTIME WINDOW: the question refers to {} (use started_at >= '{}' AND started_at < '{}')\n",
            window.describe(),
            window.start.format("%Y-%m-%d"),
            window.end.format("%Y-%m-%d"),
        ),
        None => String::new(),
    };

    format!(
        r#"You are an expert SQL query generator for a bike-share analytics database.

{schema}

SEMANTIC MATCHES FOUND:
{context}
{time_hint}
QUESTION: {question}

INSTRUCTIONS:
1. Generate ONLY a single valid PostgreSQL SELECT query, no explanations
2. Use proper JOINs when referencing multiple tables
3. DO NOT use parameterized queries or placeholder variables (like :start_date)
4. Handle date/time filtering with explicit date values
5. For aggregations, use appropriate GROUP BY clauses
6. Map semantic terms to actual database columns using the schema above
7. Common mappings to remember:
   - "women/female" maps to rider_gender = 'female'
   - "rainy days" means precipitation_mm > 0 in daily_weather table
   - "kilometres/distance" maps to trip_distance_km column
   - Station names map to station_name column
   - Time references need proper date filtering (use actual dates like '2025-06-01')
   - "departures/started from" uses start_station_id
   - "arrivals/ended at" uses end_station_id
8. IMPORTANT: Do not include any parameter placeholders, use actual values in the SQL
9. WEATHER QUERIES: For rainy/weather conditions, join trips with daily_weather using:
   JOIN daily_weather ON DATE(trips.started_at) = daily_weather.weather_date
   Then filter with: daily_weather.precipitation_mm > 0
10. GENDER VALUES: Use exact values from the database - 'male' and 'female'

Generate the SQL query:"#,
        schema = request.schema_text,
        context = request.semantic_context,
        time_hint = time_hint,
        question = request.question,
    )
}

/// Strip markdown fences and trailing commentary from a model response.
pub fn sanitize_response(response: &str) -> String {
    let without_open = FENCE_OPEN.replace_all(response, "");
    let without_fences = FENCE.replace_all(&without_open, "");

    let mut lines = Vec::new();
    for line in without_fences.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if PROSE_MARKERS.iter().any(|m| lower.starts_with(m)) || lower.contains("should be adjusted") {
            break;
        }
        lines.push(line);
    }

    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::SemanticMatchMap;
    use crate::time::TimeWindow;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sanitize_strips_fences() {
        let response = "```sql\nSELECT COUNT(*)\nFROM trips;\n```";
        assert_eq!(sanitize_response(response), "SELECT COUNT(*)\nFROM trips;");
    }

    #[test]
    fn test_sanitize_stops_at_commentary() {
        let response = "SELECT SUM(trip_distance_km)\nFROM trips\n\nNote: dates should be adjusted.\nSELECT 2";
        assert_eq!(sanitize_response(response), "SELECT SUM(trip_distance_km)\nFROM trips");

        let response = "SELECT 1\nWHERE x > 0 -- should be adjusted\nFROM t";
        assert_eq!(sanitize_response(response), "SELECT 1");

        let response = "SELECT 1\nThis query counts rows";
        assert_eq!(sanitize_response(response), "SELECT 1");
    }

    #[test]
    fn test_sanitize_prose_only_is_empty() {
        assert_eq!(sanitize_response("Note: I cannot answer that"), "");
    }

    #[test]
    fn test_prompt_contains_context_and_window() {
        let matches = SemanticMatchMap::new();
        let request = GenerationRequest {
            question: "How many trips in June 2025?",
            schema_text: "DATABASE SCHEMA:\n\nTable: trips",
            semantic_context: "'trips' maps to trips.trip_id (score: 0.80)",
            matches: &matches,
            window: TimeWindow::month(2025, 6),
        };
        let prompt = build_prompt(&request);
        assert!(prompt.contains("DATABASE SCHEMA:\n\nTable: trips"));
        assert!(prompt.contains("SEMANTIC MATCHES FOUND:\n'trips' maps to trips.trip_id"));
        assert!(prompt.contains("2025-06-01 to 2025-06-30"));
        assert!(prompt.contains("started_at < '2025-07-01'"));
        assert!(prompt.contains("QUESTION: How many trips in June 2025?"));
    }
}
