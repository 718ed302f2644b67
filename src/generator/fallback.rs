//! Template-based SQL for the questions the service knows by heart
//!
//! Rules are tried in order; the first whose pattern matches the question
//! renders its template with the recognised station, gender and time window.
//! A station filter is only rendered for a station name found in the data.

use super::{GenerationRequest, GenerationStrategy, Provenance};
use crate::error::{PipelineError, Result};
use crate::semantic::TermKind;
use crate::time::TimeWindow;
use async_trait::async_trait;
use tracing::{info, warn};

/// What the rules can see of a request.
struct Slots {
    lower: String,
    station: Option<String>,
    gender: Option<String>,
    window: Option<TimeWindow>,
}

impl Slots {
    fn from_request(request: &GenerationRequest<'_>) -> Self {
        let mut station = None;
        let mut gender = None;

        for entry in request.matches.iter() {
            match &entry.term.kind {
                TermKind::Category { column } if column.ends_with("station_name") && station.is_none() => {
                    station = Some(entry.term.surface.clone());
                }
                TermKind::Category { column } if column.ends_with("gender") && gender.is_none() => {
                    gender = Some(entry.term.text.clone());
                }
                TermKind::Gender if gender.is_none() => gender = Some(entry.term.text.clone()),
                _ => {}
            }
        }

        Self {
            lower: request.question.to_lowercase(),
            station,
            gender,
            window: request.window,
        }
    }

    fn mentions(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.lower.contains(w))
    }
}

/// Deterministic generator used when no model is available.
#[derive(Debug, Default, Clone)]
pub struct TemplateStrategy;

impl TemplateStrategy {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let slots = Slots::from_request(request);

        if slots.mentions(&["average"]) && slots.mentions(&["ride time", "trip time", "duration"]) {
            return Ok(average_ride_time(&slots));
        }
        if slots.mentions(&["most departures", "most arrivals", "busiest"]) {
            return Ok(busiest_station(&slots));
        }
        if slots.mentions(&["kilometres", "kilometers", "km", "distance"]) && slots.gender.is_some() {
            return Ok(total_distance(&slots));
        }

        warn!("No template matches question: {}", request.question);
        Err(PipelineError::UnsupportedQuestion(format!(
            "Unable to generate SQL query from question: {}",
            request.question
        )))
    }
}

#[async_trait]
impl GenerationStrategy for TemplateStrategy {
    fn provenance(&self) -> Provenance {
        Provenance::Fallback
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        info!("Using fallback SQL generation");
        self.render(request)
    }
}

fn average_ride_time(slots: &Slots) -> String {
    let mut sql = vec![
        "SELECT AVG(EXTRACT(EPOCH FROM (t.ended_at - t.started_at)) / 60) AS average_ride_minutes".to_string(),
        "FROM trips t".to_string(),
    ];
    let mut filters = Vec::new();

    if let Some(station) = &slots.station {
        let key = if slots.mentions(&["ended at", "arriv"]) {
            "end_station_id"
        } else {
            "start_station_id"
        };
        sql.push(format!("JOIN stations s ON t.{} = s.station_id", key));
        filters.push(format!("s.station_name = '{}'", escape_literal(station)));
    }
    if let Some(window) = &slots.window {
        filters.push(window.sql_filter("t.started_at"));
    }

    push_where(&mut sql, filters);
    sql.join("\n")
}

fn busiest_station(slots: &Slots) -> String {
    let (key, timestamp, alias) = if slots.mentions(&["arrival"]) {
        ("end_station_id", "t.ended_at", "arrival_count")
    } else {
        ("start_station_id", "t.started_at", "departure_count")
    };

    let mut sql = vec![
        format!("SELECT s.station_name, COUNT(*) AS {}", alias),
        "FROM trips t".to_string(),
        format!("JOIN stations s ON t.{} = s.station_id", key),
    ];
    let filters = slots
        .window
        .iter()
        .map(|w| w.sql_filter(timestamp))
        .collect();
    push_where(&mut sql, filters);

    sql.push("GROUP BY s.station_id, s.station_name".to_string());
    sql.push(format!("ORDER BY {} DESC", alias));
    sql.push("LIMIT 1".to_string());
    sql.join("\n")
}

fn total_distance(slots: &Slots) -> String {
    let mut sql = vec![
        "SELECT SUM(t.trip_distance_km) AS total_kilometres".to_string(),
        "FROM trips t".to_string(),
    ];
    let mut filters = Vec::new();

    if let Some(gender) = &slots.gender {
        filters.push(format!("t.rider_gender = '{}'", escape_literal(gender)));
    }
    if slots.mentions(&["rain", "precipitation", "wet"]) {
        sql.push("JOIN daily_weather w ON DATE(t.started_at) = w.weather_date".to_string());
        filters.push("w.precipitation_mm > 0".to_string());
    }
    if let Some(window) = &slots.window {
        filters.push(window.sql_filter("t.started_at"));
    }

    push_where(&mut sql, filters);
    sql.join("\n")
}

fn push_where(sql: &mut Vec<String>, filters: Vec<String>) {
    for (i, filter) in filters.into_iter().enumerate() {
        let keyword = if i == 0 { "WHERE" } else { "  AND" };
        sql.push(format!("{} {}", keyword, filter));
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}
