//! Calendar references in questions
//!
//! Turns phrases such as "June 2025", "the first week of June 2025" or
//! "last month" into a half-open date window. Relative phrases resolve against
//! an explicit reference date so results are reproducible.

use chrono::{Datelike, Duration, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref MONTH_YEAR: Regex = Regex::new(
        r"\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec)\.?\s+(\d{4})\b"
    )
    .unwrap();
    static ref ORDINAL_WEEK: Regex =
        Regex::new(r"\b(first|second|third|fourth|last)\s+week\b").unwrap();
    static ref RELATIVE: Regex = Regex::new(r"\b(this|last)\s+(week|month|year)\b").unwrap();
    static ref YEAR: Regex = Regex::new(r"\b((?:19|20)\d{2})\b").unwrap();
}

/// Dates in `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        Some(Self { start, end })
    }

    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        })
    }

    /// Resolve the calendar reference of a question.
    ///
    /// An explicit month wins over relative phrases, which win over a bare year.
    /// Ordinal weeks narrow an explicit month to days 1-7, 8-14, 15-21, 22-28,
    /// or the final seven days for "last week".
    pub fn resolve(question: &str, today: NaiveDate) -> Option<Self> {
        let lower = question.to_lowercase();

        if let Some(caps) = MONTH_YEAR.captures(&lower) {
            let month = month_number(&caps[1])?;
            let year: i32 = caps[2].parse().ok()?;
            let window = Self::month(year, month)?;

            return Some(match ORDINAL_WEEK.captures(&lower) {
                Some(week) => window.narrow_to_week(&week[1]),
                None => window,
            });
        }

        if let Some(caps) = RELATIVE.captures(&lower) {
            return relative_window(&caps[1], &caps[2], today);
        }

        if let Some(caps) = YEAR.captures(&lower) {
            return Self::year(caps[1].parse().ok()?);
        }

        None
    }

    fn narrow_to_week(self, ordinal: &str) -> Self {
        let offset = match ordinal {
            "first" => 0,
            "second" => 7,
            "third" => 14,
            "fourth" => 21,
            _ => {
                return Self {
                    start: self.end - Duration::days(7),
                    end: self.end,
                }
            }
        };
        let start = self.start + Duration::days(offset);
        Self {
            start,
            end: start + Duration::days(7),
        }
    }

    /// Last date inside the window.
    pub fn last_day(&self) -> NaiveDate {
        self.end - Duration::days(1)
    }

    /// `column >= 'start' AND column < 'end'` with literal dates.
    pub fn sql_filter(&self, column: &str) -> String {
        format!(
            "{col} >= '{start}' AND {col} < '{end}'",
            col = column,
            start = self.start.format("%Y-%m-%d"),
            end = self.end.format("%Y-%m-%d"),
        )
    }

    /// Human-readable inclusive range, e.g. `2025-06-01 to 2025-06-07`.
    pub fn describe(&self) -> String {
        format!(
            "{} to {}",
            self.start.format("%Y-%m-%d"),
            self.last_day().format("%Y-%m-%d")
        )
    }
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sept" | "sep" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn relative_window(which: &str, unit: &str, today: NaiveDate) -> Option<TimeWindow> {
    let this = match unit {
        "week" => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            TimeWindow::new(monday, monday + Duration::days(7))
        }
        "month" => TimeWindow::month(today.year(), today.month())?,
        "year" => TimeWindow::year(today.year())?,
        _ => return None,
    };

    if which == "this" {
        return Some(this);
    }

    match unit {
        "week" => Some(TimeWindow::new(this.start - Duration::days(7), this.start)),
        "month" => {
            let previous = this.start - Duration::days(1);
            TimeWindow::month(previous.year(), previous.month())
        }
        _ => TimeWindow::year(today.year() - 1),
    }
}

/// Calendar phrases in a lowercased question as `(start, end, phrase)`.
///
/// `start..end` is the byte span of the match in `lower`; `phrase` is its
/// whitespace-normalised text.
pub fn find_time_phrases(lower: &str) -> Vec<(usize, usize, String)> {
    let mut phrases: Vec<(usize, usize, String)> = Vec::new();

    for m in MONTH_YEAR.find_iter(lower) {
        phrases.push((m.start(), m.end(), normalize_spaces(m.as_str()).replace('.', "")));
    }
    for m in ORDINAL_WEEK.find_iter(lower) {
        phrases.push((m.start(), m.end(), normalize_spaces(m.as_str())));
    }
    for m in RELATIVE.find_iter(lower) {
        let phrase = normalize_spaces(m.as_str());
        if !phrases.iter().any(|(_, _, p)| *p == phrase) {
            phrases.push((m.start(), m.end(), phrase));
        }
    }

    phrases.sort_by_key(|(start, _, _)| *start);
    phrases
}

fn normalize_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        // A Wednesday
        date(2025, 7, 16)
    }

    #[test]
    fn test_month_year() {
        let window = TimeWindow::resolve("average ride time in June 2025?", today()).unwrap();
        assert_eq!(window, TimeWindow::new(date(2025, 6, 1), date(2025, 7, 1)));
        assert_eq!(window.describe(), "2025-06-01 to 2025-06-30");
    }

    #[test]
    fn test_first_week_of_month() {
        let window = TimeWindow::resolve(
            "Which docking point saw the most departures during the first week of June 2025?",
            today(),
        )
        .unwrap();
        assert_eq!(window, TimeWindow::new(date(2025, 6, 1), date(2025, 6, 8)));
        assert_eq!(
            window.sql_filter("t.started_at"),
            "t.started_at >= '2025-06-01' AND t.started_at < '2025-06-08'"
        );
    }

    #[test]
    fn test_last_week_of_month() {
        let window = TimeWindow::resolve("the last week of february 2024", today()).unwrap();
        assert_eq!(window, TimeWindow::new(date(2024, 2, 23), date(2024, 3, 1)));
    }

    #[test]
    fn test_december_rolls_over() {
        let window = TimeWindow::resolve("trips in Dec 2024", today()).unwrap();
        assert_eq!(window, TimeWindow::new(date(2024, 12, 1), date(2025, 1, 1)));
    }

    #[test]
    fn test_relative_phrases() {
        assert_eq!(
            TimeWindow::resolve("rides this week", today()).unwrap(),
            TimeWindow::new(date(2025, 7, 14), date(2025, 7, 21))
        );
        assert_eq!(
            TimeWindow::resolve("rides last week", today()).unwrap(),
            TimeWindow::new(date(2025, 7, 7), date(2025, 7, 14))
        );
        assert_eq!(
            TimeWindow::resolve("rides last month", date(2025, 1, 10)).unwrap(),
            TimeWindow::new(date(2024, 12, 1), date(2025, 1, 1))
        );
        assert_eq!(
            TimeWindow::resolve("rides last year", today()).unwrap(),
            TimeWindow::new(date(2024, 1, 1), date(2025, 1, 1))
        );
    }

    #[test]
    fn test_bare_year_and_nothing() {
        assert_eq!(
            TimeWindow::resolve("total trips in 2024", today()).unwrap(),
            TimeWindow::year(2024).unwrap()
        );
        assert!(TimeWindow::resolve("which station is busiest?", today()).is_none());
    }

    #[test]
    fn test_find_time_phrases() {
        let phrases = find_time_phrases("most departures during the first week of june 2025");
        let texts: Vec<&str> = phrases.iter().map(|(_, _, p)| p.as_str()).collect();
        assert_eq!(texts, vec!["first week", "june 2025"]);
    }

    #[test]
    fn test_time_phrase_span_covers_whole_match() {
        let lower = "trips in sept.  2025";
        let phrases = find_time_phrases(lower);
        assert_eq!(phrases.len(), 1);
        let (start, end, phrase) = &phrases[0];
        assert_eq!(phrase, "sept 2025");
        assert_eq!(&lower[*start..*end], "sept.  2025");
    }
}
