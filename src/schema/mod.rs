//! Schema snapshot
//!
//! Immutable description of the dataset: tables, columns, foreign keys and the
//! category values loaded from the live data. A snapshot is never patched; a
//! refresh builds a new one.

pub mod introspector;

pub use introspector::{CatalogSource, InMemoryCatalog, PgCatalog, SchemaCache, SchemaIntrospector};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    BaseTable,
    View,
    Other,
}

impl TableKind {
    /// Map an `information_schema.tables.table_type` value.
    pub fn from_table_type(table_type: &str) -> Self {
        match table_type.to_uppercase().as_str() {
            "BASE TABLE" => TableKind::BaseTable,
            "VIEW" => TableKind::View,
            _ => TableKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub max_length: Option<i32>,
    pub precision: Option<i32>,
    pub ordinal: i32,
}

impl ColumnInfo {
    /// Shorthand for tests and in-memory catalogs.
    pub fn new(name: &str, data_type: &str, nullable: bool, ordinal: i32) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            default: None,
            max_length: None,
            precision: None,
            ordinal,
        }
    }

    /// Date, time and timestamp columns.
    pub fn is_temporal(&self) -> bool {
        let data_type = self.data_type.to_lowercase();
        data_type.contains("date") || data_type.contains("time")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub kind: TableKind,
    /// Ordered by ordinal position
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    pub constraint_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Increases with every discovery; used to key derived caches
    pub version: u64,
    pub tables: BTreeMap<String, TableInfo>,
    pub relationships: Vec<ForeignKey>,
    /// Distinct values of category columns, keyed by `table.column`
    pub categories: BTreeMap<String, Vec<String>>,
    all_columns: Vec<String>,
}

impl SchemaSnapshot {
    pub fn new(
        version: u64,
        tables: Vec<TableInfo>,
        relationships: Vec<ForeignKey>,
        categories: BTreeMap<String, Vec<String>>,
    ) -> Self {
        let tables: BTreeMap<String, TableInfo> =
            tables.into_iter().map(|t| (t.name.clone(), t)).collect();

        let all_columns = tables
            .values()
            .flat_map(|t| t.columns.iter().map(move |c| format!("{}.{}", t.name, c.name)))
            .collect();

        Self {
            version,
            tables,
            relationships,
            categories,
            all_columns,
        }
    }

    /// Every column as `table.column`, in table then ordinal order.
    pub fn all_columns(&self) -> &[String] {
        &self.all_columns
    }

    /// Column names of one table; `None` when the table is unknown.
    pub fn table_columns(&self, table: &str) -> Option<Vec<String>> {
        self.tables
            .get(table)
            .map(|t| t.columns.iter().map(|c| c.name.clone()).collect())
    }

    /// Resolve a `table.column` reference.
    pub fn column(&self, reference: &str) -> Option<(&TableInfo, &ColumnInfo)> {
        let (table, column) = split_reference(reference)?;
        let table = self.tables.get(table)?;
        let column = table.column(column)?;
        Some((table, column))
    }

    /// `table.column` references of date/time columns.
    pub fn temporal_columns(&self) -> Vec<String> {
        self.tables
            .values()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .filter(|c| c.is_temporal())
                    .map(move |c| format!("{}.{}", t.name, c.name))
            })
            .collect()
    }

    pub fn column_count(&self) -> usize {
        self.tables.values().map(|t| t.columns.len()).sum()
    }

    /// Prompt-ready description of the schema.
    ///
    /// Output is deterministic for a given snapshot: tables in name order,
    /// columns in ordinal order, then the foreign keys.
    pub fn schema_text(&self) -> String {
        let mut lines = vec!["DATABASE SCHEMA:".to_string()];

        for table in self.tables.values() {
            lines.push(String::new());
            lines.push(format!("Table: {}", table.name));
            lines.push("Columns:".to_string());
            for col in &table.columns {
                let nullable = if col.nullable { "NULL" } else { "NOT NULL" };
                lines.push(format!("  - {} ({}, {})", col.name, col.data_type, nullable));
            }
        }

        if !self.relationships.is_empty() {
            lines.push(String::new());
            lines.push("FOREIGN KEY RELATIONSHIPS:".to_string());
            for rel in &self.relationships {
                lines.push(format!(
                    "  {}.{} references {}.{}",
                    rel.source_table, rel.source_column, rel.target_table, rel.target_column
                ));
            }
        }

        lines.join("\n")
    }
}

/// Split `table.column` at the first dot.
pub fn split_reference(reference: &str) -> Option<(&str, &str)> {
    let (table, column) = reference.split_once('.')?;
    if table.is_empty() || column.is_empty() {
        return None;
    }
    Some((table, column))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// The bike-share dataset used throughout the tests.
    pub fn bike_share_snapshot() -> SchemaSnapshot {
        let mut categories = BTreeMap::new();
        categories.insert(
            "stations.station_name".to_string(),
            vec![
                "Congress Avenue".to_string(),
                "Riverside Drive".to_string(),
                "Lamar Square".to_string(),
            ],
        );
        categories.insert(
            "trips.rider_gender".to_string(),
            vec!["female".to_string(), "male".to_string()],
        );

        SchemaSnapshot::new(1, bike_share_tables(), bike_share_relationships(), categories)
    }

    pub fn bike_share_tables() -> Vec<TableInfo> {
        vec![
            TableInfo {
                name: "daily_weather".to_string(),
                kind: TableKind::BaseTable,
                columns: vec![
                    ColumnInfo::new("weather_date", "date", false, 1),
                    ColumnInfo::new("precipitation_mm", "numeric", true, 2),
                    ColumnInfo::new("high_temp_c", "numeric", true, 3),
                ],
            },
            TableInfo {
                name: "stations".to_string(),
                kind: TableKind::BaseTable,
                columns: vec![
                    ColumnInfo::new("station_id", "integer", false, 1),
                    ColumnInfo::new("station_name", "text", false, 2),
                ],
            },
            TableInfo {
                name: "trips".to_string(),
                kind: TableKind::BaseTable,
                columns: vec![
                    ColumnInfo::new("trip_id", "integer", false, 1),
                    ColumnInfo::new("bike_id", "integer", false, 2),
                    ColumnInfo::new("started_at", "timestamp without time zone", false, 3),
                    ColumnInfo::new("ended_at", "timestamp without time zone", false, 4),
                    ColumnInfo::new("start_station_id", "integer", false, 5),
                    ColumnInfo::new("end_station_id", "integer", false, 6),
                    ColumnInfo::new("trip_distance_km", "numeric", true, 7),
                    ColumnInfo::new("rider_gender", "text", true, 8),
                ],
            },
        ]
    }

    pub fn bike_share_relationships() -> Vec<ForeignKey> {
        vec![
            ForeignKey {
                source_table: "trips".to_string(),
                source_column: "start_station_id".to_string(),
                target_table: "stations".to_string(),
                target_column: "station_id".to_string(),
                constraint_name: "trips_start_station_id_fkey".to_string(),
            },
            ForeignKey {
                source_table: "trips".to_string(),
                source_column: "end_station_id".to_string(),
                target_table: "stations".to_string(),
                target_column: "station_id".to_string(),
                constraint_name: "trips_end_station_id_fkey".to_string(),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::bike_share_snapshot;
    use super::*;

    #[test]
    fn test_all_columns_covers_every_table() {
        let snapshot = bike_share_snapshot();
        assert_eq!(snapshot.all_columns().len(), snapshot.column_count());
        assert_eq!(snapshot.all_columns()[0], "daily_weather.weather_date");

        for reference in snapshot.all_columns() {
            let (table, column) = split_reference(reference).unwrap();
            let columns = snapshot.table_columns(table).unwrap();
            assert!(columns.iter().any(|c| c == column), "{} not found", reference);
        }
    }

    #[test]
    fn test_table_columns_unknown_table_is_none() {
        let snapshot = bike_share_snapshot();
        assert!(snapshot.table_columns("riders").is_none());
        assert_eq!(
            snapshot.table_columns("stations").unwrap(),
            vec!["station_id".to_string(), "station_name".to_string()]
        );
    }

    #[test]
    fn test_schema_text_layout() {
        let text = bike_share_snapshot().schema_text();
        assert!(text.starts_with("DATABASE SCHEMA:\n\nTable: daily_weather\nColumns:"));
        assert!(text.contains("  - station_name (text, NOT NULL)"));
        assert!(text.contains("  - rider_gender (text, NULL)"));
        assert!(text.contains("FOREIGN KEY RELATIONSHIPS:"));
        assert!(text.contains("  trips.start_station_id references stations.station_id"));

        // Deterministic
        assert_eq!(text, bike_share_snapshot().schema_text());
    }

    #[test]
    fn test_temporal_columns() {
        let snapshot = bike_share_snapshot();
        assert_eq!(
            snapshot.temporal_columns(),
            vec![
                "daily_weather.weather_date".to_string(),
                "trips.started_at".to_string(),
                "trips.ended_at".to_string(),
            ]
        );
    }

    #[test]
    fn test_column_lookup() {
        let snapshot = bike_share_snapshot();
        let (table, column) = snapshot.column("trips.rider_gender").unwrap();
        assert_eq!(table.name, "trips");
        assert_eq!(column.ordinal, 8);
        assert!(snapshot.column("trips.nope").is_none());
        assert!(snapshot.column("trips").is_none());
    }

    #[test]
    fn test_table_kind_mapping() {
        assert_eq!(TableKind::from_table_type("BASE TABLE"), TableKind::BaseTable);
        assert_eq!(TableKind::from_table_type("VIEW"), TableKind::View);
        assert_eq!(TableKind::from_table_type("FOREIGN"), TableKind::Other);
    }
}
