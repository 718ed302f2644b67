//! Schema introspection
//!
//! Reads tables, columns and foreign keys from the catalog and keeps the
//! resulting snapshot in an explicit cache. The cache is owned here and handed
//! out by reference; nothing else holds schema state.

use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::schema::{split_reference, ColumnInfo, ForeignKey, SchemaSnapshot, TableInfo, TableKind};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Upper bound on distinct values loaded per category column.
pub const CATEGORY_VALUE_LIMIT: usize = 500;

/// Source of catalog metadata.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// `(table_name, table_type)` ordered by name.
    async fn list_tables(&self, schema: &str) -> Result<Vec<(String, String)>>;

    /// Columns of one table ordered by ordinal position.
    async fn list_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn list_foreign_keys(&self, schema: &str) -> Result<Vec<ForeignKey>>;

    /// Distinct non-null values of a column, rendered as text.
    async fn distinct_values(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<String>>;
}

/// Catalog backed by Postgres `information_schema`.
pub struct PgCatalog {
    db: Arc<Database>,
}

impl PgCatalog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn discovery_error(what: &str, e: sqlx::Error) -> PipelineError {
    PipelineError::SchemaDiscovery(format!("Failed to load {}: {}", what, e))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[async_trait]
impl CatalogSource for PgCatalog {
    async fn list_tables(&self, schema: &str) -> Result<Vec<(String, String)>> {
        let pool = self.db.pool().await?;
        sqlx::query_as::<_, (String, String)>(
            r#"
            SELECT table_name::text, table_type::text
            FROM information_schema.tables
            WHERE table_schema = $1
            ORDER BY table_name
            "#,
        )
        .bind(schema)
        .fetch_all(&pool)
        .await
        .map_err(|e| discovery_error("tables", e))
    }

    async fn list_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let pool = self.db.pool().await?;
        let rows = sqlx::query_as::<
            _,
            (String, String, String, Option<String>, Option<i32>, Option<i32>, i32),
        >(
            r#"
            SELECT
                column_name::text,
                data_type::text,
                is_nullable::text,
                column_default::text,
                character_maximum_length::int4,
                numeric_precision::int4,
                ordinal_position::int4
            FROM information_schema.columns
            WHERE table_schema = $1
            AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&pool)
        .await
        .map_err(|e| discovery_error(&format!("columns of {}", table), e))?;

        Ok(rows
            .into_iter()
            .map(|(name, data_type, is_nullable, default, max_length, precision, ordinal)| ColumnInfo {
                name,
                data_type,
                nullable: is_nullable == "YES",
                default,
                max_length,
                precision,
                ordinal,
            })
            .collect())
    }

    async fn list_foreign_keys(&self, schema: &str) -> Result<Vec<ForeignKey>> {
        let pool = self.db.pool().await?;
        let rows = sqlx::query_as::<_, (String, String, String, String, String)>(
            r#"
            SELECT
                tc.table_name::text AS source_table,
                kcu.column_name::text AS source_column,
                ccu.table_name::text AS target_table,
                ccu.column_name::text AS target_column,
                tc.constraint_name::text
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
                AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
            AND tc.table_schema = $1
            ORDER BY tc.table_name, tc.constraint_name
            "#,
        )
        .bind(schema)
        .fetch_all(&pool)
        .await
        .map_err(|e| discovery_error("foreign keys", e))?;

        Ok(rows
            .into_iter()
            .map(|(source_table, source_column, target_table, target_column, constraint_name)| ForeignKey {
                source_table,
                source_column,
                target_table,
                target_column,
                constraint_name,
            })
            .collect())
    }

    async fn distinct_values(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let pool = self.db.pool().await?;
        // Identifiers come from the discovered catalog, never from user text.
        let sql = format!(
            "SELECT DISTINCT {col}::text FROM {schema}.{table} WHERE {col} IS NOT NULL ORDER BY 1 LIMIT $1",
            col = quote_ident(column),
            schema = quote_ident(schema),
            table = quote_ident(table),
        );
        let rows = sqlx::query_as::<_, (String,)>(&sql)
            .bind(limit as i64)
            .fetch_all(&pool)
            .await
            .map_err(|e| discovery_error(&format!("values of {}.{}", table, column), e))?;

        Ok(rows.into_iter().map(|(v,)| v).collect())
    }
}

/// Catalog held in memory.
///
/// Used for fixtures and for running the pipeline against a known schema
/// without a database. Counts table listings so cache behaviour is observable.
#[derive(Default)]
pub struct InMemoryCatalog {
    tables: Vec<TableInfo>,
    relationships: Vec<ForeignKey>,
    values: HashMap<String, Vec<String>>,
    unreachable: bool,
    table_listings: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new(tables: Vec<TableInfo>, relationships: Vec<ForeignKey>) -> Self {
        Self {
            tables,
            relationships,
            ..Self::default()
        }
    }

    /// Register the distinct values of a `table.column`.
    pub fn with_values(mut self, column: &str, values: &[&str]) -> Self {
        self.values
            .insert(column.to_string(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    /// A catalog whose store cannot be reached.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn table_listings(&self) -> usize {
        self.table_listings.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable {
            return Err(PipelineError::Connection("catalog store is unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn list_tables(&self, _schema: &str) -> Result<Vec<(String, String)>> {
        self.check_reachable()?;
        self.table_listings.fetch_add(1, Ordering::SeqCst);
        let mut tables: Vec<(String, String)> = self
            .tables
            .iter()
            .map(|t| {
                let table_type = match t.kind {
                    TableKind::View => "VIEW",
                    _ => "BASE TABLE",
                };
                (t.name.clone(), table_type.to_string())
            })
            .collect();
        tables.sort();
        Ok(tables)
    }

    async fn list_columns(&self, _schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        self.check_reachable()?;
        let mut columns = self
            .tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.columns.clone())
            .ok_or_else(|| PipelineError::SchemaDiscovery(format!("Unknown table: {}", table)))?;
        columns.sort_by_key(|c| c.ordinal);
        Ok(columns)
    }

    async fn list_foreign_keys(&self, _schema: &str) -> Result<Vec<ForeignKey>> {
        self.check_reachable()?;
        Ok(self.relationships.clone())
    }

    async fn distinct_values(
        &self,
        _schema: &str,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        self.check_reachable()?;
        let key = format!("{}.{}", table, column);
        Ok(self
            .values
            .get(&key)
            .map(|v| v.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Holder of the current schema snapshot.
///
/// `store` only ever moves the cache forward: a snapshot older than the one
/// already held is discarded and the held one is returned instead.
#[derive(Default)]
pub struct SchemaCache {
    current: RwLock<Option<Arc<SchemaSnapshot>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<SchemaSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn store(&self, snapshot: SchemaSnapshot) -> Arc<SchemaSnapshot> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = guard.as_ref() {
            if existing.version >= snapshot.version {
                debug!(
                    "Discarding schema snapshot v{} (cache already holds v{})",
                    snapshot.version, existing.version
                );
                return existing.clone();
            }
        }

        let snapshot = Arc::new(snapshot);
        *guard = Some(snapshot.clone());
        snapshot
    }

    pub fn invalidate(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

pub struct SchemaIntrospector {
    source: Arc<dyn CatalogSource>,
    schema: String,
    category_columns: Vec<String>,
    cache: SchemaCache,
    next_version: AtomicU64,
}

impl SchemaIntrospector {
    pub fn new(source: Arc<dyn CatalogSource>, schema: impl Into<String>) -> Self {
        Self {
            source,
            schema: schema.into(),
            category_columns: Vec::new(),
            cache: SchemaCache::new(),
            next_version: AtomicU64::new(1),
        }
    }

    /// Columns whose live values feed term extraction.
    pub fn with_category_columns(mut self, columns: Vec<String>) -> Self {
        self.category_columns = columns;
        self
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Return the cached snapshot, building it on first use or when forced.
    pub async fn discover(&self, force_refresh: bool) -> Result<Arc<SchemaSnapshot>> {
        if !force_refresh {
            if let Some(snapshot) = self.cache.get() {
                return Ok(snapshot);
            }
        }

        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        info!("Discovering database schema (v{})...", version);

        let snapshot = self.build_snapshot(version).await?;
        info!(
            "Schema discovery complete. Found {} tables, {} relationships",
            snapshot.tables.len(),
            snapshot.relationships.len()
        );

        Ok(self.cache.store(snapshot))
    }

    pub async fn snapshot(&self) -> Result<Arc<SchemaSnapshot>> {
        self.discover(false).await
    }

    pub async fn refresh(&self) -> Result<Arc<SchemaSnapshot>> {
        self.discover(true).await
    }

    pub async fn schema_text(&self) -> Result<String> {
        Ok(self.snapshot().await?.schema_text())
    }

    pub async fn all_columns(&self) -> Result<Vec<String>> {
        Ok(self.snapshot().await?.all_columns().to_vec())
    }

    pub async fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>> {
        Ok(self.snapshot().await?.table_columns(table))
    }

    async fn build_snapshot(&self, version: u64) -> Result<SchemaSnapshot> {
        let listed = self.source.list_tables(&self.schema).await?;
        debug!("Found {} tables", listed.len());

        let mut tables = Vec::with_capacity(listed.len());
        for (name, table_type) in listed {
            let columns = self.source.list_columns(&self.schema, &name).await?;
            tables.push(TableInfo {
                name,
                kind: TableKind::from_table_type(&table_type),
                columns,
            });
        }

        let relationships = self.source.list_foreign_keys(&self.schema).await?;

        let mut categories = BTreeMap::new();
        for reference in &self.category_columns {
            let Some((table, column)) = split_reference(reference) else {
                warn!("Ignoring malformed category column '{}'", reference);
                continue;
            };
            let known = tables
                .iter()
                .any(|t| t.name == table && t.column(column).is_some());
            if !known {
                warn!("Category column {} is not in the schema, skipping", reference);
                continue;
            }
            match self
                .source
                .distinct_values(&self.schema, table, column, CATEGORY_VALUE_LIMIT)
                .await
            {
                Ok(values) => {
                    debug!("Loaded {} category values for {}", values.len(), reference);
                    categories.insert(reference.clone(), values);
                }
                Err(e) => warn!("Could not load category values for {}: {}", reference, e),
            }
        }

        Ok(SchemaSnapshot::new(version, tables, relationships, categories))
    }
}
