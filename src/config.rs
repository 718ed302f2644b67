//! Application configuration
//!
//! Everything is read from the process environment. The binary loads a `.env`
//! file first, so local overrides work without exporting variables.

use crate::error::{PipelineError, Result};
use std::str::FromStr;

/// API key values that mean "no model configured".
const PLACEHOLDER_KEYS: [&str; 2] = ["default-groq-key", "dummy-api-key"];

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Full connection URL; takes precedence over the discrete PG* fields
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Schema that holds the dataset
    pub schema: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Open every session with `default_transaction_read_only = on`
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    Lexical,
    Embedding,
}

impl FromStr for MatcherKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lexical" | "keyword" => Ok(MatcherKind::Lexical),
            "embedding" | "embeddings" => Ok(MatcherKind::Embedding),
            other => Err(PipelineError::Config(format!("Unknown matcher strategy: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// Local character n-gram hashing, no network
    Hashing,
    /// Embeddings endpoint of the configured model provider
    Remote,
}

impl FromStr for EmbedderKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hashing" | "local" => Ok(EmbedderKind::Hashing),
            "remote" | "api" => Ok(EmbedderKind::Remote),
            other => Err(PipelineError::Config(format!("Unknown embedder: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub strategy: MatcherKind,
    pub embedder: EmbedderKind,
    /// Minimum score for schema-element matches
    pub threshold: f32,
    /// Minimum score for proper-noun category values (station names)
    pub entity_threshold: f32,
    /// Minimum score for enumerated category values
    pub enum_threshold: f32,
    pub top_k: usize,
    /// `table.column` identifiers whose distinct values are loaded at discovery
    pub category_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub matching: MatchingConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| -> String {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let database = DatabaseConfig {
            url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            host: get("PGHOST", "localhost"),
            port: parse_value("PGPORT", &get("PGPORT", "5432"))?,
            user: get("PGUSER", "postgres"),
            password: lookup("PGPASSWORD").unwrap_or_default(),
            database: get("PGDATABASE", "bike_share"),
            schema: get("PG_SCHEMA", "public"),
            max_connections: parse_value("DB_MAX_CONNECTIONS", &get("DB_MAX_CONNECTIONS", "5"))?,
            acquire_timeout_secs: parse_value(
                "DB_ACQUIRE_TIMEOUT_SECS",
                &get("DB_ACQUIRE_TIMEOUT_SECS", "10"),
            )?,
            read_only: parse_bool("DB_READ_ONLY", &get("DB_READ_ONLY", "true"))?,
        };

        let api_key = lookup("GROQ_API_KEY")
            .or_else(|| lookup("LLM_API_KEY"))
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && !PLACEHOLDER_KEYS.contains(&k.as_str()));

        let llm = LlmConfig {
            api_key,
            base_url: get("LLM_BASE_URL", "https://api.groq.com/openai/v1"),
            model: get("LLM_MODEL", "llama-3.1-8b-instant"),
            embedding_model: get("EMBEDDING_MODEL", "text-embedding-3-small"),
            temperature: parse_value("LLM_TEMPERATURE", &get("LLM_TEMPERATURE", "0.1"))?,
            max_tokens: parse_value("LLM_MAX_TOKENS", &get("LLM_MAX_TOKENS", "1000"))?,
            timeout_secs: parse_value("LLM_TIMEOUT_SECS", &get("LLM_TIMEOUT_SECS", "30"))?,
        };

        let category_columns = get("CATEGORY_COLUMNS", "stations.station_name,trips.rider_gender")
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let matching = MatchingConfig {
            strategy: get("MATCHER", "lexical").parse()?,
            embedder: get("EMBEDDER", "hashing").parse()?,
            threshold: parse_value("MATCH_THRESHOLD", &get("MATCH_THRESHOLD", "0.4"))?,
            entity_threshold: parse_value("ENTITY_THRESHOLD", &get("ENTITY_THRESHOLD", "0.75"))?,
            enum_threshold: parse_value("ENUM_THRESHOLD", &get("ENUM_THRESHOLD", "0.6"))?,
            top_k: parse_value("MATCH_TOP_K", &get("MATCH_TOP_K", "3"))?,
            category_columns,
        };

        let config = Self { database, llm, matching };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        let thresholds = [
            ("MATCH_THRESHOLD", self.matching.threshold),
            ("ENTITY_THRESHOLD", self.matching.entity_threshold),
            ("ENUM_THRESHOLD", self.matching.enum_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(PipelineError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.matching.top_k == 0 {
            return Err(PipelineError::Config("MATCH_TOP_K must be at least 1".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(PipelineError::Config(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a hosted model is configured.
    pub fn has_model(&self) -> bool {
        self.llm.api_key.is_some()
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| PipelineError::Config(format!("Invalid value for {}: '{}'", key, raw)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PipelineError::Config(format!("Invalid value for {}: '{}'", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.database.database, "bike_share");
        assert_eq!(config.database.schema, "public");
        assert!(config.database.read_only);
        assert_eq!(config.llm.model, "llama-3.1-8b-instant");
        assert_eq!(config.matching.strategy, MatcherKind::Lexical);
        assert_eq!(config.matching.threshold, 0.4);
        assert_eq!(config.matching.top_k, 3);
        assert_eq!(
            config.matching.category_columns,
            vec!["stations.station_name".to_string(), "trips.rider_gender".to_string()]
        );
        assert!(!config.has_model());
    }

    #[test]
    fn test_placeholder_key_means_no_model() {
        let config = config_from(&[("GROQ_API_KEY", "default-groq-key")]).unwrap();
        assert!(!config.has_model());

        let config = config_from(&[("LLM_API_KEY", "sk-live")]).unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-live"));
    }

    #[test]
    fn test_matcher_selection() {
        let config = config_from(&[("MATCHER", "embedding"), ("EMBEDDER", "remote")]).unwrap();
        assert_eq!(config.matching.strategy, MatcherKind::Embedding);
        assert_eq!(config.matching.embedder, EmbedderKind::Remote);

        assert!(config_from(&[("MATCHER", "telepathy")]).is_err());
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        let err = config_from(&[("PGPORT", "not-a-port")]).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = config_from(&[("MATCH_THRESHOLD", "1.5")]).unwrap_err();
        assert!(err.to_string().contains("MATCH_THRESHOLD"));

        assert!(config_from(&[("MATCH_TOP_K", "0")]).is_err());
    }

    #[test]
    fn test_database_url_is_kept() {
        let config = config_from(&[("DATABASE_URL", "postgres://u:p@db:6543/rides")]).unwrap();
        assert_eq!(config.database.url.as_deref(), Some("postgres://u:p@db:6543/rides"));
    }
}
