use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};
use std::time::Duration;
use tracing::debug;

/// Client for an OpenAI-compatible chat/embeddings API (Groq by default).
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    embedding_model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.1,
            max_tokens: 1000,
        }
    }

    /// Build a client from configuration. Fails when no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| PipelineError::Config("No model API key configured".to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one user prompt and return the raw completion text.
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens
        });

        let response_json = self.post("chat/completions", &body).await?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PipelineError::Generation("No content in LLM response".to_string()))?;

        debug!("LLM returned {} characters", content.len());
        Ok(content.trim().to_string())
    }

    /// Embed a batch of texts with the configured embedding model.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts
        });

        let response_json = self.post("embeddings", &body).await?;

        let data = response_json["data"]
            .as_array()
            .ok_or_else(|| PipelineError::Generation("No data in embeddings response".to_string()))?;

        let mut vectors: Vec<(u64, Vec<f32>)> = data
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let index = item["index"].as_u64().unwrap_or(i as u64);
                let vector = item["embedding"]
                    .as_array()
                    .map(|values| values.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
                    .unwrap_or_default();
                (index, vector)
            })
            .collect();
        vectors.sort_by_key(|(index, _)| *index);

        if vectors.len() != texts.len() {
            return Err(PipelineError::Generation(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }

        Ok(vectors.into_iter().map(|(_, v)| v).collect())
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(&format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PipelineError::Generation(format!(
                "LLM API returned {}: {}",
                status, text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| PipelineError::Generation(format!("Failed to parse LLM response: {}", e)))
    }
}
