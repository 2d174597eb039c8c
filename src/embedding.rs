//! Embedding providers.
//!
//! Implements [`Embedder`] for the remote backends:
//! - **`disabled`**: every call fails; used when embeddings are not configured.
//! - **`openai`**: `POST {url}/v1/embeddings` (OpenAI or any compatible
//!   server), bearer key from `OPENAI_API_KEY`.
//! - **`ollama`**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! Every call validates the batch against the configured count and
//! character limits before any network traffic, and every response is
//! checked for count and dimension. Missing or non-numeric values are
//! errors, never zero-filled.
//!
//! Retries follow [`crate::remote`].

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use repo_chat_core::embedding::{validate_batch, Embedder, Embeddings};
use repo_chat_core::RepoChatError;

use crate::config::EmbeddingConfig;
use crate::remote::{post_json, RetryPolicy};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the embedder selected by `config.provider`.
///
/// The OpenAI provider reads `OPENAI_API_KEY` from the environment.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Arc::new(HttpEmbedder::new(config, Some(key))?))
        }
        "ollama" => Ok(Arc::new(HttpEmbedder::new(config, None)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// Fails every call. Used when `embedding.provider = "disabled"`.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    fn max_batch_size(&self) -> usize {
        1
    }
    fn max_batch_chars(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Embeddings> {
        Err(RepoChatError::validation(
            "embedding provider is disabled; set [embedding] provider in the config",
        )
        .into())
    }
}

// ============ HTTP providers ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    OpenAi,
    Ollama,
}

/// OpenAI-compatible or Ollama embedding client.
pub struct HttpEmbedder {
    flavor: Flavor,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    batch_size: usize,
    max_batch_chars: usize,
    retry: RetryPolicy,
}

impl HttpEmbedder {
    /// `api_key` is sent as a bearer token when present.
    pub fn new(config: &EmbeddingConfig, api_key: Option<String>) -> Result<Self> {
        let flavor = match config.provider.as_str() {
            "openai" => Flavor::OpenAi,
            "ollama" => Flavor::Ollama,
            other => bail!("not an HTTP embedding provider: {}", other),
        };
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for {}", config.provider))?;
        let dims = config
            .dims
            .filter(|d| *d > 0)
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {}", config.provider))?;

        let base = match (&config.url, flavor) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Flavor::OpenAi) => OPENAI_URL.to_string(),
            (None, Flavor::Ollama) => OLLAMA_URL.to_string(),
        };
        let endpoint = match flavor {
            Flavor::OpenAi => format!("{}/v1/embeddings", base),
            Flavor::Ollama => format!("{}/api/embed", base),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            flavor,
            client,
            endpoint,
            api_key,
            model,
            dims,
            batch_size: config.batch_size,
            max_batch_chars: config.max_batch_chars,
            retry: RetryPolicy::new(config.max_retries, config.retry_base_ms),
        })
    }

    fn label(&self) -> &'static str {
        match self.flavor {
            Flavor::OpenAi => "OpenAI embeddings",
            Flavor::Ollama => "Ollama embeddings",
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    fn max_batch_chars(&self) -> usize {
        self.max_batch_chars
    }

    async fn embed(&self, texts: &[String]) -> Result<Embeddings> {
        validate_batch(texts, self.batch_size, self.max_batch_chars)?;

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &body,
            self.retry,
            self.label(),
        )
        .await?;

        let vectors = match self.flavor {
            Flavor::OpenAi => parse_openai_response(&json)?,
            Flavor::Ollama => parse_ollama_response(&json)?,
        };
        if vectors.len() != texts.len() {
            bail!(
                "Invalid {} response: {} embeddings for {} inputs",
                self.label(),
                vectors.len(),
                texts.len()
            );
        }

        let embeddings = Embeddings::from_vectors(vectors)?;
        tracing::debug!(texts = texts.len(), dims = embeddings.dims, "embedded batch");
        Ok(embeddings)
    }
}

fn parse_vector(value: &serde_json::Value, what: &str) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid {} response: embedding is not an array", what))?;
    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("Invalid {} response: non-numeric value", what))
        })
        .collect()
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }

    // Sort by index to ensure order matches input
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| parse_vector(e, "Ollama"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_response_sorted_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_non_numeric_values_rejected() {
        let json = serde_json::json!({"data": [{"index": 0, "embedding": [0.5, "x"]}]});
        assert!(parse_openai_response(&json).is_err());
        let json = serde_json::json!({"embeddings": [[0.5, null]]});
        assert!(parse_ollama_response(&json).is_err());
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
        assert!(parse_ollama_response(&serde_json::json!({"embeddings": 3})).is_err());
    }

    #[test]
    fn test_create_disabled() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
    }

    #[test]
    fn test_http_embedder_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            dims: Some(4),
            ..Default::default()
        };
        assert!(HttpEmbedder::new(&config, None).is_err());
    }
}
