//! Text-generation providers.
//!
//! - **`disabled`**: every call fails.
//! - **`openai`**: `POST {url}/v1/chat/completions`, bearer key from
//!   `OPENAI_API_KEY`.
//! - **`ollama`**: `POST {url}/api/chat` with `stream: false`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use repo_chat_core::generation::{GenerationRequest, Generator};
use repo_chat_core::RepoChatError;

use crate::config::GenerationConfig;
use crate::remote::{post_json, RetryPolicy};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => {
            let key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Arc::new(HttpGenerator::new(config, Some(key))?))
        }
        "ollama" => Ok(Arc::new(HttpGenerator::new(config, None)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        Err(RepoChatError::validation(
            "generation provider is disabled; set [generation] provider in the config",
        )
        .into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    OpenAi,
    Ollama,
}

pub struct HttpGenerator {
    flavor: Flavor,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

impl HttpGenerator {
    pub fn new(config: &GenerationConfig, api_key: Option<String>) -> Result<Self> {
        let flavor = match config.provider.as_str() {
            "openai" => Flavor::OpenAi,
            "ollama" => Flavor::Ollama,
            other => bail!("not an HTTP generation provider: {}", other),
        };
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for {}", config.provider))?;
        let base = match (&config.url, flavor) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Flavor::OpenAi) => OPENAI_URL.to_string(),
            (None, Flavor::Ollama) => OLLAMA_URL.to_string(),
        };
        let endpoint = match flavor {
            Flavor::OpenAi => format!("{}/v1/chat/completions", base),
            Flavor::Ollama => format!("{}/api/chat", base),
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
            retry: RetryPolicy::new(config.max_retries, config.retry_base_ms),
        })
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        match self.flavor {
            Flavor::OpenAi => {
                let mut body = serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                });
                if let Some(t) = request.temperature {
                    body["temperature"] = serde_json::json!(t);
                }
                body
            }
            Flavor::Ollama => {
                let mut body = serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                    "stream": false,
                });
                if let Some(t) = request.temperature {
                    body["options"] = serde_json::json!({ "temperature": t });
                }
                body
            }
        }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let label = match self.flavor {
            Flavor::OpenAi => "OpenAI chat",
            Flavor::Ollama => "Ollama chat",
        };
        let json = post_json(
            &self.client,
            &self.endpoint,
            self.api_key.as_deref(),
            &self.body(request),
            self.retry,
            label,
        )
        .await?;

        let content = match self.flavor {
            Flavor::OpenAi => json
                .pointer("/choices/0/message/content")
                .and_then(|c| c.as_str()),
            Flavor::Ollama => json.pointer("/message/content").and_then(|c| c.as_str()),
        };
        match content {
            Some(text) => Ok(text.to_string()),
            None => bail!("Invalid {} response: missing message content", label),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repo_chat_core::generation::PromptMessage;
    use repo_chat_core::models::Role;

    fn config(provider: &str) -> GenerationConfig {
        GenerationConfig {
            provider: provider.into(),
            model: Some("m".into()),
            url: Some("http://localhost:1/".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_request_bodies() {
        let request = GenerationRequest {
            messages: vec![
                PromptMessage::new(Role::System, "sys"),
                PromptMessage::new(Role::User, "hi"),
            ],
            temperature: Some(0.5),
        };

        let openai = HttpGenerator::new(&config("openai"), Some("k".into())).unwrap();
        assert_eq!(openai.endpoint, "http://localhost:1/v1/chat/completions");
        let body = openai.body(&request);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["temperature"], 0.5);

        let ollama = HttpGenerator::new(&config("ollama"), None).unwrap();
        let body = ollama.body(&request);
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["temperature"], 0.5);
    }
}
