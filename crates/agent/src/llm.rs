use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;

use teamsforce_core::config::{LlmConfig, LlmProvider};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns the assistant message for one system + user exchange.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-compatible `chat/completions` client for Azure OpenAI, OpenAI and Ollama.
pub struct ChatCompletionsClient {
    http: Client,
    chat_url: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionsClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let base_url = config.base_url.as_deref().map(|url| url.trim_end_matches('/'));
        let chat_url = match config.provider {
            LlmProvider::AzureOpenAi => {
                let base = base_url.ok_or_else(|| anyhow!("azure openai requires llm.base_url"))?;
                format!(
                    "{base}/openai/deployments/{}/chat/completions?api-version={}",
                    config.model, config.api_version
                )
            }
            LlmProvider::OpenAi => {
                format!("{}/chat/completions", base_url.unwrap_or(OPENAI_BASE_URL))
            }
            LlmProvider::Ollama => {
                format!("{}/v1/chat/completions", base_url.unwrap_or(OLLAMA_BASE_URL))
            }
        };

        if let Some(key) = config.api_key.as_ref() {
            let key = key.expose_secret();
            let (name, value) = match config.provider {
                LlmProvider::AzureOpenAi => (HeaderName::from_static("api-key"), key.to_owned()),
                LlmProvider::OpenAi | LlmProvider::Ollama => (AUTHORIZATION, format!("Bearer {key}")),
            };
            let mut value = HeaderValue::from_str(&value).context("invalid llm api key")?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("llm http client build failed")?;

        Ok(Self { http, chat_url, model: config.model.clone() })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let response = self
            .http
            .post(&self.chat_url)
            .json(&body)
            .send()
            .await
            .context("llm request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("llm returned HTTP {}: {}", status.as_u16(), detail));
        }

        let completion: ChatCompletion =
            response.json().await.context("llm response was not a chat completion")?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow!("llm returned no message content"))
    }
}
