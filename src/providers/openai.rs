//! OpenAI chat-completions client -- the production completion API.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{CompletionClient, ProviderError};

const SYSTEM_PROMPT: &str = "You are an assistant embedded in a home-automation \
    monitoring service. Answer precisely, and when asked for JSON respond with \
    JSON only, no commentary.";

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    /// Cheaper model used when the caller asks for cost optimization.
    fallback_model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        model: String,
        fallback_model: String,
        base_url: String,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            fallback_model,
            base_url,
            max_tokens,
            temperature,
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, prompt: &str, cost_optimize: bool) -> Result<String, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let model = if cost_optimize {
            &self.fallback_model
        } else {
            &self.model
        };

        let body = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        debug!(%model, "completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let reply: Value = response.json().await?;
        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ProviderError::Parse("missing choices[0].message.content".to_string())
            })?
            .to_string();

        Ok(content)
    }
}
