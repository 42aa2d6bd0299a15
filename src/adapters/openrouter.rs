use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::error::LlmError;
use crate::ports::{ChatRequest, LlmClient};

use super::with_retry;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Chat client for OpenRouter-compatible `/chat/completions` endpoints
/// (OpenRouter, OpenAI, vLLM, LM Studio). Owns the process-wide in-flight
/// semaphore: every call acquires a permit before sending and releases it
/// on return, including error paths.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    inflight: Arc<Semaphore>,
    referer: Option<String>,
    title: Option<String>,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>, max_inflight: usize) -> OpenRouterClient {
        OpenRouterClient {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENROUTER_BASE_URL.into(),
            inflight: Arc::new(Semaphore::new(max_inflight.max(1))),
            referer: None,
            title: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> OpenRouterClient {
        self.base_url = base_url.into();
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> OpenRouterClient {
        self.client = client;
        self
    }

    /// Attribution headers OpenRouter recommends.
    pub fn with_attribution(
        mut self,
        referer: Option<String>,
        title: Option<String>,
    ) -> OpenRouterClient {
        self.referer = referer;
        self.title = title;
        self
    }

    /// Share this client's in-flight semaphore with another adapter so the
    /// global LLM bound covers both.
    pub fn inflight_semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.inflight)
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let _permit = self
            .inflight
            .acquire()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let mut body = json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": request.temperature,
        });
        if request.json_object {
            body["response_format"] = json!({"type": "json_object"});
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json");
        if let Some(referer) = &self.referer {
            http = http.header("http-referer", referer);
        }
        if let Some(title) = &self.title {
            http = http.header("x-title", title);
        }

        let response = http
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if status != 200 {
            return Err(LlmError::ApiError { status, body: text });
        }

        let parsed: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string())
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError> {
        with_retry(|| self.send(&request), LlmError::is_transient).await
    }
}
