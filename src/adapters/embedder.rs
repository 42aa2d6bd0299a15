use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{LlmError, PipelineError};
use crate::ports::Embedder;

use super::openrouter::OPENROUTER_BASE_URL;
use super::with_retry;

/// Embedding client for OpenRouter-compatible `/embeddings` endpoints.
/// Splits input into batches and retries transient failures with backoff.
pub struct OpenRouterEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    batch_size: usize,
}

impl OpenRouterEmbedder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> OpenRouterEmbedder {
        OpenRouterEmbedder {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENROUTER_BASE_URL.into(),
            model: model.into(),
            batch_size: 100,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> OpenRouterEmbedder {
        self.base_url = base_url.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> OpenRouterEmbedder {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
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
        let data = parsed["data"]
            .as_array()
            .ok_or_else(|| LlmError::Parse("missing data array in embeddings reply".into()))?;

        let vectors: Vec<Vec<f32>> = data
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|xs| xs.iter().filter_map(Value::as_f64).map(|x| x as f32).collect())
                    .unwrap_or_default()
            })
            .collect();

        if vectors.len() != texts.len() {
            return Err(LlmError::Parse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenRouterEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = with_retry(|| self.embed_batch(batch), LlmError::is_transient)
                .await
                .map_err(PipelineError::Llm)?;
            all.extend(vectors);
        }
        Ok(all)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}
