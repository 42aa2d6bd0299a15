use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::extract::candidates::CandidateSet;
use crate::extract::json_repair::extract_json_from_text;
use crate::extract::prompts;
use crate::ports::{AtomExtractor, ChatRequest, LlmClient};

/// Chat-backed implementation of the two-pass extractor. Pass 1 runs on
/// the fast model with a JSON repair ladder; Pass 2 runs on the big model
/// and falls back to its input candidates on any malformed reply. Neither
/// pass ever fails the conversation.
pub struct TwoPassExtractor {
    llm: Arc<dyn LlmClient>,
    fast_model: String,
    big_model: String,
}

impl TwoPassExtractor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        fast_model: impl Into<String>,
        big_model: impl Into<String>,
    ) -> TwoPassExtractor {
        TwoPassExtractor {
            llm,
            fast_model: fast_model.into(),
            big_model: big_model.into(),
        }
    }

    /// Chat with `json_object` requested, retrying once without it when the
    /// provider rejects structured output mode.
    async fn chat_json(&self, request: ChatRequest) -> Result<String, crate::error::LlmError> {
        match self.llm.chat(request.clone().with_json_object(true)).await {
            Ok(content) => Ok(content),
            Err(e) if e.is_json_mode_rejection() => {
                debug!(error = %e, "json_object not supported, falling back to regular mode");
                self.llm.chat(request.with_json_object(false)).await
            }
            Err(e) => Err(e),
        }
    }

    async fn parse_or_repair(&self, content: &str) -> Option<Value> {
        if let Ok(value) = serde_json::from_str::<Value>(content) {
            if value.is_object() {
                return Some(value);
            }
        }
        if let Some(value) = extract_json_from_text(content) {
            return Some(value);
        }

        warn!("JSON parse failed, attempting repair");
        let repair = ChatRequest::new(
            &self.fast_model,
            prompts::JSON_REPAIR_SYSTEM,
            prompts::json_repair_prompt(content),
        )
        .with_temperature(0.1);

        match self.llm.chat(repair).await {
            Ok(repaired) => extract_json_from_text(&repaired)
                .or_else(|| serde_json::from_str(&repaired).ok().filter(Value::is_object)),
            Err(e) => {
                warn!(error = %e, "repair call failed");
                None
            }
        }
    }
}

#[async_trait]
impl AtomExtractor for TwoPassExtractor {
    async fn extract_from_chunk(&self, chunk_text: &str) -> CandidateSet {
        let request = ChatRequest::new(
            &self.fast_model,
            prompts::PASS1_SYSTEM,
            prompts::pass1_prompt(chunk_text),
        )
        .with_temperature(0.3);

        let content = match self.chat_json(request).await {
            Ok(content) if !content.is_empty() => content,
            Ok(_) => return CandidateSet::default(),
            Err(e) => {
                error!(error = %e, "error in fast extraction");
                return CandidateSet::default();
            }
        };

        match self.parse_or_repair(&content).await {
            Some(value) => CandidateSet::from_reply(&value),
            None => {
                error!(
                    response_preview = %content.chars().take(200).collect::<String>(),
                    "failed to parse JSON after repair"
                );
                CandidateSet::default()
            }
        }
    }

    async fn refine_atoms(
        &self,
        candidates: CandidateSet,
        conversation_id: &str,
        conversation_title: Option<&str>,
    ) -> CandidateSet {
        let candidates_json = match serde_json::to_string(&candidates) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "could not serialize candidates, using them as-is");
                return candidates;
            }
        };

        let request = ChatRequest::new(
            &self.big_model,
            prompts::PASS2_SYSTEM,
            prompts::pass2_prompt(
                conversation_id,
                conversation_title.unwrap_or("Unknown"),
                &candidates_json,
            ),
        )
        .with_temperature(0.2)
        .with_json_object(true);

        let content = match self.llm.chat(request).await {
            Ok(content) => content,
            Err(e) => {
                warn!(conversation_id, error = %e, "error in refinement, falling back to candidates");
                return candidates;
            }
        };

        if content.is_empty() {
            warn!(conversation_id, "empty response from refinement, using candidates as-is");
            return candidates;
        }

        match serde_json::from_str::<Value>(&content) {
            Ok(value) if value.is_object() => CandidateSet::from_reply(&value),
            _ => {
                warn!(conversation_id, "invalid response format, using candidates as-is");
                candidates
            }
        }
    }
}
