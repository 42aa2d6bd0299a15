use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::extract::json_repair::extract_json_from_text;
use crate::extract::prompts;
use crate::ports::{ChatRequest, LlmClient, TopicLabel, TopicLabeler};

/// Chat-backed topic labeler. Parse failures surface as errors; the
/// discovery stage owns the `Topic {id}` fallback.
pub struct ChatTopicLabeler {
    llm: Arc<dyn LlmClient>,
    model: String,
    max_tokens: Option<u32>,
}

impl ChatTopicLabeler {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> ChatTopicLabeler {
        ChatTopicLabeler {
            llm,
            model: model.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> ChatTopicLabeler {
        self.max_tokens = Some(max_tokens);
        self
    }
}

const DOC_SAMPLE_CHARS: usize = 500;

#[async_trait]
impl TopicLabeler for ChatTopicLabeler {
    async fn label_topic(
        &self,
        topic_id: i64,
        representative_docs: &[(String, String)],
        keywords: &[String],
    ) -> Result<TopicLabel, LlmError> {
        let doc_samples = representative_docs
            .iter()
            .map(|(conv_id, text)| {
                let sample: String = text.chars().take(DOC_SAMPLE_CHARS).collect();
                format!("Conversation ID: {conv_id}\n\n{sample}...")
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let mut request = ChatRequest::new(
            &self.model,
            prompts::TOPIC_LABEL_SYSTEM,
            prompts::topic_label_prompt(&doc_samples, keywords),
        )
        .with_temperature(0.3);
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let content = self.llm.chat(request).await?;
        if content.is_empty() {
            return Err(LlmError::Parse("empty labeling reply".into()));
        }

        let value = extract_json_from_text(&content)
            .ok_or_else(|| LlmError::Parse("labeling reply is not a JSON object".into()))?;

        Ok(TopicLabel {
            name: value["name"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("Topic {topic_id}")),
            description: value["description"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| "No description available".into()),
        })
    }
}
