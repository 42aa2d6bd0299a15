use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::atom::Atom;
use crate::error::LlmError;
use crate::extract::json_repair::extract_json_from_text;
use crate::extract::meeting_meta::MeetingMetadata;
use crate::extract::prompts;
use crate::ports::{ChatRequest, LlmClient, MeetingExtractor};

/// One-shot structured extractor for meeting artifacts: the whole
/// linearized meeting plus its parsed metadata goes out in a single call
/// that returns universal atoms directly.
pub struct StructuredMeetingExtractor {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl StructuredMeetingExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> StructuredMeetingExtractor {
        StructuredMeetingExtractor {
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl MeetingExtractor for StructuredMeetingExtractor {
    async fn extract_meeting(
        &self,
        conversation_id: &str,
        meeting_title: &str,
        metadata: &MeetingMetadata,
        linearized_content: &str,
    ) -> Result<Vec<Atom>, LlmError> {
        let metadata_json =
            serde_json::to_string(metadata).map_err(|e| LlmError::Parse(e.to_string()))?;

        let request = ChatRequest::new(
            &self.model,
            prompts::MEETING_SYSTEM,
            prompts::meeting_prompt(
                conversation_id,
                meeting_title,
                &metadata_json,
                linearized_content,
            ),
        )
        .with_temperature(0.2)
        .with_json_object(true);

        let content = self.llm.chat(request).await?;
        let value = extract_json_from_text(&content)
            .ok_or_else(|| LlmError::Parse("meeting reply is not a JSON object".into()))?;

        let atoms = value
            .get("atoms")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| Atom::from_value(item.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(atoms)
    }
}
