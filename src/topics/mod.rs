pub mod assign;
pub mod discover;
pub mod documents;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A discovered topic with its label, keywords, and centroid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: i64,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub representative_conversations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub centroid_embedding: Option<Vec<f32>>,
}

/// Registry of discovered topics. Immutable once written; the assigner
/// only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRegistry {
    pub generated_at: String,
    pub embedding_model: String,
    pub num_topics: usize,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Primary,
    Secondary,
}

/// One topic scored against one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicAssignment {
    pub topic_id: i64,
    pub name: String,
    pub score: f32,
    pub rank: Rank,
}

/// Multi-label assignment for a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTopics {
    pub conversation_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    pub topics: Vec<TopicAssignment>,
    pub atom_count: usize,
    pub review_flag: bool,
}

impl ConversationTopics {
    pub fn primary(&self) -> Option<&TopicAssignment> {
        self.topics.iter().find(|t| t.rank == Rank::Primary)
    }
}

pub async fn load_topic_registry(path: &Path) -> Result<TopicRegistry, PipelineError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PipelineError::InputNotFound(format!("topic registry not found: {}", path.display()))
        } else {
            e.into()
        }
    })?;
    Ok(serde_json::from_str(&text)?)
}

pub async fn save_topic_registry(
    registry: &TopicRegistry,
    path: &Path,
) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(registry)?;
    crate::jsonl::write_text_atomic(path, &json).await
}
