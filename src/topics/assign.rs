use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::embedding::{cosine_similarity, EmbeddingCache};
use crate::error::PipelineError;
use crate::jsonl::write_jsonl;
use crate::ports::{Embedder, Pooling};

use super::documents::ConversationDocuments;
use super::{ConversationTopics, Rank, TopicAssignment, TopicRegistry};

/// Secondary topics must land within this distance of the primary score.
const SECONDARY_MARGIN: f32 = 0.25;
/// Primary/secondary gaps tighter than this are flagged as ambiguous.
const AMBIGUITY_MARGIN: f32 = 0.08;

/// Topic assignment: score each conversation document against the registry
/// centroids and pick one primary plus any qualifying secondaries.
#[derive(Clone)]
pub struct TopicAssigner {
    embedder: Arc<dyn Embedder>,
    config: Arc<PipelineConfig>,
}

impl TopicAssigner {
    pub fn new(embedder: impl Embedder + 'static, config: PipelineConfig) -> TopicAssigner {
        TopicAssigner {
            embedder: Arc::new(embedder),
            config: Arc::new(config),
        }
    }

    pub async fn assign(
        &self,
        documents: &ConversationDocuments,
        registry: &TopicRegistry,
        cache: Option<&EmbeddingCache>,
    ) -> Result<Vec<ConversationTopics>, PipelineError> {
        // Scores between different embedding spaces are meaningless, but
        // that's the caller's call; warn and proceed.
        if registry.embedding_model != self.config.embedding_model {
            warn!(
                registry_model = %registry.embedding_model,
                assignment_model = %self.config.embedding_model,
                "embedding model mismatch"
            );
        }

        if documents.documents.is_empty() {
            warn!("no conversations found");
            return Ok(Vec::new());
        }

        let centroids: Vec<(&super::Topic, &[f32])> = registry
            .topics
            .iter()
            .filter_map(|t| t.centroid_embedding.as_deref().map(|c| (t, c)))
            .collect();
        if centroids.is_empty() {
            warn!(reason = "no_centroids", "no topic centroids found in registry");
            return Ok(Vec::new());
        }

        let conv_ids = documents.ids();
        let doc_texts = documents.texts_for(&conv_ids);
        info!(
            num_conversations = conv_ids.len(),
            "generating embeddings for assignment"
        );
        let embeddings = self
            .embedder
            .embed_pooled(
                &doc_texts,
                self.config.embed_chunk_tokens,
                self.config.embed_overlap_tokens,
                Pooling::Mean,
                cache,
            )
            .await?;

        let mut assignments = Vec::with_capacity(conv_ids.len());
        for (conv_id, embedding) in conv_ids.iter().zip(&embeddings) {
            let conv_info = documents.info.get(conv_id).cloned().unwrap_or_default();
            let title = if conv_info.title.is_empty() {
                "Untitled Conversation".to_string()
            } else {
                conv_info.title.clone()
            };

            let mut scores: Vec<(i64, &str, f32)> = Vec::with_capacity(centroids.len());
            for (topic, centroid) in &centroids {
                match cosine_similarity(embedding, centroid) {
                    Some(score) => scores.push((topic.topic_id, topic.name.as_str(), score)),
                    None => warn!(
                        topic_id = topic.topic_id,
                        "dimension mismatch computing similarity, skipping topic"
                    ),
                }
            }
            scores.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

            let Some(&(primary_id, primary_name, primary_score)) = scores.first() else {
                assignments.push(ConversationTopics {
                    conversation_id: conv_id.clone(),
                    title,
                    project_id: conv_info.project_id,
                    project_name: conv_info.project_name,
                    topics: Vec::new(),
                    atom_count: conv_info.atom_count,
                    review_flag: true,
                });
                continue;
            };

            // The top-scoring topic is always the primary, even below the
            // review threshold.
            let mut topics = vec![TopicAssignment {
                topic_id: primary_id,
                name: primary_name.to_string(),
                score: primary_score,
                rank: Rank::Primary,
            }];

            for &(topic_id, name, score) in &scores[1..] {
                if score >= self.config.secondary_threshold
                    && primary_score - score <= SECONDARY_MARGIN
                {
                    topics.push(TopicAssignment {
                        topic_id,
                        name: name.to_string(),
                        score,
                        rank: Rank::Secondary,
                    });
                }
            }

            let mut review_flag = primary_score < self.config.primary_threshold;
            if let Some(&(_, _, runner_up)) = scores.get(1) {
                if runner_up >= self.config.secondary_threshold
                    && primary_score - runner_up < AMBIGUITY_MARGIN
                {
                    review_flag = true;
                }
            }

            assignments.push(ConversationTopics {
                conversation_id: conv_id.clone(),
                title,
                project_id: conv_info.project_id,
                project_name: conv_info.project_name,
                topics,
                atom_count: conv_info.atom_count,
                review_flag,
            });
        }

        info!(num_assignments = assignments.len(), "assigned topics");
        Ok(assignments)
    }
}

#[derive(Debug, Serialize)]
struct ReviewItem<'a> {
    conversation_id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_name: Option<&'a str>,
    primary_topic: &'a str,
    primary_score: f32,
    reason: &'a str,
}

/// Write `assignments.jsonl` and, when anything is flagged, a
/// `review_queue.jsonl` next to it.
pub async fn save_assignments(
    assignments: &[ConversationTopics],
    output_path: &Path,
    primary_threshold: f32,
) -> Result<(), PipelineError> {
    write_jsonl(output_path, assignments).await?;
    info!(
        output_path = %output_path.display(),
        num_assignments = assignments.len(),
        "saved assignments"
    );

    let flagged: Vec<&ConversationTopics> =
        assignments.iter().filter(|a| a.review_flag).collect();
    if flagged.is_empty() {
        return Ok(());
    }

    let review_path = output_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("review_queue.jsonl");

    let items: Vec<ReviewItem> = flagged
        .iter()
        .map(|assignment| {
            let primary = assignment.primary();
            let primary_score = primary.map(|p| p.score).unwrap_or(0.0);
            ReviewItem {
                conversation_id: &assignment.conversation_id,
                title: &assignment.title,
                project_id: assignment.project_id.as_deref(),
                project_name: assignment.project_name.as_deref(),
                primary_topic: primary.map(|p| p.name.as_str()).unwrap_or("None"),
                primary_score,
                reason: if primary.is_none() || primary_score < primary_threshold {
                    "low_confidence"
                } else {
                    "ambiguous"
                },
            }
        })
        .collect();

    write_jsonl(&review_path, &items).await?;
    info!(
        review_path = %review_path.display(),
        num_review_items = items.len(),
        "created review queue"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::Topic;
    use async_trait::async_trait;

    /// Embedder double: the document text names its embedding directly,
    /// e.g. "vec:1,0,0".
    struct VecEmbedder;

    #[async_trait]
    impl Embedder for VecEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            Ok(texts
                .iter()
                .map(|t| {
                    let spec = t.rsplit("vec:").next().unwrap_or("");
                    spec.split(',')
                        .filter_map(|x| x.trim().parse::<f32>().ok())
                        .collect()
                })
                .collect())
        }

        fn model(&self) -> &str {
            "openai/text-embedding-3-small"
        }
    }

    fn registry(centroids: Vec<(i64, &str, Vec<f32>)>) -> TopicRegistry {
        TopicRegistry {
            generated_at: "2025-01-01T00:00:00".into(),
            embedding_model: "openai/text-embedding-3-small".into(),
            num_topics: centroids.len(),
            topics: centroids
                .into_iter()
                .map(|(id, name, centroid)| Topic {
                    topic_id: id,
                    name: name.into(),
                    description: String::new(),
                    keywords: Vec::new(),
                    representative_conversations: Vec::new(),
                    centroid_embedding: Some(centroid),
                })
                .collect(),
        }
    }

    fn docs_with(id: &str, vector: &str) -> ConversationDocuments {
        let mut docs = ConversationDocuments::default();
        docs.documents.insert(id.into(), format!("vec:{vector}"));
        docs.info.insert(
            id.into(),
            super::super::documents::ConversationInfo {
                title: "Conv".into(),
                atom_count: 3,
                ..Default::default()
            },
        );
        docs
    }

    fn assigner() -> TopicAssigner {
        TopicAssigner::new(VecEmbedder, PipelineConfig::default())
    }

    // Centroid directions chosen so cosine(doc, t_i) are approximately the
    // spec's S5 values: primary 0.75, secondaries 0.72 and 0.60, plus a
    // fourth topic well below threshold.
    fn s5_registry() -> TopicRegistry {
        fn dir(angle: f32) -> Vec<f32> {
            vec![angle.cos(), angle.sin(), 0.0]
        }
        registry(vec![
            (0, "Primary", dir(0.75f32.acos())),
            (1, "Close", dir(0.72f32.acos())),
            (2, "Far", dir(0.60f32.acos())),
            (3, "Unrelated", dir(0.10f32.acos())),
        ])
    }

    #[tokio::test]
    async fn s5_thresholds() {
        let docs = docs_with("c1", "1,0,0");
        let assignments = assigner().assign(&docs, &s5_registry(), None).await.unwrap();

        let a = &assignments[0];
        let primary = a.primary().unwrap();
        assert_eq!(primary.name, "Primary");
        assert!((primary.score - 0.75).abs() < 1e-3);

        // Exactly one primary; secondaries are 0.72 and 0.60 (both >= 0.55
        // and within 0.25 of primary), 0.10 excluded
        let primaries = a.topics.iter().filter(|t| t.rank == Rank::Primary).count();
        assert_eq!(primaries, 1);
        let secondaries: Vec<&str> = a
            .topics
            .iter()
            .filter(|t| t.rank == Rank::Secondary)
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(secondaries, vec!["Close", "Far"]);

        // 0.75 - 0.72 = 0.03 < 0.08: ambiguous, flagged
        assert!(a.review_flag);
        assert_eq!(a.atom_count, 3);
    }

    #[tokio::test]
    async fn low_primary_is_flagged_but_still_assigned() {
        let reg = registry(vec![(0, "Weak", vec![0.45, (1.0f32 - 0.45 * 0.45).sqrt(), 0.0])]);
        let docs = docs_with("c1", "1,0,0");
        let assignments = assigner().assign(&docs, &reg, None).await.unwrap();

        let a = &assignments[0];
        assert_eq!(a.topics.len(), 1);
        assert_eq!(a.topics[0].rank, Rank::Primary);
        assert!(a.topics[0].score < 0.60);
        assert!(a.review_flag);
    }

    #[tokio::test]
    async fn confident_assignment_is_not_flagged() {
        let reg = registry(vec![
            (0, "Strong", vec![1.0, 0.0, 0.0]),
            (1, "Weak", vec![0.0, 1.0, 0.0]),
        ]);
        let docs = docs_with("c1", "1,0,0");
        let assignments = assigner().assign(&docs, &reg, None).await.unwrap();

        let a = &assignments[0];
        assert!(!a.review_flag);
        assert_eq!(a.topics.len(), 1);
        assert!((a.topics[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn zero_norm_document_scores_zero_everywhere() {
        let reg = registry(vec![(0, "Any", vec![1.0, 0.0, 0.0])]);
        let docs = docs_with("c1", "0,0,0");
        let assignments = assigner().assign(&docs, &reg, None).await.unwrap();

        let a = &assignments[0];
        assert_eq!(a.topics[0].score, 0.0);
        assert!(a.review_flag);
    }

    #[tokio::test]
    async fn registry_without_centroids_yields_nothing() {
        let mut reg = registry(vec![(0, "NoCentroid", vec![])]);
        reg.topics[0].centroid_embedding = None;
        let docs = docs_with("c1", "1,0,0");
        let assignments = assigner().assign(&docs, &reg, None).await.unwrap();
        assert!(assignments.is_empty());
    }

    #[tokio::test]
    async fn review_queue_written_with_reasons() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("assignments.jsonl");

        let assignments = vec![
            ConversationTopics {
                conversation_id: "low".into(),
                title: "Low".into(),
                project_id: None,
                project_name: None,
                topics: vec![TopicAssignment {
                    topic_id: 0,
                    name: "T".into(),
                    score: 0.40,
                    rank: Rank::Primary,
                }],
                atom_count: 1,
                review_flag: true,
            },
            ConversationTopics {
                conversation_id: "ambiguous".into(),
                title: "Ambiguous".into(),
                project_id: Some("p1".into()),
                project_name: None,
                topics: vec![
                    TopicAssignment {
                        topic_id: 0,
                        name: "T".into(),
                        score: 0.75,
                        rank: Rank::Primary,
                    },
                    TopicAssignment {
                        topic_id: 1,
                        name: "U".into(),
                        score: 0.72,
                        rank: Rank::Secondary,
                    },
                ],
                atom_count: 2,
                review_flag: true,
            },
            ConversationTopics {
                conversation_id: "fine".into(),
                title: "Fine".into(),
                project_id: None,
                project_name: None,
                topics: vec![TopicAssignment {
                    topic_id: 0,
                    name: "T".into(),
                    score: 0.95,
                    rank: Rank::Primary,
                }],
                atom_count: 3,
                review_flag: false,
            },
        ];

        save_assignments(&assignments, &out, 0.60).await.unwrap();

        let rows = crate::jsonl::read_jsonl(&out).await.unwrap();
        assert_eq!(rows.len(), 3);

        let review = crate::jsonl::read_jsonl(&dir.path().join("review_queue.jsonl"))
            .await
            .unwrap();
        assert_eq!(review.len(), 2);
        assert_eq!(review[0]["reason"], "low_confidence");
        assert_eq!(review[1]["reason"], "ambiguous");
        assert_eq!(review[1]["project_id"], "p1");
        assert!(review[0].get("project_id").is_none());
    }

    #[tokio::test]
    async fn no_review_queue_when_nothing_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("assignments.jsonl");
        let assignments = vec![ConversationTopics {
            conversation_id: "fine".into(),
            title: "Fine".into(),
            project_id: None,
            project_name: None,
            topics: Vec::new(),
            atom_count: 0,
            review_flag: false,
        }];

        save_assignments(&assignments, &out, 0.60).await.unwrap();
        assert!(!dir.path().join("review_queue.jsonl").exists());
    }
}
