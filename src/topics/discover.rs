use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::embedding::{mean_vector, EmbeddingCache};
use crate::error::PipelineError;
use crate::ports::{Clusterer, Embedder, Pooling, TopicLabel, TopicLabeler};

use super::documents::ConversationDocuments;
use super::{Topic, TopicRegistry};

/// Topic discovery: embed conversation documents with chunked pooling,
/// cluster them, label each non-outlier cluster, and compute centroids.
#[derive(Clone)]
pub struct TopicDiscovery {
    embedder: Arc<dyn Embedder>,
    clusterer: Arc<dyn Clusterer>,
    labeler: Arc<dyn TopicLabeler>,
    config: Arc<PipelineConfig>,
}

impl TopicDiscovery {
    pub fn new(
        embedder: impl Embedder + 'static,
        clusterer: impl Clusterer + 'static,
        labeler: impl TopicLabeler + 'static,
        config: PipelineConfig,
    ) -> TopicDiscovery {
        TopicDiscovery {
            embedder: Arc::new(embedder),
            clusterer: Arc::new(clusterer),
            labeler: Arc::new(labeler),
            config: Arc::new(config),
        }
    }

    /// Discover and label topics. The outlier cluster `-1` is dropped from
    /// the registry; topic order is ascending by id regardless of labeling
    /// completion order.
    pub async fn discover(
        &self,
        documents: &ConversationDocuments,
        cache: Option<&EmbeddingCache>,
        skip_labeling: bool,
    ) -> Result<TopicRegistry, PipelineError> {
        if documents.documents.is_empty() {
            return Err(PipelineError::Clustering("no documents provided".into()));
        }

        let doc_ids = documents.ids();
        let doc_texts = documents.texts_for(&doc_ids);

        info!(
            num_conversations = doc_texts.len(),
            chunk_tokens = self.config.embed_chunk_tokens,
            "generating embeddings for conversations"
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

        let outcome =
            self.clusterer
                .cluster(&embeddings, &doc_texts, self.config.target_topics)?;
        if outcome.labels.len() != doc_ids.len() {
            return Err(PipelineError::Clustering(format!(
                "clusterer returned {} labels for {} documents",
                outcome.labels.len(),
                doc_ids.len()
            )));
        }

        // Group member documents per cluster, preserving document order;
        // the outlier cluster is dropped here.
        let mut members: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (idx, label) in outcome.labels.iter().enumerate() {
            if *label != -1 {
                members.entry(*label).or_default().push(idx);
            }
        }

        let num_outliers = outcome.labels.iter().filter(|l| **l == -1).count();
        info!(
            num_topics = members.len(),
            num_outliers,
            "discovered topics"
        );

        let mut topics = Vec::with_capacity(members.len());
        let semaphore = Arc::new(Semaphore::new(self.config.topic_max_concurrency.max(1)));
        let mut labelers: JoinSet<Topic> = JoinSet::new();

        for (topic_id, member_indices) in &members {
            if member_indices.is_empty() {
                continue;
            }

            let representative: Vec<(String, String)> = member_indices
                .iter()
                .take(3)
                .map(|i| (doc_ids[*i].clone(), doc_texts[*i].clone()))
                .collect();
            let keywords: Vec<String> = outcome
                .keywords
                .get(topic_id)
                .map(|kw| kw.iter().take(10).cloned().collect())
                .unwrap_or_default();
            let centroid_members: Vec<&[f32]> = member_indices
                .iter()
                .map(|i| embeddings[*i].as_slice())
                .collect();
            let centroid = mean_vector(&centroid_members);
            let rep_ids: Vec<String> =
                representative.iter().map(|(id, _)| id.clone()).collect();

            if skip_labeling {
                let preview = keywords.iter().take(5).cloned().collect::<Vec<_>>().join(", ");
                topics.push(Topic {
                    topic_id: *topic_id,
                    name: format!("Topic {topic_id}"),
                    description: format!("Topic {topic_id} with keywords: {preview}"),
                    keywords,
                    representative_conversations: rep_ids,
                    centroid_embedding: Some(centroid),
                });
                continue;
            }

            let topic_id = *topic_id;
            let labeler = Arc::clone(&self.labeler);
            let semaphore = Arc::clone(&semaphore);
            labelers.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let label = match labeler
                    .label_topic(topic_id, &representative, &keywords)
                    .await
                {
                    Ok(label) => label,
                    Err(e) => {
                        warn!(topic_id, error = %e, "failed to label topic");
                        TopicLabel {
                            name: format!("Topic {topic_id}"),
                            description: "No description available".into(),
                        }
                    }
                };
                Topic {
                    topic_id,
                    name: label.name,
                    description: label.description,
                    keywords,
                    representative_conversations: rep_ids,
                    centroid_embedding: Some(centroid),
                }
            });
        }

        while let Some(joined) = labelers.join_next().await {
            match joined {
                Ok(topic) => topics.push(topic),
                Err(e) => warn!(error = %e, "topic labeling worker panicked"),
            }
        }

        // Registry output is deterministic regardless of labeling order
        topics.sort_by_key(|t| t.topic_id);

        info!(num_labeled = topics.len(), "labeled topics");

        Ok(TopicRegistry {
            generated_at: chrono::Utc::now().to_rfc3339(),
            embedding_model: self.embedder.model().to_string(),
            num_topics: topics.len(),
            topics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ClusterOutcome, TopicLabel};
    use crate::error::LlmError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            // Two obvious directions: documents mentioning "pricing" point
            // one way, everything else the other.
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("pricing") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }

        fn model(&self) -> &str {
            "test-embed"
        }
    }

    /// Clusterer double with a fixed labeling: docs containing "pricing"
    /// are cluster 1, "orphan" docs are outliers, the rest cluster 0.
    struct FixedClusterer;

    impl Clusterer for FixedClusterer {
        fn cluster(
            &self,
            _embeddings: &[Vec<f32>],
            documents: &[String],
            _target_topics: usize,
        ) -> Result<ClusterOutcome, PipelineError> {
            let labels = documents
                .iter()
                .map(|d| {
                    if d.contains("orphan") {
                        -1
                    } else if d.contains("pricing") {
                        1
                    } else {
                        0
                    }
                })
                .collect();
            let mut keywords = HashMap::new();
            keywords.insert(0i64, vec!["infra".to_string(), "deploy".to_string()]);
            keywords.insert(1i64, vec!["pricing".to_string()]);
            Ok(ClusterOutcome { labels, keywords })
        }
    }

    struct EchoLabeler;

    #[async_trait]
    impl TopicLabeler for EchoLabeler {
        async fn label_topic(
            &self,
            topic_id: i64,
            _docs: &[(String, String)],
            keywords: &[String],
        ) -> Result<TopicLabel, LlmError> {
            Ok(TopicLabel {
                name: format!("Cluster {topic_id}"),
                description: format!("About {}", keywords.join("/")),
            })
        }
    }

    struct FailingLabeler;

    #[async_trait]
    impl TopicLabeler for FailingLabeler {
        async fn label_topic(
            &self,
            _topic_id: i64,
            _docs: &[(String, String)],
            _keywords: &[String],
        ) -> Result<TopicLabel, LlmError> {
            Err(LlmError::Request("labeler offline".into()))
        }
    }

    fn documents() -> ConversationDocuments {
        let mut docs = ConversationDocuments::default();
        docs.documents
            .insert("a".into(), "Title: A\npricing tiers".into());
        docs.documents
            .insert("b".into(), "Title: B\ninfra work".into());
        docs.documents
            .insert("c".into(), "Title: C\nmore infra work".into());
        docs.documents
            .insert("d".into(), "Title: D\norphan thing".into());
        docs
    }

    #[tokio::test]
    async fn outliers_dropped_and_topics_sorted() {
        let discovery = TopicDiscovery::new(
            UnitEmbedder,
            FixedClusterer,
            EchoLabeler,
            PipelineConfig::default(),
        );
        let registry = discovery.discover(&documents(), None, false).await.unwrap();

        assert_eq!(registry.num_topics, 2);
        assert_eq!(registry.embedding_model, "test-embed");
        let ids: Vec<i64> = registry.topics.iter().map(|t| t.topic_id).collect();
        assert_eq!(ids, vec![0, 1]);
        // No topic carries the outlier id
        assert!(registry.topics.iter().all(|t| t.topic_id != -1));

        let infra = &registry.topics[0];
        assert_eq!(infra.name, "Cluster 0");
        assert_eq!(infra.representative_conversations, vec!["b", "c"]);
        assert_eq!(infra.keywords, vec!["infra", "deploy"]);
        // Centroid of two identical [0,1] embeddings
        assert_eq!(infra.centroid_embedding, Some(vec![0.0, 1.0]));
    }

    #[tokio::test]
    async fn labeling_failure_falls_back() {
        let discovery = TopicDiscovery::new(
            UnitEmbedder,
            FixedClusterer,
            FailingLabeler,
            PipelineConfig::default(),
        );
        let registry = discovery.discover(&documents(), None, false).await.unwrap();

        assert_eq!(registry.topics[0].name, "Topic 0");
        assert_eq!(registry.topics[0].description, "No description available");
        // Keywords and centroid survive the failed labeling call
        assert!(!registry.topics[0].keywords.is_empty());
        assert!(registry.topics[0].centroid_embedding.is_some());
    }

    #[tokio::test]
    async fn skip_labeling_uses_keyword_placeholders() {
        let discovery = TopicDiscovery::new(
            UnitEmbedder,
            FixedClusterer,
            FailingLabeler,
            PipelineConfig::default(),
        );
        let registry = discovery.discover(&documents(), None, true).await.unwrap();

        assert_eq!(registry.topics[1].name, "Topic 1");
        assert!(registry.topics[1].description.contains("pricing"));
    }

    #[tokio::test]
    async fn empty_documents_error() {
        let discovery = TopicDiscovery::new(
            UnitEmbedder,
            FixedClusterer,
            EchoLabeler,
            PipelineConfig::default(),
        );
        let err = discovery
            .discover(&ConversationDocuments::default(), None, false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no documents"));
    }
}
