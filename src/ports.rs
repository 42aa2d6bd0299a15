use std::collections::HashMap;

use async_trait::async_trait;

use crate::atom::Atom;
use crate::chunking::{chunk_text, TokenEstimator};
use crate::embedding::{normalized_mean_pool, EmbeddingCache};
use crate::error::{LlmError, PipelineError};
use crate::extract::candidates::CandidateSet;
use crate::extract::meeting_meta::MeetingMetadata;

/// One chat completion request. Adapters own retry and the process-wide
/// in-flight semaphore; callers just describe the call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub json_object: bool,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> ChatRequest {
        ChatRequest {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            temperature: 0.3,
            json_object: false,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> ChatRequest {
        self.temperature = temperature;
        self
    }

    pub fn with_json_object(mut self, json_object: bool) -> ChatRequest {
        self.json_object = json_object;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> ChatRequest {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Pure LLM chat call. Request in, text out. Must be idempotent-safe;
/// the pipeline retries through it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError>;
}

/// Pooling strategy for chunked document embeddings. Only normalized mean
/// exists today; the variant is part of the cache-versioned contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pooling {
    #[default]
    Mean,
}

/// Text embedding service. `embed` is the raw batched API call (rows come
/// back L2-unit); `embed_pooled` layers chunking, the content-addressed
/// cache, and normalized mean pooling on top and is shared by every
/// implementation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts. Implementations handle API batching and
    /// retry; the returned matrix has one row per input text.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    /// Model identifier; participates in cache keys and the topic registry.
    fn model(&self) -> &str;

    /// Maximum chunks per underlying API call.
    fn batch_size(&self) -> usize {
        100
    }

    /// Embed with chunked pooling: chunk each text, resolve chunks through
    /// the cache, batch the misses through `embed`, write back, then pool
    /// each text's chunk vectors by normalized mean. Texts with zero chunks
    /// (all whitespace) yield a zero vector of the batch's dimension so row
    /// indexing is preserved.
    async fn embed_pooled(
        &self,
        texts: &[String],
        chunk_tokens: usize,
        overlap_tokens: usize,
        pooling: Pooling,
        cache: Option<&EmbeddingCache>,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        let Pooling::Mean = pooling;
        let estimator = TokenEstimator::for_model(self.model());

        let mut all_chunks: Vec<String> = Vec::new();
        let mut chunk_doc: Vec<usize> = Vec::new();
        for (doc_idx, text) in texts.iter().enumerate() {
            for chunk in chunk_text(text, chunk_tokens, overlap_tokens, &estimator) {
                if !chunk.trim().is_empty() {
                    all_chunks.push(chunk);
                    chunk_doc.push(doc_idx);
                }
            }
        }

        if all_chunks.is_empty() {
            return Ok(texts.iter().map(|_| Vec::new()).collect());
        }

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; all_chunks.len()];
        if let Some(cache) = cache {
            for (idx, chunk) in all_chunks.iter().enumerate() {
                let key = EmbeddingCache::key(self.model(), chunk);
                vectors[idx] = cache.load(&key).await;
            }
        }

        let miss_indices: Vec<usize> =
            (0..all_chunks.len()).filter(|i| vectors[*i].is_none()).collect();

        for batch in miss_indices.chunks(self.batch_size().max(1)) {
            let batch_texts: Vec<String> =
                batch.iter().map(|i| all_chunks[*i].clone()).collect();
            let embedded = self.embed(&batch_texts).await?;

            for (slot, vector) in batch.iter().zip(embedded) {
                if let Some(cache) = cache {
                    let key = EmbeddingCache::key(self.model(), &all_chunks[*slot]);
                    cache.store(&key, &vector).await;
                }
                vectors[*slot] = Some(vector);
            }
        }

        let dim = vectors
            .iter()
            .flatten()
            .map(Vec::len)
            .next()
            .unwrap_or(0);

        let mut pooled = Vec::with_capacity(texts.len());
        for doc_idx in 0..texts.len() {
            let doc_vectors: Vec<Vec<f32>> = chunk_doc
                .iter()
                .zip(&vectors)
                .filter(|(d, _)| **d == doc_idx)
                .filter_map(|(_, v)| v.clone())
                .collect();

            if doc_vectors.is_empty() {
                pooled.push(vec![0.0; dim]);
            } else {
                pooled.push(normalized_mean_pool(&doc_vectors));
            }
        }

        Ok(pooled)
    }
}

// A shared embedder is still an embedder; discovery and assignment hold
// clones of the same instance so cache keys and model ids stay aligned.
#[async_trait]
impl<T: Embedder + ?Sized> Embedder for std::sync::Arc<T> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        (**self).embed(texts).await
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    fn batch_size(&self) -> usize {
        (**self).batch_size()
    }

    async fn embed_pooled(
        &self,
        texts: &[String],
        chunk_tokens: usize,
        overlap_tokens: usize,
        pooling: Pooling,
        cache: Option<&EmbeddingCache>,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        (**self)
            .embed_pooled(texts, chunk_tokens, overlap_tokens, pooling, cache)
            .await
    }
}

/// Two-pass knowledge extraction. Both passes are total: failures degrade
/// to an empty set (Pass 1) or to the input candidates (Pass 2).
#[async_trait]
pub trait AtomExtractor: Send + Sync {
    /// Pass 1: candidate atoms from one formatted conversation chunk.
    async fn extract_from_chunk(&self, chunk_text: &str) -> CandidateSet;

    /// Pass 2: refine and consolidate the (pre-deduped) candidates for a
    /// whole conversation.
    async fn refine_atoms(
        &self,
        candidates: CandidateSet,
        conversation_id: &str,
        conversation_title: Option<&str>,
    ) -> CandidateSet;
}

/// Structured one-shot meeting extraction (the fast path for `meeting__*`
/// conversations). Selected at composition time; the pipeline never
/// inspects which implementation is active.
#[async_trait]
pub trait MeetingExtractor: Send + Sync {
    async fn extract_meeting(
        &self,
        conversation_id: &str,
        meeting_title: &str,
        metadata: &MeetingMetadata,
        linearized_content: &str,
    ) -> Result<Vec<Atom>, LlmError>;
}

/// Name + description for a discovered topic cluster.
#[derive(Debug, Clone)]
pub struct TopicLabel {
    pub name: String,
    pub description: String,
}

#[async_trait]
pub trait TopicLabeler: Send + Sync {
    async fn label_topic(
        &self,
        topic_id: i64,
        representative_docs: &[(String, String)],
        keywords: &[String],
    ) -> Result<TopicLabel, LlmError>;
}

/// Result of clustering document embeddings: one label per document
/// (cluster id, `-1` for outliers) plus keywords per cluster.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub labels: Vec<i64>,
    pub keywords: HashMap<i64, Vec<String>>,
}

/// Clustering routine behind the topic discoverer. Implementations may
/// relocate low-affinity documents to the outlier cluster `-1`.
pub trait Clusterer: Send + Sync {
    fn cluster(
        &self,
        embeddings: &[Vec<f32>],
        documents: &[String],
        target_topics: usize,
    ) -> Result<ClusterOutcome, PipelineError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::l2_norm;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embedder double: returns a fixed unit vector per text and counts
    /// underlying API calls so cache behavior is observable.
    struct CountingEmbedder {
        calls: AtomicUsize,
        texts_embedded: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> CountingEmbedder {
            CountingEmbedder {
                calls: AtomicUsize::new(0),
                texts_embedded: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let x = (t.len() % 7) as f32 + 1.0;
                    let norm = (x * x + 1.0).sqrt();
                    vec![x / norm, 1.0 / norm, 0.0]
                })
                .collect())
        }

        fn model(&self) -> &str {
            "test-embed"
        }

        fn batch_size(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn pooled_rows_are_unit_or_zero() {
        let embedder = CountingEmbedder::new();
        let texts = vec![
            "one sentence of content.".to_string(),
            "   ".to_string(),
            "another document entirely.".to_string(),
        ];

        let rows = embedder
            .embed_pooled(&texts, 600, 80, Pooling::Mean, None)
            .await
            .unwrap();

        assert_eq!(rows.len(), 3);
        assert!((l2_norm(&rows[0]) - 1.0).abs() < 1e-5);
        // Whitespace text keeps its row as a zero vector of the same dim
        assert_eq!(rows[1], vec![0.0, 0.0, 0.0]);
        assert!((l2_norm(&rows[2]) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn cache_hits_skip_the_api() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path());
        let embedder = CountingEmbedder::new();
        let texts = vec!["stable text for caching.".to_string()];

        embedder
            .embed_pooled(&texts, 600, 80, Pooling::Mean, Some(&cache))
            .await
            .unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        embedder
            .embed_pooled(&texts, 600, 80, Pooling::Mean, Some(&cache))
            .await
            .unwrap();
        // Second run resolved entirely from cache
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn misses_are_batched_by_batch_size() {
        let embedder = CountingEmbedder::new();
        // 5 short texts, one chunk each, batch size 2 -> 3 API calls
        let texts: Vec<String> = (0..5).map(|i| format!("document number {i}.")).collect();

        embedder
            .embed_pooled(&texts, 600, 80, Pooling::Mean, None)
            .await
            .unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(embedder.texts_embedded.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn all_whitespace_input_keeps_row_count() {
        let embedder = CountingEmbedder::new();
        let texts = vec!["  ".to_string(), "\n".to_string()];
        let rows = embedder
            .embed_pooled(&texts, 600, 80, Pooling::Mean, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }
}
