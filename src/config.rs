use std::path::PathBuf;

/// Process-wide pipeline configuration. Read once per invocation; every
/// knob has a default and an `ATOMIZER_*` environment override.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bound on the conversation worker pool.
    pub max_conversations: usize,
    /// Bound on Pass-1 chunk extraction within one conversation.
    pub chunk_max_concurrency: usize,
    /// Bound on concurrent topic labeling calls.
    pub topic_max_concurrency: usize,
    /// Process-global cap on in-flight LLM requests.
    /// Defaults to `4 * max_conversations`.
    pub llm_max_inflight: usize,
    /// Model for Pass-1 chunk extraction.
    pub fast_model: String,
    /// Model for Pass-2 refinement.
    pub big_model: String,
    /// Embedding model; round-trips into the topic registry.
    pub embedding_model: String,
    /// Skip conversations whose atoms.jsonl already exists and is non-empty.
    pub skip_existing: bool,
    /// First-N cap on ingested conversations.
    pub limit: Option<usize>,
    /// Minimum primary score before the assignment is flagged for review.
    pub primary_threshold: f32,
    /// Minimum score for secondary topic assignment.
    pub secondary_threshold: f32,
    /// Optional cap on evidence merged into a deduped candidate.
    pub max_evidence_per_item: Option<usize>,
    /// Whether consolidation emits docs_concat.md / adrs_concat.md.
    pub include_docs: bool,
    /// Token budget per extraction chunk.
    pub max_chunk_tokens: usize,
    /// Token budget per embedding chunk.
    pub embed_chunk_tokens: usize,
    /// Token overlap between embedding chunks.
    pub embed_overlap_tokens: usize,
    /// Target number of topics handed to the clusterer.
    pub target_topics: usize,
    /// Content-addressed embedding cache directory.
    pub embedding_cache_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let max_conversations = 8;
        Self {
            max_conversations,
            chunk_max_concurrency: 4,
            topic_max_concurrency: 8,
            llm_max_inflight: max_conversations * 4,
            fast_model: "z-ai/glm-4.7".into(),
            big_model: "z-ai/glm-4.7".into(),
            embedding_model: "openai/text-embedding-3-small".into(),
            skip_existing: true,
            limit: None,
            primary_threshold: 0.60,
            secondary_threshold: 0.55,
            max_evidence_per_item: None,
            include_docs: true,
            max_chunk_tokens: 8_000,
            embed_chunk_tokens: 600,
            embed_overlap_tokens: 80,
            target_topics: 50,
            embedding_cache_dir: PathBuf::from(".cache/embeddings"),
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `ATOMIZER_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_usize("ATOMIZER_MAX_CONVERSATIONS") {
            config.max_conversations = n.max(1);
            config.llm_max_inflight = config.max_conversations * 4;
        }
        if let Some(n) = env_usize("ATOMIZER_CHUNK_MAX_CONCURRENCY") {
            config.chunk_max_concurrency = n.max(1);
        }
        if let Some(n) = env_usize("ATOMIZER_TOPIC_MAX_CONCURRENCY") {
            config.topic_max_concurrency = n.max(1);
        }
        if let Some(n) = env_usize("ATOMIZER_LLM_MAX_INFLIGHT") {
            config.llm_max_inflight = n.max(1);
        }
        if let Ok(model) = std::env::var("ATOMIZER_FAST_MODEL") {
            if !model.trim().is_empty() {
                config.fast_model = model;
            }
        }
        if let Ok(model) = std::env::var("ATOMIZER_BIG_MODEL") {
            if !model.trim().is_empty() {
                config.big_model = model;
            }
        }
        if let Ok(model) = std::env::var("ATOMIZER_EMBEDDING_MODEL") {
            if !model.trim().is_empty() {
                config.embedding_model = model;
            }
        }
        if let Some(n) = env_usize("ATOMIZER_MAX_EVIDENCE_PER_ITEM") {
            config.max_evidence_per_item = (n > 0).then_some(n);
        }

        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}
