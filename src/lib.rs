pub mod adapters;
pub mod atom;
pub mod chunking;
pub mod compile;
pub mod config;
pub mod consolidate;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod jsonl;
pub mod linearize;
pub mod normalize;
pub mod ports;
pub mod topics;

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use atom::{normalize_statement, Atom, AtomKind, Evidence};
pub use config::PipelineConfig;
pub use conversation::{Conversation, Message, Role};
pub use embedding::{EmbeddingCache, POOLING_VERSION};
pub use error::{LlmError, PipelineError};
pub use extract::{ExtractStats, Extraction};
pub use normalize::{load_conversations, NonJsonKind};
pub use ports::{
    AtomExtractor, ChatRequest, Clusterer, Embedder, LlmClient, MeetingExtractor, Pooling,
    TopicLabel, TopicLabeler,
};
pub use topics::assign::{save_assignments, TopicAssigner};
pub use topics::discover::TopicDiscovery;
pub use topics::documents::build_conversation_documents;
pub use topics::{ConversationTopics, Topic, TopicRegistry};

use consolidate::ConsolidateStats;

/// Summary of one full pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub extract: ExtractStats,
    pub consolidate: ConsolidateStats,
    pub num_topics: usize,
    pub num_assignments: usize,
    pub num_flagged: usize,
}

/// The whole pipeline. Wire up the ports, point it at an export, and it
/// runs linearize -> extract -> compile -> consolidate -> discover-topics
/// -> assign-topics into one output directory.
#[derive(Clone)]
pub struct Pipeline {
    extraction: Extraction,
    discovery: TopicDiscovery,
    assigner: TopicAssigner,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        extractor: impl AtomExtractor + 'static,
        embedder: Arc<dyn Embedder>,
        clusterer: impl Clusterer + 'static,
        labeler: impl TopicLabeler + 'static,
        config: PipelineConfig,
    ) -> Pipeline {
        Pipeline {
            extraction: Extraction::new(extractor, config.clone()),
            discovery: TopicDiscovery::new(
                Arc::clone(&embedder),
                clusterer,
                labeler,
                config.clone(),
            ),
            assigner: TopicAssigner::new(embedder, config.clone()),
            config,
        }
    }

    pub fn with_meeting_extractor(
        mut self,
        meeting_extractor: impl MeetingExtractor + 'static,
    ) -> Pipeline {
        self.extraction = self.extraction.with_meeting_extractor(meeting_extractor);
        self
    }

    /// Run every stage against one output directory:
    /// `evidence/`, `atoms/`, `docs/`, `project/`, `topic_registry.json`,
    /// `assignments.jsonl` (+ `review_queue.jsonl`).
    pub async fn run_all(
        &self,
        input: &Path,
        out_dir: &Path,
        non_json_kind: NonJsonKind,
        cancel: Option<CancellationToken>,
    ) -> Result<RunSummary, PipelineError> {
        let evidence_dir = out_dir.join("evidence");
        let atoms_dir = out_dir.join("atoms");
        let docs_dir = out_dir.join("docs");
        let mut summary = RunSummary::default();

        linearize::linearize_export(input, &evidence_dir, self.config.limit, non_json_kind)
            .await?;

        summary.extract = self
            .extraction
            .run(input, &atoms_dir, non_json_kind, None, cancel)
            .await?;

        compile::compile_docs(&atoms_dir, &docs_dir).await?;

        summary.consolidate = consolidate::consolidate_project(
            &atoms_dir,
            &docs_dir,
            out_dir,
            self.config.include_docs,
        )
        .await?;

        let conversations = load_conversations(input, self.config.limit, non_json_kind)?;
        let atoms = jsonl::read_atoms(&out_dir.join("project").join("atoms.jsonl")).await?;
        let documents = build_conversation_documents(&conversations, &atoms);

        if documents.documents.is_empty() {
            warn!("no documents to cluster, skipping topic stages");
            return Ok(summary);
        }

        let cache = EmbeddingCache::new(&self.config.embedding_cache_dir);
        let registry = self.discovery.discover(&documents, Some(&cache), false).await?;
        summary.num_topics = registry.num_topics;
        topics::save_topic_registry(&registry, &out_dir.join("topic_registry.json")).await?;

        let assignments = self.assigner.assign(&documents, &registry, Some(&cache)).await?;
        summary.num_assignments = assignments.len();
        summary.num_flagged = assignments.iter().filter(|a| a.review_flag).count();
        save_assignments(
            &assignments,
            &out_dir.join("assignments.jsonl"),
            self.config.primary_threshold,
        )
        .await?;

        info!(
            atoms_out = summary.consolidate.atoms_out,
            num_topics = summary.num_topics,
            num_assignments = summary.num_assignments,
            num_flagged = summary.num_flagged,
            "pipeline run complete"
        );
        Ok(summary)
    }
}
