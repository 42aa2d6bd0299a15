pub mod action_items;
pub mod candidates;
pub mod convert;
pub mod json_repair;
pub mod meeting_meta;
pub mod prompts;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::atom::Atom;
use crate::chunking::{chunk_messages, TokenEstimator};
use crate::config::PipelineConfig;
use crate::conversation::{Conversation, Message};
use crate::error::PipelineError;
use crate::jsonl::write_jsonl;
use crate::linearize::{linearize_conversation, render_conversation_markdown};
use crate::normalize::{load_conversations, NonJsonKind};
use crate::ports::{AtomExtractor, MeetingExtractor};

use candidates::CandidateSet;

/// Counters for one extraction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Atom extraction over a whole export: the outer conversation pool, the
/// inner Pass-1 chunk pool, the meeting fast path, and the deterministic
/// action-item scrape. Wire up an extractor (and optionally a meeting
/// extractor) and run.
#[derive(Clone)]
pub struct Extraction {
    extractor: Arc<dyn AtomExtractor>,
    meeting_extractor: Option<Arc<dyn MeetingExtractor>>,
    config: Arc<PipelineConfig>,
}

impl Extraction {
    pub fn new(extractor: impl AtomExtractor + 'static, config: PipelineConfig) -> Extraction {
        Extraction {
            extractor: Arc::new(extractor),
            meeting_extractor: None,
            config: Arc::new(config),
        }
    }

    pub fn with_meeting_extractor(
        mut self,
        meeting_extractor: impl MeetingExtractor + 'static,
    ) -> Extraction {
        self.meeting_extractor = Some(Arc::new(meeting_extractor));
        self
    }

    /// Extract atoms for every conversation in the export, with bounded
    /// conversation-level concurrency. Individual conversation failures are
    /// logged and never cancel siblings; only input-shape errors are fatal.
    pub async fn run(
        &self,
        input: &Path,
        atoms_dir: &Path,
        non_json_kind: NonJsonKind,
        conversation_filter: Option<&str>,
        cancel: Option<CancellationToken>,
    ) -> Result<ExtractStats, PipelineError> {
        info!(input = %input.display(), limit = ?self.config.limit, "loading export");
        let mut conversations = load_conversations(input, self.config.limit, non_json_kind)?;

        if let Some(filter) = conversation_filter {
            conversations.retain(|c| c.conversation_id.as_deref() == Some(filter));
            if conversations.is_empty() {
                return Err(PipelineError::InputNotFound(format!(
                    "conversation not found in export: {filter}"
                )));
            }
        }

        let mut stats = ExtractStats::default();

        // skip_existing short-circuits before any LLM call
        if self.config.skip_existing {
            let mut remaining = Vec::with_capacity(conversations.len());
            for conversation in conversations {
                let done = match conversation.conversation_id.as_deref() {
                    Some(id) => outputs_exist(id, atoms_dir).await,
                    None => false,
                };
                if done {
                    stats.skipped += 1;
                } else {
                    remaining.push(conversation);
                }
            }
            if stats.skipped > 0 {
                debug!(skipped = stats.skipped, "skipped conversations with existing outputs");
            }
            conversations = remaining;
        }

        if conversations.is_empty() {
            warn!("no conversations to process");
            return Ok(stats);
        }

        info!(
            num_conversations = conversations.len(),
            max_concurrency = self.config.max_conversations,
            "processing conversations"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_conversations.max(1)));
        let mut workers = JoinSet::new();

        for conversation in conversations {
            if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                return Err(PipelineError::Cancelled);
            }

            let conv_id = conversation
                .conversation_id
                .clone()
                .unwrap_or_else(|| "unknown".into());
            let this = self.clone();
            let atoms_dir = atoms_dir.to_path_buf();
            let semaphore = Arc::clone(&semaphore);
            let span = info_span!("extract_conversation", conversation_id = %conv_id);

            workers.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    let result = this.extract_conversation(&conversation, &atoms_dir).await;
                    (conv_id, result)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((_, Ok(true))) => stats.processed += 1,
                Ok((_, Ok(false))) => stats.skipped += 1,
                Ok((conv_id, Err(e))) => {
                    stats.failed += 1;
                    warn!(conversation_id = %conv_id, error = %e, "error processing conversation");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(error = %e, "conversation worker panicked");
                }
            }
        }

        info!(?stats, "extraction complete");
        Ok(stats)
    }

    /// One conversation: Idle -> Linearized -> Chunked -> Pass1 -> Pass2 ->
    /// Written. Pass failures degrade to best-effort content; only output
    /// write failures propagate. Returns false when the conversation was
    /// skipped before any work.
    async fn extract_conversation(
        &self,
        conversation: &Conversation,
        atoms_dir: &Path,
    ) -> Result<bool, PipelineError> {
        let Some(conv_id) = conversation.conversation_id.as_deref() else {
            warn!(reason = "no_id", "skipping conversation without ID");
            return Ok(false);
        };

        if self.config.skip_existing && outputs_exist(conv_id, atoms_dir).await {
            debug!(reason = "exists", "skipping conversation");
            return Ok(false);
        }

        let messages = linearize_conversation(conversation);
        if messages.is_empty() {
            warn!(reason = "no_messages", "no messages found");
            return Ok(false);
        }

        let atoms_path = atoms_dir.join(conv_id).join("atoms.jsonl");
        let deterministic_items = action_items::extract_action_items(&messages, conv_id);

        // Meeting fast path: one structured call over the whole linearized
        // content. Falls through to the two-pass pipeline on any failure.
        if conversation.is_meeting() {
            if let Some(meeting_atoms) = self.try_meeting_fast_path(conversation, &messages).await {
                let mut atoms = meeting_atoms;
                for atom in &mut atoms {
                    atom.ensure_evidence(conv_id);
                }
                atoms.extend(deterministic_items);
                write_jsonl(&atoms_path, &atoms).await?;
                info!(
                    total_atoms = atoms.len(),
                    atoms_file = %atoms_path.display(),
                    "meeting extraction complete"
                );
                return Ok(true);
            }
        }

        // Pass 1: per-chunk candidate extraction
        let estimator = TokenEstimator::for_model(&self.config.fast_model);
        let chunks = chunk_messages(&messages, self.config.max_chunk_tokens, &estimator);
        info!(
            num_chunks = chunks.len(),
            num_messages = messages.len(),
            "processing conversation"
        );

        let candidates = self.run_pass1(conv_id, chunks).await;

        // Pass 2: local pre-dedupe, then whole-conversation refinement
        let deduped = candidates.dedupe(self.config.max_evidence_per_item);
        info!(
            candidate_facts = deduped.facts.len(),
            candidate_decisions = deduped.decisions.len(),
            candidate_questions = deduped.open_questions.len(),
            "refining candidates"
        );
        let refined = self
            .extractor
            .refine_atoms(deduped, conv_id, Some(&conversation.title))
            .await;
        info!(
            final_facts = refined.facts.len(),
            final_decisions = refined.decisions.len(),
            final_questions = refined.open_questions.len(),
            "refinement complete"
        );

        let mut atoms: Vec<Atom> = Vec::new();
        atoms.extend(convert::convert_facts(&refined.facts, conv_id));
        atoms.extend(convert::convert_decisions(&refined.decisions, conv_id));
        atoms.extend(convert::convert_open_questions(&refined.open_questions, conv_id));
        atoms.extend(deterministic_items);

        if !atoms.is_empty() {
            write_jsonl(&atoms_path, &atoms).await?;
        }

        info!(
            total_atoms = atoms.len(),
            atoms_file = %atoms_path.display(),
            "extraction complete"
        );
        Ok(true)
    }

    async fn try_meeting_fast_path(
        &self,
        conversation: &Conversation,
        messages: &[Message],
    ) -> Option<Vec<Atom>> {
        let meeting_extractor = self.meeting_extractor.as_ref()?;
        let conv_id = conversation.conversation_id.as_deref()?;

        let linearized = render_conversation_markdown(
            messages,
            conv_id,
            &conversation.title,
            conversation.project_id.as_deref(),
            conversation.project_name.as_deref(),
        );
        let mut metadata = meeting_meta::parse_meeting_metadata(&linearized);
        if metadata.meeting_title.is_none() {
            metadata.meeting_title = Some(conversation.title.clone());
        }
        let title = metadata
            .meeting_title
            .clone()
            .unwrap_or_else(|| conversation.title.clone());

        match meeting_extractor
            .extract_meeting(conv_id, &title, &metadata, &linearized)
            .instrument(info_span!("extract_meeting_atoms"))
            .await
        {
            Ok(atoms) if !atoms.is_empty() => Some(atoms),
            Ok(_) => {
                debug!("meeting extractor returned no atoms, using two-pass pipeline");
                None
            }
            Err(e) => {
                warn!(error = %e, "meeting extraction failed, falling back to standard extraction");
                None
            }
        }
    }

    /// Fan Pass-1 chunks out over the chunk pool. Results are re-sorted by
    /// chunk index before aggregation so Pass-2 input is deterministic
    /// regardless of completion order.
    async fn run_pass1(&self, conv_id: &str, chunks: Vec<Vec<Message>>) -> CandidateSet {
        let total_chunks = chunks.len();

        if total_chunks <= 1 || self.config.chunk_max_concurrency <= 1 {
            let mut all = CandidateSet::default();
            for (idx, chunk) in chunks.iter().enumerate() {
                let text = format_chunk(chunk);
                let result = self
                    .extractor
                    .extract_from_chunk(&text)
                    .instrument(info_span!("extract_pass1", chunk_index = idx + 1, total_chunks))
                    .await;
                log_chunk(idx, total_chunks, &result);
                all.extend(result);
            }
            return all;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.chunk_max_concurrency));
        let mut workers: JoinSet<(usize, CandidateSet)> = JoinSet::new();

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let extractor = Arc::clone(&self.extractor);
            let semaphore = Arc::clone(&semaphore);
            let span = info_span!(
                "extract_pass1",
                conversation_id = %conv_id,
                chunk_index = idx + 1,
                total_chunks
            );

            workers.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    let text = format_chunk(&chunk);
                    (idx, extractor.extract_from_chunk(&text).await)
                }
                .instrument(span),
            );
        }

        let mut results: Vec<(usize, CandidateSet)> = Vec::with_capacity(total_chunks);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    log_chunk(idx, total_chunks, &result);
                    results.push((idx, result));
                }
                Err(e) => warn!(error = %e, "chunk worker panicked"),
            }
        }

        results.sort_by_key(|(idx, _)| *idx);
        let mut all = CandidateSet::default();
        for (_, result) in results {
            all.extend(result);
        }
        all
    }
}

fn log_chunk(idx: usize, total_chunks: usize, result: &CandidateSet) {
    debug!(
        chunk_num = idx + 1,
        total_chunks,
        facts = result.facts.len(),
        decisions = result.decisions.len(),
        questions = result.open_questions.len(),
        "pass 1 chunk extracted"
    );
}

/// Format a message chunk for the Pass-1 prompt.
pub fn format_chunk(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len() * 3);
    for msg in messages {
        lines.push(format!(
            "[{}] {} (ID: {})",
            msg.role.as_str().to_uppercase(),
            msg.time_iso.as_deref().unwrap_or(""),
            msg.id
        ));
        lines.push(msg.text.clone());
        lines.push(String::new());
    }
    lines.join("\n")
}

/// A conversation counts as done when its atoms file exists and is non-empty.
pub async fn outputs_exist(conversation_id: &str, atoms_dir: &Path) -> bool {
    let path: PathBuf = atoms_dir.join(conversation_id).join("atoms.jsonl");
    match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}
