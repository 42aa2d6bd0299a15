//! Prompt templates for the extraction and labeling calls.

pub const PASS1_SYSTEM: &str = "You are a knowledge extraction assistant. Return only valid JSON, no markdown, no code blocks.";

pub const PASS2_SYSTEM: &str = "You are a knowledge refinement assistant. Return only valid JSON matching the schema, no markdown, no code blocks.";

pub const JSON_REPAIR_SYSTEM: &str =
    "You are a JSON repair assistant. Extract and return ONLY valid JSON, no other text.";

pub const TOPIC_LABEL_SYSTEM: &str =
    "You are a topic labeling assistant. Return only valid JSON.";

pub const MEETING_SYSTEM: &str = "You are a meeting analysis assistant. Return only valid JSON, no markdown, no code blocks.";

pub fn pass1_prompt(chunk_text: &str) -> String {
    format!(
        r#"You are extracting structured knowledge from a conversation about a project.

Analyze the following conversation chunk and extract:
1. **Facts**: Concrete statements about the project (what it is, how it works, etc.)
2. **Decisions**: Explicit or implicit decisions made (with alternatives and rationale if available)
3. **Open Questions**: Unresolved questions or uncertainties mentioned

For each item, provide:
- type: one of decision|requirement|definition|metric|risk|assumption|constraint|idea|fact
- topic: category (e.g., "pricing", "architecture", "ICP", "content", "evals", "marketing")
- statement: the actual knowledge statement
- status: active|deprecated|uncertain
- evidence: array with message_id and time_iso pointing to source messages

For decisions, also include:
- alternatives: what other options were considered
- rationale: why this decision was made
- consequences: expected outcomes

Return ONLY valid JSON matching this schema (no markdown, no code blocks, just JSON):
{{
  "facts": [
    {{"type": "fact", "topic": "...", "statement": "...", "status": "active",
      "evidence": [{{"message_id": "...", "time_iso": "..."}}]}}
  ],
  "decisions": [
    {{"type": "decision", "topic": "...", "statement": "...", "status": "active",
      "alternatives": ["..."], "rationale": "...", "consequences": "...",
      "evidence": [{{"message_id": "...", "time_iso": "..."}}]}}
  ],
  "open_questions": [
    {{"question": "...", "topic": "...", "context": "...",
      "evidence": [{{"message_id": "...", "time_iso": "..."}}]}}
  ]
}}

Conversation chunk:
{chunk_text}
"#
    )
}

pub fn pass2_prompt(
    conversation_id: &str,
    conversation_title: &str,
    candidates_json: &str,
) -> String {
    format!(
        r#"You are refining and consolidating knowledge atoms extracted from a conversation.

You have received candidate extractions from multiple chunks of the same conversation. Your task is to:

1. **Deduplicate semantically**: Merge items that express the same knowledge (even if worded differently)
2. **Normalize**: Ensure consistent type/topic/status values
3. **Validate**: Ensure all evidence arrays are properly formatted with message_id and time_iso
4. **Filter**: Remove obviously redundant, low-value, or duplicate items
5. **Refine**: Make wording concise and actionable while preserving meaning

Conversation metadata:
- ID: {conversation_id}
- Title: {conversation_title}

Candidates to refine:
{candidates_json}

Return ONLY valid JSON with the same shape as the candidates: an object with
"facts", "decisions", and "open_questions" arrays.
"#
    )
}

pub fn json_repair_prompt(broken: &str) -> String {
    format!("Repair this JSON output to be valid:\n\n{broken}")
}

pub fn topic_label_prompt(doc_samples: &str, keywords: &[String]) -> String {
    let keyword_line = if keywords.is_empty() {
        String::new()
    } else {
        format!("\nTop keywords from the cluster: {}\n", keywords.join(", "))
    };

    format!(
        r#"You are analyzing a topic cluster discovered from conversation data.

Here are representative conversations from this topic cluster:

{doc_samples}
{keyword_line}
Based on these conversations, generate:
1. A short topic name (3-5 words) that captures the main theme
2. A 1-2 sentence description of what this topic is about

Return ONLY valid JSON with this structure:
{{
  "name": "Topic Name Here",
  "description": "Description here."
}}"#
    )
}

pub fn meeting_prompt(
    conversation_id: &str,
    meeting_title: &str,
    metadata_json: &str,
    linearized_content: &str,
) -> String {
    format!(
        r#"Extract universal knowledge atoms from these meeting notes.

Extract:
- meeting_topic atoms for the key discussion topics (put a short summary at meta.meeting.topic.summary)
- decision atoms for decisions made in the meeting
- action_item atoms for commitments and checklist tasks (owner at meta.task.owner, due date at meta.task.due)
- risk / blocker / dependency atoms where the discussion surfaces them
- open_question atoms for unresolved questions

Meeting metadata:
- Conversation ID: {conversation_id}
- Title: {meeting_title}
- Parsed metadata: {metadata_json}

Every atom must have: schema_version=2, kind, statement, topic (optional),
status, status_confidence (explicit|inferred|null), evidence (array of
{{"message_id": "...", "time_iso": "..."}}), extracted_at, meta (object).

Return ONLY valid JSON: {{"atoms": [ ... ]}}

Meeting content:
{linearized_content}
"#
    )
}
