pub mod document;
pub mod meeting;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::conversation::{parse_iso_timestamp, Conversation, Node, NodeMessage, Role};
use crate::error::PipelineError;

pub use document::parse_markdown_document;
pub use meeting::{parse_markdown_meeting, parse_text_transcript};

/// How non-JSON files are interpreted: as meeting artifacts (notes and
/// transcripts) or as generic documents sliced by heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonJsonKind {
    #[default]
    Meeting,
    Document,
}

const SUPPORTED_SHAPES: &str = "Expected one of:\n\
  - a list of conversations (standard ChatGPT export),\n\
  - a single ChatGPT conversation object with 'mapping' and 'current_node' fields,\n\
  - a Claude conversation export with platform 'CLAUDE_AI' and a 'chat_messages' array,\n\
  - a Markdown (.md) or text (.txt) meeting artifact,\n\
  - a directory containing any of the above";

pub fn is_chatgpt_single_conversation(value: &Value) -> bool {
    value.is_object() && value.get("mapping").is_some() && value.get("current_node").is_some()
}

pub fn is_claude_conversation(value: &Value) -> bool {
    value.get("platform").and_then(Value::as_str) == Some("CLAUDE_AI")
        && value.get("chat_messages").is_some_and(Value::is_array)
}

/// Convert a Claude export into the canonical shape: one node per message
/// with a non-empty uuid, each chained to its predecessor, `current_node`
/// pointing at the last.
pub fn convert_claude_conversation(value: &Value) -> Conversation {
    let conversation_id = value
        .get("uuid")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string();

    let title = value
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or("Untitled Conversation")
        .to_string();

    let mut project_id = value
        .get("project_uuid")
        .and_then(Value::as_str)
        .map(String::from);
    let mut project_name = None;
    if let Some(project) = value.get("project").and_then(Value::as_object) {
        if project_id.is_none() {
            project_id = project.get("uuid").and_then(Value::as_str).map(String::from);
        }
        project_name = project.get("name").and_then(Value::as_str).map(String::from);
    }

    let mut mapping = HashMap::new();
    let mut previous: Option<String> = None;

    let messages = value
        .get("chat_messages")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for msg in &messages {
        let Some(uuid) = msg.get("uuid").and_then(Value::as_str).filter(|s| !s.is_empty())
        else {
            continue;
        };

        let role = match msg
            .get("sender")
            .and_then(Value::as_str)
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("human") => Role::User,
            Some("assistant") => Role::Assistant,
            _ => Role::System,
        };

        let create_time = msg
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_iso_timestamp);

        let text = claude_message_text(msg);

        mapping.insert(
            uuid.to_string(),
            Node {
                id: uuid.to_string(),
                parent: previous.clone(),
                message: Some(NodeMessage {
                    id: uuid.to_string(),
                    role: Some(role),
                    parts: vec![text],
                    create_time,
                }),
            },
        );
        previous = Some(uuid.to_string());
    }

    Conversation {
        conversation_id: Some(conversation_id),
        title,
        project_id,
        project_name,
        current_node: previous,
        mapping,
    }
}

// Older Claude exports carry `text`; newer ones carry `content: [{text}]`.
fn claude_message_text(msg: &Value) -> String {
    if let Some(text) = msg.get("text").and_then(Value::as_str) {
        if !text.is_empty() {
            return text.to_string();
        }
    }
    msg.get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".into())
}

fn load_json_file(path: &Path) -> Result<Vec<Conversation>, PipelineError> {
    let text = std::fs::read_to_string(path)?;
    let data: Value = serde_json::from_str(&text)
        .map_err(|e| PipelineError::UnsupportedInput(format!("{}: {e}", path.display())))?;

    if let Some(items) = data.as_array() {
        let mut conversations = Vec::new();
        for (i, item) in items.iter().enumerate() {
            if !item.is_object() {
                continue;
            }
            if is_claude_conversation(item) {
                conversations.push(convert_claude_conversation(item));
                continue;
            }
            let mut conv = Conversation::from_chatgpt_value(item);
            if is_chatgpt_single_conversation(item) && conv.conversation_id.is_none() {
                conv.conversation_id = Some(format!("{}_{i}", file_stem(path)));
            }
            conversations.push(conv);
        }
        return Ok(conversations);
    }

    if is_claude_conversation(&data) {
        return Ok(vec![convert_claude_conversation(&data)]);
    }

    if is_chatgpt_single_conversation(&data) {
        let mut conv = Conversation::from_chatgpt_value(&data);
        if conv.conversation_id.is_none() {
            conv.conversation_id = Some(file_stem(path));
        }
        return Ok(vec![conv]);
    }

    let keys = data
        .as_object()
        .map(|o| o.keys().take(10).cloned().collect::<Vec<_>>().join(", "))
        .unwrap_or_else(|| data.to_string());
    Err(PipelineError::UnsupportedInput(format!(
        "{}. Got keys: [{keys}].\n{SUPPORTED_SHAPES}",
        path.display()
    )))
}

fn load_file(path: &Path, non_json_kind: NonJsonKind) -> Result<Vec<Conversation>, PipelineError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "md" => {
            let content = std::fs::read_to_string(path)?;
            let conv = match non_json_kind {
                NonJsonKind::Meeting => parse_markdown_meeting(&file_stem(path), &content),
                NonJsonKind::Document => parse_markdown_document(&file_stem(path), &content),
            };
            Ok(vec![conv])
        }
        "txt" => match non_json_kind {
            NonJsonKind::Meeting => {
                let content = std::fs::read_to_string(path)?;
                Ok(vec![parse_text_transcript(&file_stem(path), &content)])
            }
            // Document mode ingests markdown only.
            NonJsonKind::Document => Err(PipelineError::UnsupportedInput(format!(
                "{}: .txt inputs are only ingested in meeting mode",
                path.display()
            ))),
        },
        "json" => load_json_file(path),
        _ => Err(PipelineError::UnsupportedInput(format!(
            "{}: unsupported extension .{ext}",
            path.display()
        ))),
    }
}

/// Enumerate supported files in a directory: direct children per extension
/// first, recursive fallback per extension, the union sorted
/// lexicographically for determinism.
fn list_input_files(dir: &Path) -> Vec<PathBuf> {
    let mut all: BTreeSet<PathBuf> = BTreeSet::new();

    for ext in ["json", "md", "txt"] {
        let direct: Vec<PathBuf> = std::fs::read_dir(dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && has_extension(p, ext))
            .collect();

        if direct.is_empty() {
            collect_recursive(dir, ext, &mut all);
        } else {
            all.extend(direct);
        }
    }

    all.into_iter().collect()
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}

fn collect_recursive(dir: &Path, ext: &str, out: &mut BTreeSet<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, ext, out);
        } else if path.is_file() && has_extension(&path, ext) {
            out.insert(path);
        }
    }
}

/// Load and normalize conversations from a file or directory.
///
/// Directory inputs iterate files in lexicographic order and skip files
/// that don't parse as a supported shape. `limit` caps the result to the
/// first N conversations in that deterministic order (first-N files for
/// directories). Unrecognized single-file inputs are a fatal error.
pub fn load_conversations(
    input: &Path,
    limit: Option<usize>,
    non_json_kind: NonJsonKind,
) -> Result<Vec<Conversation>, PipelineError> {
    if !input.exists() {
        return Err(PipelineError::InputNotFound(input.display().to_string()));
    }

    if input.is_dir() {
        let files = list_input_files(input);
        if files.is_empty() {
            return Err(PipelineError::UnsupportedInput(format!(
                "no supported files (.json, .md, .txt) found in directory: {}",
                input.display()
            )));
        }

        let mut conversations = Vec::new();
        for path in files {
            if limit.is_some_and(|n| conversations.len() >= n) {
                break;
            }
            match load_file(&path, non_json_kind) {
                Ok(batch) => conversations.extend(batch),
                Err(PipelineError::UnsupportedInput(reason)) => {
                    debug!(file = %path.display(), %reason, "skipping non-conforming file");
                }
                Err(e) => return Err(e),
            }
            if let Some(n) = limit {
                if conversations.len() > n {
                    conversations.truncate(n);
                    break;
                }
            }
        }
        return Ok(conversations);
    }

    let mut conversations = load_file(input, non_json_kind)?;
    if let Some(n) = limit {
        conversations.truncate(n);
    }
    Ok(conversations)
}
