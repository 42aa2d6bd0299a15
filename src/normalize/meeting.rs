use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::conversation::{Conversation, Node, NodeMessage, Role};

/// Heading keywords that mark a notes section as carrying commitments.
pub const ACTION_HEADING_KEYWORDS: [&str; 4] = ["next steps", "action", "todo", "tasks"];

/// Hint line prepended to action-item sections so the LLM extractor treats
/// checklist entries as commitments.
pub const ACTION_ITEMS_HINT: &str = "Action items (treat as commitments/tasks):";

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,3}:\d{2}(?::\d{2})?)\b").unwrap())
}

fn transcript_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,3}:\d{2}(?::\d{2})?)\s*:\s*([^:]+?)\s*:\s*(.+)$").unwrap()
    })
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.+)$").unwrap())
}

/// Normalize a transcript timestamp to `HH:MM:SS`. Minutes >= 60 carry into
/// hours ("62:15" -> "01:02:15"); anchor annotations like `{#00:00:00}` are
/// stripped; unparseable input falls back to "00:00:00".
pub fn normalize_timestamp(raw: &str) -> String {
    static ANCHOR_RE: OnceLock<Regex> = OnceLock::new();
    let anchor_re = ANCHOR_RE.get_or_init(|| Regex::new(r"\s*\{#[^}]+\}").unwrap());
    let raw = anchor_re.replace_all(raw.trim(), "").trim().to_string();

    let parts: Vec<&str> = raw.split(':').collect();
    let (mut hours, mut minutes, seconds) = match parts.as_slice() {
        [h, m, s] if h.len() <= 2 && m.len() == 2 && s.len() == 2 => {
            match (h.parse::<u32>(), m.parse::<u32>(), s.parse::<u32>()) {
                (Ok(h), Ok(m), Ok(s)) => (h, m, s),
                _ => return "00:00:00".into(),
            }
        }
        [m, s] if m.len() <= 3 && s.len() == 2 => match (m.parse::<u32>(), s.parse::<u32>()) {
            (Ok(m), Ok(s)) => (0, m, s),
            _ => return "00:00:00".into(),
        },
        _ => return "00:00:00".into(),
    };

    hours += minutes / 60;
    minutes %= 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Lowercase, collapse non-alphanumerics to `-`, trim hyphens.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_hyphen = true;
    for ch in text.to_lowercase().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            slug.push(ch);
            last_hyphen = false;
        } else if !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "section".into()
    } else {
        slug
    }
}

/// Stable document id: `<prefix>__<slug(stem)>__<first-8-hex-of-SHA-256>`.
pub fn generate_document_id(prefix: &str, stem: &str, content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    let hash8: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{prefix}__{}__{hash8}", slugify(stem))
}

/// Timestamp embedded in a heading, if any.
pub fn timestamp_in_heading(heading: &str) -> Option<&str> {
    timestamp_re()
        .captures(heading)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

pub fn is_action_heading(heading: &str) -> bool {
    let lower = heading.to_lowercase();
    ACTION_HEADING_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

struct Section {
    heading: Option<String>,
    body: Vec<String>,
}

fn split_sections(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current = Section { heading: None, body: Vec::new() };

    for line in content.lines() {
        if let Some(caps) = heading_re().captures(line) {
            if current.heading.is_some() || !current.body.is_empty() {
                sections.push(current);
            }
            current = Section {
                heading: Some(caps.get(2).unwrap().as_str().to_string()),
                body: Vec::new(),
            };
        } else {
            current.body.push(line.to_string());
        }
    }
    if current.heading.is_some() || !current.body.is_empty() {
        sections.push(current);
    }
    sections
}

fn title_from_content(stem: &str, content: &str) -> String {
    for line in content.lines().take(20) {
        if let Some(stripped) = line.strip_prefix('#') {
            let title = stripped.trim_start_matches('#').trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }
    stem.to_string()
}

/// Parse a Markdown meeting-notes file into a synthetic conversation.
///
/// Sections split by ATX headings become one node each: transcript
/// timestamp sections (heading matches a `M:SS`/`H:MM:SS` pattern) get the
/// normalized timestamp as node id and role `user`; everything else becomes
/// a `notes:<slug>` system node, with the action-items hint prepended when
/// the heading names next steps / actions / todos / tasks.
pub fn parse_markdown_meeting(stem: &str, content: &str) -> Conversation {
    let doc_id = generate_document_id("meeting", stem, content.as_bytes());
    let title = title_from_content(stem, content);

    let mut mapping = HashMap::new();
    let mut previous: Option<String> = None;

    for section in split_sections(content) {
        let heading = section.heading.clone().unwrap_or_default();
        let mut body = section.body.join("\n").trim().to_string();

        let (message_id, role) = match timestamp_in_heading(&heading) {
            Some(ts) => (normalize_timestamp(ts), Role::User),
            None => {
                if is_action_heading(&heading) {
                    body = format!("{ACTION_ITEMS_HINT}\n\n{body}");
                }
                let slug = if heading.is_empty() { "preface".into() } else { slugify(&heading) };
                (format!("notes:{slug}"), Role::System)
            }
        };

        let full_text = match (heading.is_empty(), body.is_empty()) {
            (false, false) => format!("{heading}\n\n{body}"),
            (false, true) => heading.clone(),
            (true, _) => body.clone(),
        };
        if full_text.trim().is_empty() {
            continue;
        }

        mapping.insert(
            message_id.clone(),
            Node {
                id: message_id.clone(),
                parent: previous.clone(),
                message: Some(NodeMessage {
                    id: message_id.clone(),
                    role: Some(role),
                    parts: vec![full_text],
                    create_time: None,
                }),
            },
        );
        previous = Some(message_id);
    }

    Conversation {
        conversation_id: Some(doc_id),
        title,
        project_id: None,
        project_name: None,
        current_node: previous,
        mapping,
    }
}

/// Parse a plain-text transcript (`TIME : NAME : TEXT` lines) into a
/// synthetic conversation. Lines that don't match the pattern append to the
/// most recent node's body; empty input yields a single `notes:transcript`
/// fallback node carrying the original content.
pub fn parse_text_transcript(stem: &str, content: &str) -> Conversation {
    let doc_id = generate_document_id("meeting", stem, content.as_bytes());
    let mut mapping: HashMap<String, Node> = HashMap::new();
    let mut previous: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = transcript_line_re().captures(line) {
            let message_id = normalize_timestamp(caps.get(1).unwrap().as_str());
            let name = caps.get(2).unwrap().as_str().trim();
            let text = caps.get(3).unwrap().as_str().trim();

            mapping.insert(
                message_id.clone(),
                Node {
                    id: message_id.clone(),
                    parent: previous.clone(),
                    message: Some(NodeMessage {
                        id: message_id.clone(),
                        role: Some(Role::User),
                        parts: vec![format!("**{name}:** {text}")],
                        create_time: None,
                    }),
                },
            );
            previous = Some(message_id);
        } else if let Some(prev_id) = &previous {
            if let Some(node) = mapping.get_mut(prev_id) {
                if let Some(message) = &mut node.message {
                    match message.parts.last_mut() {
                        Some(last) => {
                            last.push('\n');
                            last.push_str(line);
                        }
                        None => message.parts.push(line.to_string()),
                    }
                }
            }
        }
    }

    if mapping.is_empty() {
        let node_id = "notes:transcript".to_string();
        mapping.insert(
            node_id.clone(),
            Node {
                id: node_id.clone(),
                parent: None,
                message: Some(NodeMessage {
                    id: node_id.clone(),
                    role: Some(Role::System),
                    parts: vec![content.to_string()],
                    create_time: None,
                }),
            },
        );
        previous = Some(node_id);
    }

    Conversation {
        conversation_id: Some(doc_id),
        title: stem.to_string(),
        project_id: None,
        project_name: None,
        current_node: previous,
        mapping,
    }
}
