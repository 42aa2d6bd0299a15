use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::atom::{Atom, AtomKind, Evidence};
use crate::conversation::{Message, Role};

fn checklist_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-\s+\[([ x])\]\s+(.+)$").unwrap())
}

/// Deterministic action-item extraction: scan every system-role message
/// for `- [ ]` / `- [x]` checklist lines and emit one `action_item` atom
/// per line, with evidence pointing at the carrying message.
///
/// This runs independently of (and in addition to) the LLM extractors; the
/// LLM may emit the same items and consolidation collapses them by
/// composite key.
pub fn extract_action_items(messages: &[Message], conversation_id: &str) -> Vec<Atom> {
    let mut atoms = Vec::new();

    for message in messages {
        if message.role != Role::System {
            continue;
        }

        for line in message.text.lines() {
            let Some(caps) = checklist_re().captures(line.trim()) else {
                continue;
            };
            let statement = caps.get(2).unwrap().as_str().trim();
            if statement.is_empty() {
                continue;
            }

            let mut atom = Atom::new(AtomKind::ActionItem, statement);
            atom.status = "open".into();
            atom.evidence = vec![Evidence {
                conversation_id: Some(conversation_id.to_string()),
                message_id: Some(message.id.clone()),
                time_iso: message.time_iso.clone(),
                text_snippet: Some(statement.chars().take(200).collect()),
            }];
            atom.meta.insert("task".into(), Value::Object(Map::new()));
            atoms.push(atom);
        }
    }

    atoms
}
