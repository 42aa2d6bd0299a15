use std::collections::HashMap;

use crate::conversation::{Conversation, Node, NodeMessage, Role};

use super::meeting::{generate_document_id, slugify};

/// Parse a generic Markdown document into a synthetic system-only
/// conversation: one node per heading section, ids `sec:NNNN:<slug>`, the
/// content before the first heading landing in `sec:0001:preface`.
pub fn parse_markdown_document(stem: &str, content: &str) -> Conversation {
    let doc_id = generate_document_id("doc", stem, content.as_bytes());

    let mut title = stem.to_string();
    for line in content.lines().take(20) {
        if let Some(stripped) = line.strip_prefix('#') {
            let heading = stripped.trim_start_matches('#').trim();
            if !heading.is_empty() {
                title = heading.to_string();
            }
            break;
        }
    }

    let mut mapping = HashMap::new();
    let mut previous: Option<String> = None;
    let mut index = 0usize;

    for (heading, body) in split_heading_sections(content) {
        let full_text = match (heading.is_empty(), body.is_empty()) {
            (false, false) => format!("{heading}\n\n{body}"),
            (false, true) => heading.clone(),
            (true, false) => body.clone(),
            (true, true) => continue,
        };

        index += 1;
        let slug = if heading.is_empty() { "preface".into() } else { slugify(&heading) };
        let message_id = format!("sec:{index:04}:{slug}");

        mapping.insert(
            message_id.clone(),
            Node {
                id: message_id.clone(),
                parent: previous.clone(),
                message: Some(NodeMessage {
                    id: message_id.clone(),
                    role: Some(Role::System),
                    parts: vec![full_text],
                    create_time: None,
                }),
            },
        );
        previous = Some(message_id);
    }

    if mapping.is_empty() && !content.trim().is_empty() {
        let message_id = "sec:0001:document".to_string();
        mapping.insert(
            message_id.clone(),
            Node {
                id: message_id.clone(),
                parent: None,
                message: Some(NodeMessage {
                    id: message_id.clone(),
                    role: Some(Role::System),
                    parts: vec![content.to_string()],
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

fn split_heading_sections(content: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut heading = String::new();
    let mut body: Vec<&str> = Vec::new();

    let mut flush = |heading: &mut String, body: &mut Vec<&str>, out: &mut Vec<(String, String)>| {
        let text = body.join("\n").trim().to_string();
        if !heading.is_empty() || !text.is_empty() {
            out.push((std::mem::take(heading), text));
        }
        body.clear();
    };

    for line in content.lines() {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
            flush(&mut heading, &mut body, &mut sections);
            heading = trimmed[hashes..].trim().to_string();
        } else {
            body.push(line);
        }
    }
    flush(&mut heading, &mut body, &mut sections);
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_get_sequential_ids() {
        let content = "preface text\n\n# Intro\n\nbody one\n\n## Details\n\nbody two\n";
        let conv = parse_markdown_document("spec", content);

        assert!(conv.conversation_id.as_deref().unwrap().starts_with("doc__spec__"));
        assert_eq!(conv.title, "Intro");
        assert_eq!(conv.mapping.len(), 3);

        let preface = conv.mapping["sec:0001:preface"].message.as_ref().unwrap();
        assert_eq!(preface.role, Some(Role::System));
        assert_eq!(preface.parts[0], "preface text");

        let intro = &conv.mapping["sec:0002:intro"];
        assert_eq!(intro.parent.as_deref(), Some("sec:0001:preface"));
        assert_eq!(conv.current_node.as_deref(), Some("sec:0003:details"));
    }

    #[test]
    fn headingless_document_gets_single_node() {
        let conv = parse_markdown_document("notes", "just one paragraph");
        // One preface section carries the whole content
        assert_eq!(conv.mapping.len(), 1);
        assert!(conv.mapping.contains_key("sec:0001:preface"));
    }

    #[test]
    fn empty_document_has_no_nodes() {
        let conv = parse_markdown_document("empty", "   \n ");
        assert!(conv.mapping.is_empty());
        assert!(conv.current_node.is_none());
    }
}
