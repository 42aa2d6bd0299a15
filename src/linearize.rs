use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::conversation::{epoch_to_iso, Conversation, Message};
use crate::error::PipelineError;
use crate::normalize::{load_conversations, NonJsonKind};

/// Flatten a conversation tree into chronological order: walk parent
/// pointers from `current_node` (visited set aborts on cycles), reverse,
/// then drop nodes whose message lacks a role or post-strip text.
pub fn linearize_conversation(conversation: &Conversation) -> Vec<Message> {
    let Some(current) = conversation.current_node.as_deref() else {
        return Vec::new();
    };

    let mut path = Vec::new();
    let mut visited = HashSet::new();
    let mut node_id = Some(current.to_string());

    while let Some(id) = node_id {
        if !visited.insert(id.clone()) {
            break;
        }
        node_id = conversation
            .mapping
            .get(&id)
            .and_then(|node| node.parent.clone());
        path.push(id);
    }

    path.reverse();

    let mut messages = Vec::new();
    for id in path {
        let Some(message) = conversation.mapping.get(&id).and_then(|n| n.message.as_ref())
        else {
            continue;
        };

        let text = message.parts.join("\n").trim().to_string();
        let Some(role) = message.role else { continue };
        if text.is_empty() {
            continue;
        }

        messages.push(Message {
            id: message.id.clone(),
            role,
            text,
            create_time: message.create_time,
            time_iso: message.create_time.and_then(epoch_to_iso),
        });
    }

    messages
}

/// Render the evidence markdown for one conversation.
pub fn render_conversation_markdown(
    messages: &[Message],
    conversation_id: &str,
    title: &str,
    project_id: Option<&str>,
    project_name: Option<&str>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {title}\n\n"));
    out.push_str(&format!("Conversation ID: `{conversation_id}`\n\n"));
    match (project_name, project_id) {
        (Some(name), Some(id)) => out.push_str(&format!("Project: **{name}** (`{id}`)\n\n")),
        (Some(name), None) => out.push_str(&format!("Project: **{name}**\n\n")),
        (None, Some(id)) => out.push_str(&format!("Project ID: `{id}`\n\n")),
        (None, None) => {}
    }
    out.push_str("---\n\n");

    for msg in messages {
        out.push_str(&format!("## {}\n\n", msg.role.title_case()));
        if let Some(time_iso) = &msg.time_iso {
            out.push_str(&format!("**Time**: {time_iso}\n\n"));
        }
        if !msg.id.is_empty() {
            out.push_str(&format!("**Message ID**: `{}`\n\n", msg.id));
        }
        out.push_str(&format!("{}\n\n---\n\n", msg.text));
    }

    out
}

/// Write the evidence markdown for one conversation at
/// `<output_dir>/<conversation_id>/conversation.md`.
pub async fn write_conversation_markdown(
    messages: &[Message],
    conversation_id: &str,
    title: &str,
    output_dir: &Path,
    project_id: Option<&str>,
    project_name: Option<&str>,
) -> Result<PathBuf, PipelineError> {
    let output_path = output_dir.join(conversation_id).join("conversation.md");
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content =
        render_conversation_markdown(messages, conversation_id, title, project_id, project_name);
    tokio::fs::write(&output_path, content).await?;
    Ok(output_path)
}

/// Linearize every conversation in an export and write evidence markdown.
/// Conversations without an id or without survivable messages are skipped
/// with a warning; only input-shape errors are fatal.
pub async fn linearize_export(
    input: &Path,
    output_dir: &Path,
    limit: Option<usize>,
    non_json_kind: NonJsonKind,
) -> Result<(), PipelineError> {
    info!(input = %input.display(), ?limit, "loading export");
    let conversations = load_conversations(input, limit, non_json_kind)?;
    info!(num_conversations = conversations.len(), "found conversations");

    for conversation in &conversations {
        let Some(conv_id) = conversation.conversation_id.as_deref() else {
            warn!(reason = "no_id", "skipping conversation without ID");
            continue;
        };

        let messages = linearize_conversation(conversation);
        if messages.is_empty() {
            warn!(conversation_id = %conv_id, reason = "no_messages", "no messages found");
            continue;
        }

        let output_path = write_conversation_markdown(
            &messages,
            conv_id,
            &conversation.title,
            output_dir,
            conversation.project_id.as_deref(),
            conversation.project_name.as_deref(),
        )
        .await?;

        debug!(
            conversation_id = %conv_id,
            num_messages = messages.len(),
            output_path = %output_path.display(),
            "linearized conversation"
        );
    }

    info!("linearization complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Node, NodeMessage, Role};
    use std::collections::HashMap;

    fn node(id: &str, parent: Option<&str>, role: Option<Role>, text: &str) -> (String, Node) {
        (
            id.to_string(),
            Node {
                id: id.to_string(),
                parent: parent.map(String::from),
                message: Some(NodeMessage {
                    id: id.to_string(),
                    role,
                    parts: vec![text.to_string()],
                    create_time: None,
                }),
            },
        )
    }

    fn conversation(nodes: Vec<(String, Node)>, head: &str) -> Conversation {
        Conversation {
            conversation_id: Some("c1".into()),
            title: "Test".into(),
            project_id: None,
            project_name: None,
            mapping: nodes.into_iter().collect::<HashMap<_, _>>(),
            current_node: Some(head.into()),
        }
    }

    #[test]
    fn walks_head_to_root_and_reverses() {
        let conv = conversation(
            vec![
                node("A", None, Some(Role::User), "hello"),
                node("B", Some("A"), Some(Role::Assistant), "hi"),
            ],
            "B",
        );

        let messages = linearize_conversation(&conv);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "A");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].text, "hello");
        assert_eq!(messages[1].id, "B");
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[test]
    fn cycle_aborts_without_hanging() {
        // A -> B -> A parent loop
        let conv = conversation(
            vec![
                node("A", Some("B"), Some(Role::User), "one"),
                node("B", Some("A"), Some(Role::Assistant), "two"),
            ],
            "B",
        );

        let messages = linearize_conversation(&conv);
        assert!(messages.len() <= conv.node_count());
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn drops_empty_and_roleless_messages() {
        let conv = conversation(
            vec![
                node("A", None, Some(Role::User), "keep"),
                node("B", Some("A"), None, "roleless"),
                node("C", Some("B"), Some(Role::Assistant), "   "),
                node("D", Some("C"), Some(Role::Assistant), "also keep"),
            ],
            "D",
        );

        let messages = linearize_conversation(&conv);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "D"]);
    }

    #[test]
    fn no_head_means_no_messages() {
        let mut conv = conversation(vec![node("A", None, Some(Role::User), "x")], "A");
        conv.current_node = None;
        assert!(linearize_conversation(&conv).is_empty());
    }

    #[tokio::test]
    async fn evidence_markdown_layout() {
        let dir = tempfile::tempdir().unwrap();
        let messages = vec![
            Message {
                id: "m1".into(),
                role: Role::User,
                text: "hello".into(),
                create_time: Some(1_735_689_600.0),
                time_iso: Some("2025-01-01T00:00:00".into()),
            },
            Message {
                id: "m2".into(),
                role: Role::Assistant,
                text: "hi".into(),
                create_time: None,
                time_iso: None,
            },
        ];

        let path = write_conversation_markdown(
            &messages,
            "c1",
            "Greeting",
            dir.path(),
            Some("p1"),
            Some("Atlas"),
        )
        .await
        .unwrap();

        assert_eq!(path, dir.path().join("c1").join("conversation.md"));
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("# Greeting\n"));
        assert!(content.contains("Conversation ID: `c1`"));
        assert!(content.contains("Project: **Atlas** (`p1`)"));
        assert!(content.contains("## User"));
        assert!(content.contains("**Time**: 2025-01-01T00:00:00"));
        assert!(content.contains("**Message ID**: `m1`"));
        assert!(content.contains("## Assistant"));
        // Assistant message has no time line
        assert_eq!(content.matches("**Time**").count(), 1);
    }

    #[tokio::test]
    async fn export_skips_idless_and_empty_conversations() {
        let in_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();

        std::fs::write(
            in_dir.path().join("good.json"),
            serde_json::json!({
                "mapping": {
                    "A": {"parent": null, "message": {"id": "A",
                        "author": {"role": "user"}, "content": {"parts": ["hello"]}}}
                },
                "current_node": "A"
            })
            .to_string(),
        )
        .unwrap();
        // Conversation with no surviving messages
        std::fs::write(
            in_dir.path().join("empty.json"),
            serde_json::json!({"mapping": {}, "current_node": null}).to_string(),
        )
        .unwrap();

        linearize_export(in_dir.path(), out_dir.path(), None, NonJsonKind::Meeting)
            .await
            .unwrap();

        assert!(out_dir.path().join("good").join("conversation.md").exists());
        assert!(!out_dir.path().join("empty").exists());
    }
}
