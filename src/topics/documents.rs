use std::collections::{BTreeMap, HashMap};

use crate::atom::{Atom, AtomKind};
use crate::conversation::Conversation;

/// Kinds included in topic documents. Action items, meeting bookkeeping,
/// and issue-tracking kinds are left out to keep topic noise down.
const DOCUMENT_KINDS: [AtomKind; 3] =
    [AtomKind::Fact, AtomKind::Decision, AtomKind::OpenQuestion];

/// Per-conversation context the topic stages need beyond the document text.
#[derive(Debug, Clone, Default)]
pub struct ConversationInfo {
    pub title: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub atom_count: usize,
}

/// Synthesized topic documents plus per-conversation info, keyed by
/// conversation id. BTreeMap keeps downstream iteration deterministic.
#[derive(Debug, Clone, Default)]
pub struct ConversationDocuments {
    pub documents: BTreeMap<String, String>,
    pub info: HashMap<String, ConversationInfo>,
}

impl ConversationDocuments {
    pub fn ids(&self) -> Vec<String> {
        self.documents.keys().cloned().collect()
    }

    pub fn texts_for(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .map(|id| self.documents.get(id).cloned().unwrap_or_default())
            .collect()
    }
}

/// Build one embedding document per conversation: title and project label,
/// then consolidated atom statements grouped under fixed section headings.
/// Conversations with no qualifying atoms still get a title-only document.
pub fn build_conversation_documents(
    conversations: &[Conversation],
    atoms: &[Atom],
) -> ConversationDocuments {
    let mut info: HashMap<String, ConversationInfo> = HashMap::new();

    for conversation in conversations {
        let Some(conv_id) = conversation.conversation_id.clone() else {
            continue;
        };
        info.insert(
            conv_id,
            ConversationInfo {
                title: conversation.title.clone(),
                project_id: conversation.project_id.clone(),
                project_name: conversation.project_name.clone(),
                atom_count: 0,
            },
        );
    }

    let mut facts: HashMap<String, Vec<&str>> = HashMap::new();
    let mut decisions: HashMap<String, Vec<&str>> = HashMap::new();
    let mut questions: HashMap<String, Vec<&str>> = HashMap::new();

    for atom in atoms {
        let Some(conv_id) = atom.source_conversation_id() else {
            continue;
        };
        info.entry(conv_id.to_string())
            .or_insert_with(|| ConversationInfo {
                title: "Untitled Conversation".into(),
                ..Default::default()
            })
            .atom_count += 1;

        if !DOCUMENT_KINDS.contains(&atom.kind) {
            continue;
        }
        let bucket = match atom.kind {
            AtomKind::Fact => &mut facts,
            AtomKind::Decision => &mut decisions,
            _ => &mut questions,
        };
        bucket
            .entry(conv_id.to_string())
            .or_default()
            .push(&atom.statement);
    }

    let mut documents = BTreeMap::new();
    for (conv_id, conv_info) in &info {
        let mut parts = vec![format!("Title: {}", conv_info.title)];

        match (&conv_info.project_name, &conv_info.project_id) {
            (Some(name), Some(id)) => parts.push(format!("Project: {name} ({id})")),
            (Some(name), None) => parts.push(format!("Project: {name}")),
            (None, Some(id)) => parts.push(format!("Project: {id}")),
            (None, None) => {}
        }

        for (heading, bucket) in [
            ("Facts and Knowledge", &facts),
            ("Decisions", &decisions),
            ("Open Questions", &questions),
        ] {
            if let Some(statements) = bucket.get(conv_id) {
                parts.push(format!("\n{heading}:"));
                parts.extend(statements.iter().map(|s| format!("- {s}")));
            }
        }

        documents.insert(conv_id.clone(), parts.join("\n"));
    }

    ConversationDocuments { documents, info }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::Evidence;
    use serde_json::Value;

    fn conversation(id: &str, title: &str) -> Conversation {
        Conversation {
            conversation_id: Some(id.into()),
            title: title.into(),
            ..Default::default()
        }
    }

    fn atom(kind: AtomKind, statement: &str, conv_id: &str) -> Atom {
        let mut atom = Atom::new(kind, statement);
        atom.evidence = vec![Evidence {
            conversation_id: Some(conv_id.into()),
            ..Default::default()
        }];
        atom.extra.insert(
            "source_conversation_id".into(),
            Value::String(conv_id.into()),
        );
        atom
    }

    #[test]
    fn groups_by_kind_under_fixed_headings() {
        let conversations = vec![conversation("c1", "Pricing chat")];
        let atoms = vec![
            atom(AtomKind::Fact, "Plan costs $10", "c1"),
            atom(AtomKind::Decision, "Use tiered pricing", "c1"),
            atom(AtomKind::OpenQuestion, "Annual discount?", "c1"),
        ];

        let built = build_conversation_documents(&conversations, &atoms);
        let doc = &built.documents["c1"];

        assert!(doc.starts_with("Title: Pricing chat"));
        let facts_pos = doc.find("Facts and Knowledge:").unwrap();
        let decisions_pos = doc.find("Decisions:").unwrap();
        let questions_pos = doc.find("Open Questions:").unwrap();
        assert!(facts_pos < decisions_pos && decisions_pos < questions_pos);
        assert!(doc.contains("- Plan costs $10"));
        assert!(doc.contains("- Use tiered pricing"));
        assert!(doc.contains("- Annual discount?"));
        assert_eq!(built.info["c1"].atom_count, 3);
    }

    #[test]
    fn noisy_kinds_excluded_but_counted() {
        let conversations = vec![conversation("c1", "Meeting")];
        let atoms = vec![
            atom(AtomKind::ActionItem, "Alice: send report", "c1"),
            atom(AtomKind::Risk, "Vendor lock-in", "c1"),
            atom(AtomKind::MeetingTopic, "Q3 roadmap", "c1"),
            atom(AtomKind::Fact, "We ship weekly", "c1"),
        ];

        let built = build_conversation_documents(&conversations, &atoms);
        let doc = &built.documents["c1"];
        assert!(!doc.contains("Alice: send report"));
        assert!(!doc.contains("Vendor lock-in"));
        assert!(!doc.contains("Q3 roadmap"));
        assert!(doc.contains("We ship weekly"));
        // atom_count covers every atom, excluded kinds included
        assert_eq!(built.info["c1"].atom_count, 4);
    }

    #[test]
    fn project_label_variants() {
        let mut with_both = conversation("c1", "A");
        with_both.project_id = Some("p1".into());
        with_both.project_name = Some("Atlas".into());
        let mut name_only = conversation("c2", "B");
        name_only.project_name = Some("Atlas".into());

        let built = build_conversation_documents(&[with_both, name_only], &[]);
        assert!(built.documents["c1"].contains("Project: Atlas (p1)"));
        assert!(built.documents["c2"].contains("Project: Atlas"));
    }

    #[test]
    fn atom_only_conversations_get_placeholder_title() {
        let atoms = vec![atom(AtomKind::Fact, "orphaned", "ghost")];
        let built = build_conversation_documents(&[], &atoms);
        assert!(built.documents["ghost"].starts_with("Title: Untitled Conversation"));
    }

    #[test]
    fn document_order_is_deterministic() {
        let conversations = vec![
            conversation("zeta", "Z"),
            conversation("alpha", "A"),
            conversation("mid", "M"),
        ];
        let built = build_conversation_documents(&conversations, &[]);
        assert_eq!(built.ids(), vec!["alpha", "mid", "zeta"]);
    }
}
