use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

/// Universal atom schema version written by this crate.
pub const ATOM_SCHEMA_VERSION: u32 = 2;

/// Canonical atom kinds. Legacy kind strings (`requirement`, `definition`,
/// `metric`, `assumption`, `constraint`, `idea`) are read as `Fact` with the
/// original string preserved at `meta.legacy.type`; they are never written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomKind {
    Fact,
    Decision,
    OpenQuestion,
    ActionItem,
    MeetingTopic,
    Risk,
    Blocker,
    Dependency,
    Deliverable,
    Milestone,
}

impl AtomKind {
    const LEGACY_FACT_ALIASES: [&'static str; 6] = [
        "requirement",
        "definition",
        "metric",
        "assumption",
        "constraint",
        "idea",
    ];

    /// Parse a kind string. Returns the canonical kind plus the original
    /// string when it was a legacy alias.
    pub fn parse(raw: &str) -> Option<(AtomKind, Option<&str>)> {
        let kind = match raw {
            "fact" => AtomKind::Fact,
            "decision" => AtomKind::Decision,
            "open_question" => AtomKind::OpenQuestion,
            "action_item" => AtomKind::ActionItem,
            "meeting_topic" => AtomKind::MeetingTopic,
            "risk" => AtomKind::Risk,
            "blocker" => AtomKind::Blocker,
            "dependency" => AtomKind::Dependency,
            "deliverable" => AtomKind::Deliverable,
            "milestone" => AtomKind::Milestone,
            other if Self::LEGACY_FACT_ALIASES.contains(&other) => {
                return Some((AtomKind::Fact, Some(raw)))
            }
            _ => return None,
        };
        Some((kind, None))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AtomKind::Fact => "fact",
            AtomKind::Decision => "decision",
            AtomKind::OpenQuestion => "open_question",
            AtomKind::ActionItem => "action_item",
            AtomKind::MeetingTopic => "meeting_topic",
            AtomKind::Risk => "risk",
            AtomKind::Blocker => "blocker",
            AtomKind::Dependency => "dependency",
            AtomKind::Deliverable => "deliverable",
            AtomKind::Milestone => "milestone",
        }
    }
}

/// Pointer from an atom back to its source message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Evidence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_iso: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_snippet: Option<String>,
}

impl Evidence {
    /// Stable dedupe key: `(conversation_id, message_id, time_iso)`.
    pub fn key(&self) -> (String, String, String) {
        (
            self.conversation_id.clone().unwrap_or_default(),
            self.message_id.clone().unwrap_or_default(),
            self.time_iso.clone().unwrap_or_default(),
        )
    }
}

/// A typed knowledge unit extracted from a conversation (schema v2).
/// Deserialization is lenient about everything except `kind` and
/// `statement`; LLM-produced atoms routinely omit the bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub kind: AtomKind,
    pub statement: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    pub status_confidence: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
    #[serde(default = "default_extracted_at")]
    pub extracted_at: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// Unknown top-level keys ride along untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_schema_version() -> u32 {
    ATOM_SCHEMA_VERSION
}

fn default_status() -> String {
    "active".into()
}

fn default_extracted_at() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl Atom {
    pub fn new(kind: AtomKind, statement: impl Into<String>) -> Atom {
        Atom {
            schema_version: ATOM_SCHEMA_VERSION,
            kind,
            statement: statement.into(),
            topic: None,
            status: "active".into(),
            status_confidence: None,
            evidence: Vec::new(),
            extracted_at: chrono::Utc::now().to_rfc3339(),
            meta: Map::new(),
            extra: Map::new(),
        }
    }

    /// Deserialize a JSON value into an atom, upgrading legacy kind aliases
    /// to `fact` and stashing the original string at `meta.legacy.type`.
    /// Returns None for values that are not atoms at all.
    pub fn from_value(value: Value) -> Option<Atom> {
        let mut value = value;
        let obj = value.as_object_mut()?;

        let raw_kind = obj.get("kind").and_then(Value::as_str)?.to_string();
        let (kind, legacy) = AtomKind::parse(&raw_kind)?;
        if legacy.is_some() {
            obj.insert("kind".into(), Value::String(kind.as_str().into()));
            let meta = obj
                .entry("meta")
                .or_insert_with(|| Value::Object(Map::new()));
            if let Some(meta) = meta.as_object_mut() {
                let legacy_ns = meta
                    .entry("legacy")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(legacy_ns) = legacy_ns.as_object_mut() {
                    legacy_ns
                        .entry("type")
                        .or_insert_with(|| Value::String(raw_kind.clone()));
                }
            }
        }

        serde_json::from_value(value).ok()
    }

    /// Ensure every evidence entry carries a conversation id.
    pub fn fill_conversation_id(&mut self, conversation_id: &str) {
        for ev in &mut self.evidence {
            if ev.conversation_id.as_deref().map_or(true, str::is_empty) {
                ev.conversation_id = Some(conversation_id.to_string());
            }
        }
    }

    /// Backfill conversation ids and guarantee at least one pointer, so an
    /// atom always traces back to its source conversation.
    pub fn ensure_evidence(&mut self, conversation_id: &str) {
        self.fill_conversation_id(conversation_id);
        if self.evidence.is_empty() {
            self.evidence.push(Evidence {
                conversation_id: Some(conversation_id.to_string()),
                ..Default::default()
            });
        }
    }

    /// Composite dedupe key used project-wide: `(kind, normalize(statement), topic)`.
    pub fn dedupe_key(&self) -> (AtomKind, String, Option<String>) {
        (
            self.kind,
            normalize_statement(&self.statement),
            self.topic.clone(),
        )
    }

    fn meta_path(&self, namespace: &str, key: &str) -> Option<&Value> {
        self.meta.get(namespace)?.get(key)
    }

    fn meta_str(&self, namespace: &str, key: &str) -> Option<&str> {
        self.meta_path(namespace, key)?.as_str()
    }

    fn meta_str_list(&self, namespace: &str, key: &str) -> Vec<&str> {
        self.meta_path(namespace, key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    // Typed views over the open meta namespace. Readers, never writers.

    pub fn decision_alternatives(&self) -> Vec<&str> {
        self.meta_str_list("decision", "alternatives")
    }

    pub fn decision_rationale(&self) -> Option<&str> {
        self.meta_str("decision", "rationale")
    }

    pub fn decision_consequences(&self) -> Option<&str> {
        self.meta_str("decision", "consequences")
    }

    pub fn task_owner(&self) -> Option<&str> {
        self.meta_str("task", "owner")
    }

    pub fn task_due(&self) -> Option<&str> {
        self.meta_str("task", "due")
    }

    pub fn question_context(&self) -> Option<&str> {
        self.meta_str("question", "context")
    }

    pub fn meeting_topic_summary(&self) -> Option<&str> {
        self.meta
            .get("meeting")
            .and_then(|m| m.get("topic"))
            .and_then(|t| t.get("summary"))
            .and_then(Value::as_str)
    }

    pub fn issue_blocked_by(&self) -> Vec<&str> {
        self.meta_str_list("issue", "blocked_by")
    }

    pub fn issue_depends_on(&self) -> Vec<&str> {
        self.meta_str_list("issue", "depends_on")
    }

    pub fn legacy_type(&self) -> Option<&str> {
        self.meta_str("legacy", "type")
    }

    /// Set by the consolidator on first insert; groups atoms back onto
    /// their conversation for topic documents.
    pub fn source_conversation_id(&self) -> Option<&str> {
        self.extra
            .get("source_conversation_id")
            .and_then(Value::as_str)
    }
}

/// Normalization used by every composite dedupe key: Unicode NFC,
/// lowercase, collapse whitespace, strip.
pub fn normalize_statement(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    nfc.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}
