use std::collections::HashMap;

use chrono::DateTime;
use serde_json::Value;

/// Message author role. Unknown non-empty roles collapse to `System`;
/// an absent role stays `None` on the node and drops it at linearization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim() {
            "" => None,
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => Some(Role::System),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Capitalized form for evidence markdown headings.
    pub fn title_case(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }
}

/// Payload carried by a conversation node.
#[derive(Debug, Clone)]
pub struct NodeMessage {
    pub id: String,
    pub role: Option<Role>,
    pub parts: Vec<String>,
    pub create_time: Option<f64>,
}

/// One node in the conversation tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub parent: Option<String>,
    pub message: Option<NodeMessage>,
}

/// Canonical conversation: a message tree with a designated head node.
/// All supported input shapes normalize into this before anything else
/// touches them.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub conversation_id: Option<String>,
    pub title: String,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub mapping: HashMap<String, Node>,
    pub current_node: Option<String>,
}

/// A linearized message, in chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub create_time: Option<f64>,
    pub time_iso: Option<String>,
}

impl Conversation {
    /// Build from a ChatGPT-style export object (`mapping` + `current_node`).
    /// Tolerant of missing fields; extra keys are ignored.
    pub fn from_chatgpt_value(value: &Value) -> Conversation {
        let conversation_id = string_field(value, "id")
            .or_else(|| string_field(value, "conversation_id"))
            .or_else(|| string_field(value, "uuid"));

        let title = string_field(value, "title")
            .or_else(|| string_field(value, "name"))
            .unwrap_or_else(|| "Untitled Conversation".into());

        let (project_id, project_name) = project_fields(value);

        let mut mapping = HashMap::new();
        if let Some(raw_mapping) = value.get("mapping").and_then(Value::as_object) {
            for (node_id, raw_node) in raw_mapping {
                mapping.insert(node_id.clone(), parse_node(node_id, raw_node));
            }
        }

        let current_node = string_field(value, "current_node");

        Conversation {
            conversation_id,
            title,
            project_id,
            project_name,
            mapping,
            current_node,
        }
    }

    pub fn node_count(&self) -> usize {
        self.mapping.len()
    }

    /// Meeting artifacts are identified by their synthesized id prefix.
    pub fn is_meeting(&self) -> bool {
        self.conversation_id
            .as_deref()
            .is_some_and(|id| id.starts_with("meeting__"))
    }
}

fn parse_node(node_id: &str, raw: &Value) -> Node {
    let parent = string_field(raw, "parent");
    let message = raw.get("message").and_then(parse_node_message);
    Node {
        id: node_id.to_string(),
        parent,
        message,
    }
}

fn parse_node_message(raw: &Value) -> Option<NodeMessage> {
    if !raw.is_object() {
        return None;
    }

    let id = string_field(raw, "id").unwrap_or_default();
    let role = raw
        .get("author")
        .and_then(|a| a.get("role"))
        .and_then(Value::as_str)
        .and_then(Role::parse);

    let parts = raw
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let create_time = raw.get("create_time").and_then(Value::as_f64);

    Some(NodeMessage {
        id,
        role,
        parts,
        create_time,
    })
}

fn project_fields(value: &Value) -> (Option<String>, Option<String>) {
    let mut project_id =
        string_field(value, "project_id").or_else(|| string_field(value, "project_uuid"));
    let mut project_name = string_field(value, "project_name");

    if let Some(project) = value.get("project").and_then(Value::as_object) {
        if project_id.is_none() {
            project_id = project.get("uuid").and_then(Value::as_str).map(String::from);
        }
        if project_name.is_none() {
            project_name = project.get("name").and_then(Value::as_str).map(String::from);
        }
    }

    (project_id, project_name)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Parse an ISO-8601 timestamp (with offset or trailing `Z`) into epoch
/// seconds. Naive timestamps are read as UTC. Anything unparseable is None.
pub fn parse_iso_timestamp(raw: &str) -> Option<f64> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1e6);
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp() as f64)
}

/// Epoch seconds back to an ISO-8601 string (UTC, second precision).
pub fn epoch_to_iso(epoch: f64) -> Option<String> {
    DateTime::from_timestamp(epoch as i64, 0).map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string())
}
