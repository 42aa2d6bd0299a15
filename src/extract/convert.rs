use serde_json::{Map, Value};

use crate::atom::{Atom, AtomKind, Evidence};

fn evidence_from_payload(item: &Value, conversation_id: &str) -> Vec<Evidence> {
    let mut evidence: Vec<Evidence> = item
        .get("evidence")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|ev| ev.is_object())
        .map(|ev| Evidence {
            conversation_id: non_empty(ev, "conversation_id")
                .or_else(|| Some(conversation_id.to_string())),
            message_id: non_empty(ev, "message_id"),
            time_iso: non_empty(ev, "time_iso"),
            text_snippet: non_empty(ev, "text_snippet"),
        })
        .collect();

    // Every emitted atom must trace back to its conversation even when the
    // model forgot to cite a message.
    if evidence.is_empty() {
        evidence.push(Evidence {
            conversation_id: Some(conversation_id.to_string()),
            ..Default::default()
        });
    }
    evidence
}

fn non_empty(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn base_atom(kind: AtomKind, item: &Value, statement: String, conversation_id: &str) -> Atom {
    let mut atom = Atom::new(kind, statement);
    atom.topic = non_empty(item, "topic");
    if let Some(status) = non_empty(item, "status") {
        atom.status = status;
    }
    atom.status_confidence = non_empty(item, "status_confidence");
    atom.evidence = evidence_from_payload(item, conversation_id);
    if let Some(extracted_at) = non_empty(item, "extracted_at") {
        atom.extracted_at = extracted_at;
    }
    atom
}

/// Convert legacy fact payloads. The `type` field may carry a legacy alias
/// (requirement, metric, ...) which collapses to `fact` with the original
/// stashed at `meta.legacy.type`, or a canonical kind which is kept.
pub fn convert_facts(facts: &[Value], conversation_id: &str) -> Vec<Atom> {
    facts
        .iter()
        .filter_map(|item| {
            let statement = non_empty(item, "statement")?;
            let raw_type = item.get("type").and_then(Value::as_str).unwrap_or("fact");
            let (kind, legacy) = AtomKind::parse(raw_type).unwrap_or((AtomKind::Fact, None));

            let mut atom = base_atom(kind, item, statement, conversation_id);
            if let Some(original) = legacy {
                let mut legacy_ns = Map::new();
                legacy_ns.insert("type".into(), Value::String(original.into()));
                atom.meta.insert("legacy".into(), Value::Object(legacy_ns));
            }
            Some(atom)
        })
        .collect()
}

/// Convert legacy decision payloads; alternatives/rationale/consequences
/// land under `meta.decision`.
pub fn convert_decisions(decisions: &[Value], conversation_id: &str) -> Vec<Atom> {
    decisions
        .iter()
        .filter_map(|item| {
            let statement = non_empty(item, "statement")?;
            let mut atom = base_atom(AtomKind::Decision, item, statement, conversation_id);

            let mut decision_ns = Map::new();
            decision_ns.insert(
                "alternatives".into(),
                item.get("alternatives")
                    .filter(|v| v.is_array())
                    .cloned()
                    .unwrap_or_else(|| Value::Array(Vec::new())),
            );
            decision_ns.insert(
                "rationale".into(),
                item.get("rationale").cloned().unwrap_or(Value::Null),
            );
            decision_ns.insert(
                "consequences".into(),
                item.get("consequences").cloned().unwrap_or(Value::Null),
            );
            atom.meta.insert("decision".into(), Value::Object(decision_ns));
            Some(atom)
        })
        .collect()
}

/// Convert legacy open-question payloads; the question text becomes the
/// statement, context lands at `meta.question.context`.
pub fn convert_open_questions(questions: &[Value], conversation_id: &str) -> Vec<Atom> {
    questions
        .iter()
        .filter_map(|item| {
            let question = non_empty(item, "question").or_else(|| non_empty(item, "statement"))?;
            let mut atom = base_atom(AtomKind::OpenQuestion, item, question, conversation_id);
            atom.status = "active".into();

            let mut question_ns = Map::new();
            question_ns.insert(
                "context".into(),
                item.get("context").cloned().unwrap_or(Value::Null),
            );
            atom.meta.insert("question".into(), Value::Object(question_ns));
            Some(atom)
        })
        .collect()
}
