use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::atom::normalize_statement;

/// Raw candidate payloads as the LLM returns them, keyed by the three
/// Pass-1 buckets. Values stay loosely typed until universal conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateSet {
    #[serde(default)]
    pub facts: Vec<Value>,
    #[serde(default)]
    pub decisions: Vec<Value>,
    #[serde(default)]
    pub open_questions: Vec<Value>,
}

impl CandidateSet {
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty() && self.decisions.is_empty() && self.open_questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.len() + self.decisions.len() + self.open_questions.len()
    }

    pub fn extend(&mut self, other: CandidateSet) {
        self.facts.extend(other.facts);
        self.decisions.extend(other.decisions);
        self.open_questions.extend(other.open_questions);
    }

    /// Parse a Pass-1/Pass-2 reply object into the three buckets, dropping
    /// anything that isn't an array of objects.
    pub fn from_reply(value: &Value) -> CandidateSet {
        fn bucket(value: &Value, key: &str) -> Vec<Value> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|items| items.iter().filter(|v| v.is_object()).cloned().collect())
                .unwrap_or_default()
        }
        CandidateSet {
            facts: bucket(value, "facts"),
            decisions: bucket(value, "decisions"),
            open_questions: bucket(value, "open_questions"),
        }
    }

    /// Local pre-dedupe ahead of Pass-2 refinement. Facts and decisions
    /// merge on `(type, topic, normalize(statement))`, questions on
    /// `(topic, normalize(question))`; evidence arrays of duplicates merge
    /// with `(conversation_id, message_id, time_iso)` dedup and an optional
    /// per-item cap. First occurrence wins on every other field.
    pub fn dedupe(self, max_evidence_per_item: Option<usize>) -> CandidateSet {
        CandidateSet {
            facts: dedupe_bucket(self.facts, "statement", true, max_evidence_per_item),
            decisions: dedupe_bucket(self.decisions, "statement", true, max_evidence_per_item),
            open_questions: dedupe_bucket(self.open_questions, "question", false, max_evidence_per_item),
        }
    }
}

fn str_field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(Value::as_str).unwrap_or("")
}

fn evidence_key(ev: &Value) -> (String, String, String) {
    (
        str_field(ev, "conversation_id").to_string(),
        str_field(ev, "message_id").to_string(),
        str_field(ev, "time_iso").to_string(),
    )
}

fn dedupe_bucket(
    items: Vec<Value>,
    statement_key: &str,
    keyed_by_type: bool,
    max_evidence: Option<usize>,
) -> Vec<Value> {
    let mut order: Vec<(String, String, String)> = Vec::new();
    let mut seen: HashMap<(String, String, String), Value> = HashMap::new();

    for item in items {
        let key = (
            if keyed_by_type { str_field(&item, "type").to_string() } else { String::new() },
            str_field(&item, "topic").to_string(),
            normalize_statement(str_field(&item, statement_key)),
        );

        match seen.get_mut(&key) {
            Some(existing) => {
                let mut merged: Vec<Value> = existing
                    .get("evidence")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let mut keys: Vec<_> = merged.iter().map(evidence_key).collect();

                for ev in item.get("evidence").and_then(Value::as_array).into_iter().flatten() {
                    let ev_key = evidence_key(ev);
                    if !keys.contains(&ev_key) {
                        keys.push(ev_key);
                        merged.push(ev.clone());
                    }
                }
                if let Some(cap) = max_evidence {
                    merged.truncate(cap);
                }
                existing["evidence"] = Value::Array(merged);
            }
            None => {
                let mut item = item;
                if let Some(cap) = max_evidence {
                    if let Some(evidence) = item.get_mut("evidence").and_then(Value::as_array_mut) {
                        evidence.truncate(cap);
                    }
                }
                order.push(key.clone());
                seen.insert(key, item);
            }
        }
    }

    order.into_iter().filter_map(|key| seen.remove(&key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_reply_tolerates_missing_buckets() {
        let set = CandidateSet::from_reply(&json!({"facts": [{"statement": "x"}]}));
        assert_eq!(set.facts.len(), 1);
        assert!(set.decisions.is_empty());
        assert!(set.open_questions.is_empty());

        let set = CandidateSet::from_reply(&json!({"facts": ["not an object", {"ok": 1}]}));
        assert_eq!(set.facts.len(), 1);
    }

    #[test]
    fn duplicate_facts_merge_evidence() {
        let set = CandidateSet {
            facts: vec![
                json!({"type": "fact", "topic": "pricing", "statement": "Plan costs $10",
                       "evidence": [{"message_id": "m1"}]}),
                json!({"type": "fact", "topic": "pricing", "statement": "  plan COSTS  $10 ",
                       "evidence": [{"message_id": "m2"}, {"message_id": "m1"}]}),
            ],
            ..Default::default()
        };

        let deduped = set.dedupe(None);
        assert_eq!(deduped.facts.len(), 1);
        let evidence = deduped.facts[0]["evidence"].as_array().unwrap();
        assert_eq!(evidence.len(), 2);
        // First occurrence's wording is kept
        assert_eq!(deduped.facts[0]["statement"], "Plan costs $10");
    }

    #[test]
    fn different_topic_is_a_different_key() {
        let set = CandidateSet {
            facts: vec![
                json!({"type": "fact", "topic": "a", "statement": "same"}),
                json!({"type": "fact", "topic": "b", "statement": "same"}),
            ],
            ..Default::default()
        };
        assert_eq!(set.dedupe(None).facts.len(), 2);
    }

    #[test]
    fn questions_keyed_without_type() {
        let set = CandidateSet {
            open_questions: vec![
                json!({"topic": "infra", "question": "Which region?",
                       "evidence": [{"message_id": "m1"}]}),
                json!({"topic": "infra", "question": "which  region?",
                       "evidence": [{"message_id": "m2"}]}),
            ],
            ..Default::default()
        };
        let deduped = set.dedupe(None);
        assert_eq!(deduped.open_questions.len(), 1);
        assert_eq!(
            deduped.open_questions[0]["evidence"].as_array().unwrap().len(),
            2
        );
    }

    #[test]
    fn evidence_cap_applies_to_merges_and_singles() {
        let set = CandidateSet {
            facts: vec![
                json!({"type": "fact", "topic": "t", "statement": "s",
                       "evidence": [{"message_id": "m1"}, {"message_id": "m2"}]}),
                json!({"type": "fact", "topic": "t", "statement": "s",
                       "evidence": [{"message_id": "m3"}]}),
                json!({"type": "fact", "topic": "t", "statement": "other",
                       "evidence": [{"message_id": "m1"}, {"message_id": "m2"}, {"message_id": "m3"}]}),
            ],
            ..Default::default()
        };

        let deduped = set.dedupe(Some(2));
        assert_eq!(deduped.facts[0]["evidence"].as_array().unwrap().len(), 2);
        assert_eq!(deduped.facts[1]["evidence"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn order_of_first_occurrence_is_preserved() {
        let set = CandidateSet {
            decisions: vec![
                json!({"type": "decision", "topic": "t", "statement": "one"}),
                json!({"type": "decision", "topic": "t", "statement": "two"}),
                json!({"type": "decision", "topic": "t", "statement": "one"}),
                json!({"type": "decision", "topic": "t", "statement": "three"}),
            ],
            ..Default::default()
        };
        let deduped = set.dedupe(None);
        let statements: Vec<&str> = deduped
            .decisions
            .iter()
            .map(|d| d["statement"].as_str().unwrap())
            .collect();
        assert_eq!(statements, vec!["one", "two", "three"]);
    }
}
