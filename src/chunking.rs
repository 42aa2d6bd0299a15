use crate::conversation::Message;

/// Token estimator keyed by a model identifier. The estimate is a bounded
/// function of text length (chars/4); exact model vocabularies don't matter
/// here, but the same identifier must be shared by the chunker and any
/// length-aware prompt so budgets line up.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    model: String,
}

impl TokenEstimator {
    pub fn for_model(model: impl Into<String>) -> TokenEstimator {
        TokenEstimator { model: model.into() }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn estimate(&self, text: &str) -> usize {
        text.len() / 4
    }
}

/// Group messages into chunks whose estimated token sum stays within
/// `max_tokens`. A single message over the limit is emitted alone; messages
/// are never split and ordering is preserved.
pub fn chunk_messages(
    messages: &[Message],
    max_tokens: usize,
    estimator: &TokenEstimator,
) -> Vec<Vec<Message>> {
    if messages.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    let mut current_tokens = 0;

    for msg in messages {
        let msg_tokens = estimator.estimate(&msg.text);

        if msg_tokens > max_tokens {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.push(vec![msg.clone()]);
            current_tokens = 0;
            continue;
        }

        if current_tokens + msg_tokens > max_tokens && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }

        current.push(msg.clone());
        current_tokens += msg_tokens;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

// Break points tried in order when a raw-text chunk would exceed the limit.
const SENTENCE_BREAKS: [&str; 9] = [
    ".\n\n", ".\n", ". ", "!\n\n", "!\n", "! ", "?\n\n", "?\n", "? ",
];

/// Chunk raw text for the embedder: token-bounded windows that prefer
/// sentence boundaries, with `overlap_tokens` of carryover between chunks.
pub fn chunk_text(
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
    estimator: &TokenEstimator,
) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    if estimator.estimate(text) <= max_tokens {
        return vec![text.to_string()];
    }

    let bytes = text.as_bytes();
    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let mut end = (pos + max_tokens * 4).min(bytes.len());
        end = floor_char_boundary(text, end);

        if end < bytes.len() {
            for punct in SENTENCE_BREAKS {
                if let Some(found) = text[pos..end].rfind(punct) {
                    if found > 0 {
                        end = pos + found + punct.len();
                        break;
                    }
                }
            }
        }

        let chunk = text[pos..end].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= bytes.len() {
            break;
        }
        // Step back by the overlap, but always make forward progress and
        // land on a char boundary.
        let mut next = end.saturating_sub(overlap_tokens * 4).max(pos + 1);
        while next < bytes.len() && !text.is_char_boundary(next) {
            next += 1;
        }
        pos = next;
    }

    chunks
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    fn msg(id: &str, text: &str) -> Message {
        Message {
            id: id.into(),
            role: Role::User,
            text: text.into(),
            create_time: None,
            time_iso: None,
        }
    }

    fn estimator() -> TokenEstimator {
        TokenEstimator::for_model("gpt-4")
    }

    #[test]
    fn empty_input_empty_output() {
        assert!(chunk_messages(&[], 100, &estimator()).is_empty());
        assert!(chunk_text("   ", 100, 10, &estimator()).is_empty());
    }

    #[test]
    fn messages_grouped_under_budget() {
        // Each message is 100 chars = 25 tokens; budget of 60 fits two.
        let messages: Vec<Message> =
            (0..5).map(|i| msg(&format!("m{i}"), &"x".repeat(100))).collect();
        let chunks = chunk_messages(&messages, 60, &estimator());

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2);
        assert_eq!(chunks[1].len(), 2);
        assert_eq!(chunks[2].len(), 1);

        // Ordering preserved across the chunking
        let ids: Vec<&str> = chunks.iter().flatten().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn oversized_message_emitted_alone() {
        let messages = vec![
            msg("small", &"a".repeat(40)),
            msg("huge", &"b".repeat(4000)),
            msg("tail", &"c".repeat(40)),
        ];
        let chunks = chunk_messages(&messages, 100, &estimator());
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].len(), 1);
        assert_eq!(chunks[1][0].id, "huge");
    }

    #[test]
    fn short_text_single_chunk() {
        let chunks = chunk_text("hello world.", 100, 10, &estimator());
        assert_eq!(chunks, vec!["hello world."]);
    }

    #[test]
    fn long_text_prefers_sentence_breaks() {
        let sentence = "This is a sentence that keeps going for a while. ";
        let text = sentence.repeat(40);
        let chunks = chunk_text(&text, 50, 5, &estimator());

        assert!(chunks.len() > 1);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.ends_with('.'), "chunk should break at sentence: {chunk:?}");
        }
    }

    #[test]
    fn multibyte_text_chunks_safely() {
        let text = "Ēvery sëntence hás açcents. ".repeat(60);
        let chunks = chunk_text(&text, 20, 5, &estimator());
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.is_empty()));
    }

    #[test]
    fn chunking_covers_full_text() {
        let text = "word ".repeat(500);
        let chunks = chunk_text(&text, 50, 10, &estimator());
        assert!(chunks.iter().all(|c| !c.is_empty()));
        // Last chunk must reach the end of the input
        let tail = chunks.last().unwrap();
        assert!(text.trim_end().ends_with(tail.trim_end()));
    }
}
