use std::path::Path;

use serde_json::Value;

use crate::atom::Atom;
use crate::error::PipelineError;

/// Read a JSONL file into raw JSON objects. Blank and malformed lines are
/// skipped; a missing file reads as empty.
pub async fn read_jsonl(path: &Path) -> Result<Vec<Value>, PipelineError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(line) {
            if value.is_object() {
                rows.push(value);
            }
        }
    }
    Ok(rows)
}

/// Read a per-conversation atoms file, upgrading legacy kinds on the way in.
pub async fn read_atoms(path: &Path) -> Result<Vec<Atom>, PipelineError> {
    let rows = read_jsonl(path).await?;
    Ok(rows.into_iter().filter_map(Atom::from_value).collect())
}

/// Write serializable rows to a JSONL file atomically (temp file + rename).
/// UTF-8, one object per line, LF terminators.
pub async fn write_jsonl<T: serde::Serialize>(
    path: &Path,
    rows: &[T],
) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut buf = String::new();
    for row in rows {
        buf.push_str(&serde_json::to_string(row)?);
        buf.push('\n');
    }

    let temp = path.with_extension("jsonl.tmp");
    tokio::fs::write(&temp, buf).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

/// Write a string to a file atomically.
pub async fn write_text_atomic(path: &Path, content: &str) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("tmp");
    tokio::fs::write(&temp, content).await?;
    tokio::fs::rename(&temp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomKind;
    use serde_json::json;

    #[tokio::test]
    async fn roundtrip_and_skip_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");

        let rows = vec![json!({"a": 1}), json!({"b": 2})];
        write_jsonl(&path, &rows).await.unwrap();

        // Inject a malformed line and a blank line
        let mut text = tokio::fs::read_to_string(&path).await.unwrap();
        text.push_str("\nnot json\n{\"c\": 3}\n");
        tokio::fs::write(&path, text).await.unwrap();

        let back = read_jsonl(&path).await.unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[2]["c"], 3);
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rows = read_jsonl(&dir.path().join("absent.jsonl")).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn atoms_reader_upgrades_legacy_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atoms.jsonl");
        let rows = vec![json!({
            "schema_version": 2,
            "kind": "metric",
            "statement": "Latency p99 under 200ms",
            "status": "active",
            "status_confidence": null,
            "evidence": [{"message_id": "m1"}],
            "extracted_at": "2025-01-01T00:00:00",
            "meta": {}
        })];
        write_jsonl(&path, &rows).await.unwrap();

        let atoms = read_atoms(&path).await.unwrap();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].kind, AtomKind::Fact);
        assert_eq!(atoms[0].legacy_type(), Some("metric"));
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        write_jsonl(&path, &[json!({"x": 1})]).await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("jsonl.tmp").exists());
    }
}
