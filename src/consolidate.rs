use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::atom::{Atom, AtomKind};
use crate::error::PipelineError;
use crate::jsonl::{read_atoms, write_jsonl, write_text_atomic};

/// Statistics from one consolidation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsolidateStats {
    pub atoms_in: usize,
    pub atoms_out: usize,
    pub atoms_by_kind: BTreeMap<AtomKind, usize>,
}

/// Reduce per-conversation atom stores into one project-wide file.
///
/// Conversation directories are visited in lexicographic order; atoms
/// dedupe on `(kind, normalize(statement), topic)` with the first
/// occurrence retained (unknown meta and all) and evidence sets unioned by
/// `(conversation_id, message_id, time_iso)`.
pub async fn consolidate_project(
    atoms_dir: &Path,
    docs_dir: &Path,
    out_dir: &Path,
    include_docs: bool,
) -> Result<ConsolidateStats, PipelineError> {
    let mut stats = ConsolidateStats::default();

    let mut order: Vec<(AtomKind, String, Option<String>)> = Vec::new();
    let mut by_key: HashMap<(AtomKind, String, Option<String>), Atom> = HashMap::new();

    let conversation_dirs = conversation_dirs(atoms_dir);
    info!(num_conversations = conversation_dirs.len(), "consolidating conversations");

    for conv_dir in conversation_dirs {
        let conv_id = conv_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let atoms_path = conv_dir.join("atoms.jsonl");
        let atoms = read_atoms(&atoms_path).await?;
        if atoms.is_empty() {
            debug!(conversation_id = %conv_id, "no atoms found, skipping");
            continue;
        }

        for mut atom in atoms {
            stats.atoms_in += 1;
            *stats.atoms_by_kind.entry(atom.kind).or_default() += 1;
            atom.fill_conversation_id(&conv_id);

            let key = atom.dedupe_key();
            match by_key.get_mut(&key) {
                Some(existing) => {
                    for ev in atom.evidence {
                        let ev_key = ev.key();
                        if !existing.evidence.iter().any(|e| e.key() == ev_key) {
                            existing.evidence.push(ev);
                        }
                    }
                }
                None => {
                    atom.extra
                        .entry("source_conversation_id".to_string())
                        .or_insert_with(|| Value::String(conv_id.clone()));
                    order.push(key.clone());
                    by_key.insert(key, atom);
                }
            }
        }
    }

    let atoms_out: Vec<Atom> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();
    stats.atoms_out = atoms_out.len();

    let project_dir = out_dir.join("project");
    info!(
        project_dir = %project_dir.display(),
        atoms_in = stats.atoms_in,
        atoms_out = stats.atoms_out,
        "writing consolidated files"
    );

    write_jsonl(&project_dir.join("atoms.jsonl"), &atoms_out).await?;
    write_text_atomic(&project_dir.join("manifest.md"), &render_manifest(&stats, include_docs))
        .await?;

    if include_docs && docs_dir.exists() {
        let (doc_files, adr_files) = partition_doc_files(docs_dir);

        if !doc_files.is_empty() {
            debug!(num_files = doc_files.len(), "concatenating markdown docs");
            concat_markdown(&doc_files, &project_dir.join("docs_concat.md")).await?;
        }
        if !adr_files.is_empty() {
            debug!(num_files = adr_files.len(), "concatenating ADR files");
            concat_markdown(&adr_files, &project_dir.join("adrs_concat.md")).await?;
        }
    }

    Ok(stats)
}

fn conversation_dirs(atoms_dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(atoms_dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn render_manifest(stats: &ConsolidateStats, include_docs: bool) -> String {
    let kind_summary = stats
        .atoms_by_kind
        .iter()
        .map(|(kind, count)| format!("{}: {count}", kind.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut lines = vec![
        "# Project Knowledge Manifest".to_string(),
        String::new(),
        "## Statistics".to_string(),
        String::new(),
        format!(
            "- **Atoms**: {} input -> {} output (deduped)",
            stats.atoms_in, stats.atoms_out
        ),
        format!("- **By Kind**: {kind_summary}"),
        String::new(),
        "## Files".to_string(),
        String::new(),
        "- `atoms.jsonl` - Consolidated universal atoms (schema v2)".to_string(),
    ];

    if include_docs {
        lines.push("- `docs_concat.md` - Concatenated non-ADR documentation".to_string());
        lines.push("- `adrs_concat.md` - Concatenated ADR files".to_string());
    }
    lines.push(String::new());
    lines.join("\n")
}

fn partition_doc_files(docs_dir: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut doc_files = Vec::new();
    let mut adr_files = Vec::new();
    collect_markdown(docs_dir, &mut |path| {
        let is_adr = path
            .strip_prefix(docs_dir)
            .ok()
            .is_some_and(|rel| rel.components().any(|c| c.as_os_str() == "decisions"));
        if is_adr {
            adr_files.push(path);
        } else {
            doc_files.push(path);
        }
    });
    doc_files.sort();
    adr_files.sort();
    (doc_files, adr_files)
}

fn collect_markdown(dir: &Path, visit: &mut impl FnMut(PathBuf)) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_markdown(&path, visit);
        } else if path.extension().is_some_and(|e| e == "md") {
            visit(path);
        }
    }
}

async fn concat_markdown(files: &[PathBuf], out_path: &Path) -> Result<(), PipelineError> {
    let mut parts: Vec<String> = Vec::new();
    for path in files {
        let Ok(content) = tokio::fs::read_to_string(path).await else {
            continue;
        };
        parts.push(format!(
            "\n\n---\n\n<!-- SOURCE_FILE: {} -->\n\n{content}\n",
            path.display()
        ));
    }
    write_text_atomic(out_path, parts.join("").trim_start()).await
}
