use std::path::Path;

use tracing::{debug, info, warn};

use crate::atom::{Atom, AtomKind};
use crate::error::PipelineError;
use crate::jsonl::{read_atoms, write_text_atomic};
use crate::normalize::meeting::slugify;

/// Compile per-conversation markdown docs from extracted atoms: one
/// overview per conversation plus one ADR file per decision.
pub async fn compile_docs(atoms_dir: &Path, output_dir: &Path) -> Result<(), PipelineError> {
    let mut conv_dirs: Vec<_> = std::fs::read_dir(atoms_dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_dir())
        .collect();
    conv_dirs.sort();

    info!(num_conversations = conv_dirs.len(), "compiling docs");

    for conv_dir in conv_dirs {
        let conv_id = conv_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let atoms = read_atoms(&conv_dir.join("atoms.jsonl")).await?;
        if atoms.is_empty() {
            warn!(conversation_id = %conv_id, "no atoms found");
            continue;
        }
        compile_conversation(&conv_id, &atoms, output_dir).await?;
    }

    Ok(())
}

async fn compile_conversation(
    conv_id: &str,
    atoms: &[Atom],
    output_dir: &Path,
) -> Result<(), PipelineError> {
    let overview = render_overview(conv_id, atoms);
    write_text_atomic(&output_dir.join(conv_id).join("overview.md"), &overview).await?;

    let decisions: Vec<&Atom> = atoms.iter().filter(|a| a.kind == AtomKind::Decision).collect();
    for (idx, decision) in decisions.iter().enumerate() {
        let number = idx + 1;
        let topic_slug = decision
            .topic
            .as_deref()
            .map(slugify)
            .unwrap_or_else(|| "decision".into());
        let path = output_dir
            .join("decisions")
            .join(conv_id)
            .join(format!("ADR-{number:04}-{topic_slug}.md"));
        write_text_atomic(&path, &render_adr(number, decision, conv_id)).await?;
    }

    debug!(
        conversation_id = %conv_id,
        num_atoms = atoms.len(),
        num_decisions = decisions.len(),
        "compiled conversation docs"
    );
    Ok(())
}

fn render_overview(conv_id: &str, atoms: &[Atom]) -> String {
    let mut out = format!("# Conversation {conv_id}\n\n");

    let sections = [
        ("Facts", AtomKind::Fact),
        ("Decisions", AtomKind::Decision),
        ("Open Questions", AtomKind::OpenQuestion),
        ("Action Items", AtomKind::ActionItem),
        ("Risks", AtomKind::Risk),
    ];

    for (heading, kind) in sections {
        let matching: Vec<&Atom> = atoms.iter().filter(|a| a.kind == kind).collect();
        if matching.is_empty() {
            continue;
        }
        out.push_str(&format!("## {heading}\n\n"));
        for atom in matching {
            match &atom.topic {
                Some(topic) => out.push_str(&format!("- **{topic}**: {}\n", atom.statement)),
                None => out.push_str(&format!("- {}\n", atom.statement)),
            }
        }
        out.push('\n');
    }

    out
}

fn render_adr(number: usize, decision: &Atom, conv_id: &str) -> String {
    let mut out = format!("# ADR {number:04}: {}\n\n", decision.statement);
    out.push_str(&format!("- Status: {}\n", decision.status));
    out.push_str(&format!("- Conversation: `{conv_id}`\n\n"));

    let alternatives = decision.decision_alternatives();
    if !alternatives.is_empty() {
        out.push_str("## Alternatives Considered\n\n");
        for alternative in alternatives {
            out.push_str(&format!("- {alternative}\n"));
        }
        out.push('\n');
    }
    if let Some(rationale) = decision.decision_rationale() {
        out.push_str(&format!("## Rationale\n\n{rationale}\n\n"));
    }
    if let Some(consequences) = decision.decision_consequences() {
        out.push_str(&format!("## Consequences\n\n{consequences}\n"));
    }
    out
}
