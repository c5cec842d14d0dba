//! Workflow export step: render a completed run's script as markdown.
use super::Workspace;
use crate::cli::ExportArgs;
use crate::schema::{Citation, QuizAnswer, Script};
use crate::util::read_json;
use anyhow::{anyhow, Context, Result};
use std::fmt::Write as _;
use std::fs;

pub fn run_export(args: &ExportArgs) -> Result<()> {
    let workspace = Workspace::open(&args.root)?;
    let script_path = workspace.paths.script_path(&args.run);
    if !script_path.is_file() {
        return Err(anyhow!(
            "run {} has no final script (complete it with `lgate run` first)",
            args.run
        ));
    }
    let script: Script = read_json(&script_path)?;
    let transcript = render_transcript(&args.run, &script);
    match &args.out {
        Some(out) => {
            fs::write(out, transcript.as_bytes())
                .with_context(|| format!("write {}", out.display()))?;
            println!("wrote {}", out.display());
        }
        None => print!("{transcript}"),
    }
    Ok(())
}

pub fn render_transcript(run_id: &str, script: &Script) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {} ({run_id})", script.segment_id);
    if let Some(minutes) = script.duration_estimate_min {
        let _ = writeln!(out, "\n_About {minutes:.0} minutes._");
    }
    if let Some(recap) = &script.recap {
        let _ = writeln!(out, "\n## Recap\n\n{recap}");
    }
    for (idx, scene) in script.scenes.iter().enumerate() {
        let _ = writeln!(out, "\n## {}. {}\n", idx + 1, scene.beat);
        let _ = writeln!(out, "**{}:** {}", scene.speaker.as_str(), scene.spoken_text);
        if !scene.display_text.trim().is_empty() && scene.display_text != scene.spoken_text {
            let _ = writeln!(out, "\n> {}", scene.display_text);
        }
        if !scene.citations.is_empty() {
            let _ = writeln!(out, "\nSources: {}", format_citations(&scene.citations));
        }
        if let Some(quiz) = &scene.quiz {
            let _ = writeln!(out, "\n**Quiz:** {}", quiz.question);
            for choice in &quiz.choices {
                let _ = writeln!(out, "- {choice}");
            }
            let answer = match &quiz.answer {
                QuizAnswer::Text(text) => text.clone(),
                QuizAnswer::Bool(value) => value.to_string(),
            };
            let _ = writeln!(out, "\nAnswer: {answer}. {}", quiz.explanation);
        }
    }
    if let Some(preview) = &script.preview {
        let _ = writeln!(out, "\n## Next time\n\n{preview}");
    }
    out
}

fn format_citations(citations: &[Citation]) -> String {
    citations
        .iter()
        .map(|c| format!("{} p.{} ({})", c.document_id, c.page, c.unit_id))
        .collect::<Vec<_>>()
        .join("; ")
}
