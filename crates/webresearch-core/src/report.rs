//! Final report synthesis: deterministic formatting of the gathered
//! findings plus a single language-model call to produce the narrative.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::info;

use crate::llm::LanguageModel;
use crate::state::{ChatMessage, PlanStep, SearchResultEntry, SearchStatus, StepStatus};

const SYNTHESIS_SYSTEM_PROMPT: &str = "\
You are a professional researcher writing a comprehensive, well-structured \
report from collected findings. Structure it as introduction, main body and \
conclusion, cite sources with bracketed numbers where the findings carry \
them, and base the report strictly on the provided material. Acknowledge \
contradictory or incomplete findings instead of papering over them.";

/// Render the collected findings into the text block handed to the model.
/// Cancelled entries carry no content and are omitted.
pub fn build_findings(results: &[SearchResultEntry]) -> String {
    let mut out = String::new();
    for entry in results {
        match entry.status {
            SearchStatus::Completed => {
                let payload = entry
                    .payload
                    .as_ref()
                    .map(render_payload)
                    .unwrap_or_default();
                let _ = writeln!(out, "### Finding from query: \"{}\"", entry.query);
                let _ = writeln!(out, "{payload}");
                out.push_str("---\n");
            }
            SearchStatus::Failed => {
                let _ = writeln!(out, "### Failed query: \"{}\"", entry.query);
                let _ = writeln!(
                    out,
                    "Error: {}",
                    entry.error.as_deref().unwrap_or("unknown")
                );
                out.push_str("---\n");
            }
            SearchStatus::Cancelled => {}
        }
    }
    out
}

fn render_payload(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Render the plan as a checklist summary for the report context.
pub fn build_plan_summary(plan: &[PlanStep]) -> String {
    let mut out = String::from("Research plan followed:\n");
    for step in plan {
        let marker = match step.status {
            StepStatus::Completed => "- [x]",
            StepStatus::Failed => "- [ ] (failed)",
            StepStatus::Pending => "- [ ]",
        };
        let _ = writeln!(out, "{marker} {}", step.task);
    }
    out
}

/// Ask the model for the final narrative. Errors here are terminal for the
/// run; there is no meaningful partial-success mode for synthesis.
pub async fn synthesize(
    llm: Arc<dyn LanguageModel>,
    topic: &str,
    plan: &[PlanStep],
    results: &[SearchResultEntry],
) -> anyhow::Result<String> {
    let findings = build_findings(results);
    let plan_summary = build_plan_summary(plan);

    info!(entries = results.len(), "synthesizing final report");

    let messages = vec![
        ChatMessage::system(SYNTHESIS_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Research topic: {topic}\n\n{plan_summary}\nCollected findings:\n```\n{findings}```"
        )),
    ];

    let reply = llm.ask(&messages).await?;
    Ok(reply.content)
}

/// Fallback report when a run finished without gathering anything; emitted
/// without a model call since there is nothing to synthesize.
pub fn empty_report(topic: &str) -> String {
    format!("# Research Report: {topic}\n\nNo information was gathered during the research process.\n")
}
