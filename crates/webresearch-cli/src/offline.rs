//! Offline collaborators for demo runs: a scripted language model and a
//! simulated search worker, so the engine can be exercised end to end
//! without any provider credentials or a real browser.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use tracing::debug;
use webresearch_core::{
    ChatMessage, LanguageModel, LlmReply, SearchWorker, ToolCallRequest, WEB_SEARCH_TOOL_NAME,
};

/// Deterministic stand-in for a chat model. Recognizes the engine's three
/// prompt shapes and answers each with canned but topic-aware content.
#[derive(Default)]
pub struct OfflineModel {
    call_counter: AtomicU64,
}

impl OfflineModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_call_id(&self) -> String {
        let id = self.call_counter.fetch_add(1, Ordering::SeqCst);
        format!("call_{id}")
    }
}

#[async_trait]
impl LanguageModel for OfflineModel {
    async fn ask(&self, messages: &[ChatMessage]) -> anyhow::Result<LlmReply> {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");

        if let Some(topic) = last.strip_prefix("Generate a research plan for the topic: ") {
            debug!(topic, "offline model producing plan");
            return Ok(LlmReply::text(format!(
                "1. Define the core concepts and terminology related to {topic}\n\
                 2. Identify the key developments and current state of {topic}\n\
                 3. Investigate challenges and open problems around {topic}\n\
                 4. Summarize the findings and draw conclusions about {topic}"
            )));
        }

        if last.starts_with("Research topic:") {
            debug!("offline model synthesizing report");
            let findings = last
                .split("Collected findings:")
                .nth(1)
                .unwrap_or("")
                .trim_matches(|c| c == '\n' || c == '`');
            return Ok(LlmReply::text(format!(
                "# Research Report\n\n## Introduction\n\nThis report was assembled \
                 offline from the collected findings below.\n\n## Findings\n\n{findings}\n\n\
                 ## Conclusion\n\nOffline synthesis complete.\n"
            )));
        }

        // A gathering step: derive two queries from the task text.
        let task = last.split(": ").nth(1).unwrap_or(last);
        debug!(task, "offline model requesting search");
        Ok(LlmReply::text("").with_tool_call(ToolCallRequest::new(
            self.next_call_id(),
            WEB_SEARCH_TOOL_NAME,
            serde_json::json!({
                "queries": [format!("{task} overview"), format!("{task} details")]
            }),
        )))
    }
}

/// Simulates browser retrieval latency and returns a canned finding.
pub struct SimulatedSearchWorker;

#[async_trait]
impl SearchWorker for SimulatedSearchWorker {
    async fn search(&self, query: &str) -> anyhow::Result<serde_json::Value> {
        sleep(Duration::from_millis(150)).await;
        Ok(serde_json::json!({
            "summary": format!("Simulated finding for '{query}'."),
            "title": format!("Reference page on {query}"),
            "url": format!("https://example.com/search?q={}", query.replace(' ', "+")),
        }))
    }
}
