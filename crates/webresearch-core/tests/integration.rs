//! End-to-end runs of the workflow engine against scripted models and stub
//! search workers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use webresearch_core::{
    CancelSignal, ChatMessage, CheckpointStore, EngineConfig, LanguageModel, LlmReply, PlanStep,
    SearchWorker, StepStatus, TaskPool, Tool, ToolCallRequest, ToolKind, ToolSet, WebSearchTool,
    WorkflowEngine, WorkflowState, REPORT_FILENAME, WEB_SEARCH_TOOL_NAME,
};

/// Feeds a fixed sequence of replies and records every prompt it saw.
struct ScriptedModel {
    replies: Mutex<VecDeque<LlmReply>>,
    prompts: Mutex<Vec<String>>,
    system_prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: Vec<LlmReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            system_prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn system_prompts(&self) -> Vec<String> {
        self.system_prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn ask(&self, messages: &[ChatMessage]) -> anyhow::Result<LlmReply> {
        let first = messages
            .first()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let last = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.system_prompts.lock().unwrap().push(first);
        self.prompts.lock().unwrap().push(last);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("model script exhausted"))
    }
}

struct StubWorker;

#[async_trait]
impl SearchWorker for StubWorker {
    async fn search(&self, query: &str) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({
            "summary": format!("facts about {query}"),
            "url": format!("https://example.com/{query}")
        }))
    }
}

/// Raises the stop signal from inside the search itself, so the stop lands
/// while a gathering step is in flight.
struct StoppingWorker {
    cancel: CancelSignal,
}

#[async_trait]
impl SearchWorker for StoppingWorker {
    async fn search(&self, query: &str) -> anyhow::Result<serde_json::Value> {
        self.cancel.cancel();
        Ok(serde_json::json!({ "summary": format!("facts about {query}") }))
    }
}

struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn kind(&self) -> ToolKind {
        ToolKind::Protocol
    }
    async fn invoke(
        &self,
        _args: serde_json::Value,
        _cancel: &CancelSignal,
    ) -> anyhow::Result<serde_json::Value> {
        anyhow::bail!("boom")
    }
}

struct NoteTool;

#[async_trait]
impl Tool for NoteTool {
    fn name(&self) -> &str {
        "take_note"
    }
    fn description(&self) -> &str {
        "records a note; succeeds but is not a search"
    }
    fn kind(&self) -> ToolKind {
        ToolKind::File
    }
    async fn invoke(
        &self,
        _args: serde_json::Value,
        _cancel: &CancelSignal,
    ) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!("noted"))
    }
}

fn toolset() -> ToolSet {
    let mut tools = ToolSet::new();
    tools.register(Arc::new(WebSearchTool::new(
        TaskPool::new(2),
        Arc::new(StubWorker),
        4,
    )));
    tools.register(Arc::new(BrokenTool));
    tools.register(Arc::new(NoteTool));
    tools
}

fn search_call(id: &str, queries: &[&str]) -> ToolCallRequest {
    ToolCallRequest::new(
        id,
        WEB_SEARCH_TOOL_NAME,
        serde_json::json!({ "queries": queries }),
    )
}

fn engine(
    dir: &TempDir,
    task_id: &str,
    topic: &str,
    llm: Arc<ScriptedModel>,
    cancel: CancelSignal,
    config: EngineConfig,
) -> WorkflowEngine {
    WorkflowEngine::new(
        WorkflowState::new(task_id, topic),
        CheckpointStore::new(dir.path()),
        llm,
        toolset(),
        cancel,
        config,
    )
}

#[tokio::test]
async fn fresh_run_plans_gathers_and_synthesizes() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedModel::new(vec![
        LlmReply::text("1. Define terms\n2. Identify methods"),
        LlmReply::text("").with_tool_call(search_call("c1", &["battery recycling definition"])),
        LlmReply::text("").with_tool_call(search_call("c2", &["battery recycling methods"])),
        LlmReply::text("# Battery Recycling\n\nFindings [1]."),
    ]);

    let outcome = engine(
        &dir,
        "run-1",
        "battery recycling",
        llm.clone(),
        CancelSignal::new(),
        EngineConfig::default(),
    )
    .run()
    .await;

    let state = &outcome.state;
    assert_eq!(state.plan.len(), 2);
    assert_eq!(state.plan[0].task, "Define terms");
    assert_eq!(state.plan[1].task, "Identify methods");
    assert!(state.plan.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(state.search_results.len(), 2);
    assert_eq!(state.current_step_index, 2);

    let report = outcome.report.expect("report produced");
    assert!(report.contains("Battery Recycling"));

    let persisted =
        std::fs::read_to_string(dir.path().join("run-1").join(REPORT_FILENAME)).unwrap();
    assert_eq!(persisted, report);

    // Plan steps were recorded against each step.
    assert_eq!(
        state.plan[0].queries.as_deref(),
        Some(&["battery recycling definition".to_string()][..])
    );

    // The gathering conversation opened by advertising the tool inventory.
    let systems = llm.system_prompts();
    assert!(systems[1].contains("Available tools:"), "got: {}", systems[1]);
    assert!(systems[1].contains("web_search"));
}

#[tokio::test]
async fn resumed_run_reuses_the_plan_and_skips_done_steps() {
    let dir = TempDir::new().unwrap();
    let store = CheckpointStore::new(dir.path());

    let mut plan = vec![
        PlanStep::pending(1, "Define terms"),
        PlanStep::pending(2, "Identify methods"),
    ];
    plan[0].status = StepStatus::Completed;
    store.save_plan("run-2", &plan).unwrap();
    store
        .save_results(
            "run-2",
            &[webresearch_core::SearchResultEntry::completed(
                "old query",
                serde_json::json!({"summary": "previous finding"}),
            )],
        )
        .unwrap();

    // No planning reply in the script: re-planning would exhaust it.
    let llm = ScriptedModel::new(vec![
        LlmReply::text("").with_tool_call(search_call("c1", &["methods"])),
        LlmReply::text("resumed report"),
    ]);

    let outcome = engine(
        &dir,
        "run-2",
        "battery recycling",
        llm.clone(),
        CancelSignal::new(),
        EngineConfig::default(),
    )
    .run()
    .await;

    assert_eq!(outcome.report.as_deref(), Some("resumed report"));
    assert_eq!(outcome.state.search_results.len(), 2);
    assert_eq!(outcome.state.plan[0].status, StepStatus::Completed);
    assert_eq!(outcome.state.plan[1].status, StepStatus::Completed);

    // The first model call went straight to step 2.
    let prompts = llm.prompts();
    assert!(prompts[0].contains("Identify methods"), "got: {}", prompts[0]);
}

#[tokio::test]
async fn step_completion_requires_a_clean_search_call() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedModel::new(vec![
        LlmReply::text("1. Step one\n2. Step two\n3. Step three"),
        // Only a non-search tool: the call succeeds, the step does not.
        LlmReply::text("")
            .with_tool_call(ToolCallRequest::new("c1", "take_note", serde_json::json!({}))),
        // Search succeeds but a sibling call errors: step fails.
        LlmReply::text("")
            .with_tool_call(search_call("c2", &["q2"]))
            .with_tool_call(ToolCallRequest::new("c3", "broken", serde_json::json!({}))),
        // One clean search call: step completes.
        LlmReply::text("").with_tool_call(search_call("c4", &["q3"])),
        LlmReply::text("policy report"),
    ]);

    let outcome = engine(
        &dir,
        "run-3",
        "topic",
        llm,
        CancelSignal::new(),
        EngineConfig::default(),
    )
    .run()
    .await;

    let statuses: Vec<_> = outcome.state.plan.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Failed, StepStatus::Failed, StepStatus::Completed]
    );
    // The failed step's search results are still kept.
    assert_eq!(outcome.state.search_results.len(), 2);
    assert!(outcome.report.is_some());
}

#[tokio::test]
async fn consecutive_failures_abort_the_run() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedModel::new(vec![
        LlmReply::text("1. a\n2. b\n3. c\n4. d"),
        // Two tool-less replies in a row trip the threshold of 2.
        LlmReply::text("I would rather chat."),
        LlmReply::text("Still chatting."),
    ]);

    let config = EngineConfig {
        max_consecutive_failures: 2,
        ..EngineConfig::default()
    };
    let outcome = engine(&dir, "run-4", "topic", llm, CancelSignal::new(), config)
        .run()
        .await;

    assert!(outcome.report.is_none());
    let error = outcome.state.error_message.unwrap();
    assert!(error.contains("consecutive"), "got: {error}");
    assert_eq!(outcome.state.plan[2].status, StepStatus::Pending);
}

#[tokio::test]
async fn planning_without_parseable_steps_is_terminal() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedModel::new(vec![LlmReply::text("I cannot plan that.")]);

    let outcome = engine(
        &dir,
        "run-5",
        "topic",
        llm,
        CancelSignal::new(),
        EngineConfig::default(),
    )
    .run()
    .await;

    assert!(outcome.report.is_none());
    let error = outcome.state.error_message.unwrap();
    assert!(error.starts_with("planning failed:"), "got: {error}");
    assert!(error.contains("no parseable plan"));
    assert!(outcome.state.plan.is_empty());
}

#[tokio::test]
async fn synthesis_failure_ends_the_run_without_a_report() {
    let dir = TempDir::new().unwrap();
    // The script runs dry at the synthesis call.
    let llm = ScriptedModel::new(vec![
        LlmReply::text("1. Only step"),
        LlmReply::text("").with_tool_call(search_call("c1", &["q"])),
    ]);

    let outcome = engine(
        &dir,
        "run-9",
        "topic",
        llm,
        CancelSignal::new(),
        EngineConfig::default(),
    )
    .run()
    .await;

    assert!(outcome.report.is_none());
    let error = outcome.state.error_message.unwrap();
    assert!(error.starts_with("synthesis failed:"), "got: {error}");
    // The gathered findings survived the failed synthesis.
    assert_eq!(outcome.state.search_results.len(), 1);
}

#[tokio::test]
async fn stop_before_start_halts_without_touching_the_model() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedModel::new(vec![]);
    let cancel = CancelSignal::new();
    cancel.cancel();

    let outcome = engine(
        &dir,
        "run-6",
        "topic",
        llm.clone(),
        cancel,
        EngineConfig::default(),
    )
    .run()
    .await;

    assert!(outcome.report.is_none());
    assert!(llm.prompts().is_empty());
}

#[tokio::test]
async fn stop_during_gathering_leaves_the_next_step_pending() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelSignal::new();

    let mut tools = ToolSet::new();
    tools.register(Arc::new(WebSearchTool::new(
        TaskPool::new(2),
        Arc::new(StoppingWorker {
            cancel: cancel.clone(),
        }),
        4,
    )));

    let llm = ScriptedModel::new(vec![
        LlmReply::text("1. First step\n2. Second step"),
        LlmReply::text("").with_tool_call(search_call("c1", &["q1"])),
    ]);

    let outcome = WorkflowEngine::new(
        WorkflowState::new("run-10", "topic"),
        CheckpointStore::new(dir.path()),
        llm,
        tools,
        cancel,
        EngineConfig::default(),
    )
    .run()
    .await;

    // The in-flight step ran to completion; the loop then halted without
    // advancing past the untouched second step.
    assert!(outcome.report.is_none());
    assert_eq!(outcome.state.current_step_index, 1);
    assert_eq!(outcome.state.plan[0].status, StepStatus::Completed);
    assert_eq!(outcome.state.plan[1].status, StepStatus::Pending);

    // A resumed run picks up exactly there.
    let (plan, resume) = CheckpointStore::new(dir.path())
        .load_plan("run-10")
        .unwrap();
    assert_eq!(resume, 1);
    assert_eq!(plan[1].status, StepStatus::Pending);
}

#[tokio::test]
async fn malformed_result_checkpoint_is_recoverable() {
    let dir = TempDir::new().unwrap();
    let task_dir = dir.path().join("run-7");
    std::fs::create_dir_all(&task_dir).unwrap();
    std::fs::write(task_dir.join("search_info.json"), b"{broken").unwrap();

    let llm = ScriptedModel::new(vec![
        LlmReply::text("1. Only step"),
        LlmReply::text("").with_tool_call(search_call("c1", &["q"])),
        LlmReply::text("recovered report"),
    ]);

    let outcome = engine(
        &dir,
        "run-7",
        "topic",
        llm,
        CancelSignal::new(),
        EngineConfig::default(),
    )
    .run()
    .await;

    // The run survived, finished, and the parse failure stayed visible.
    assert_eq!(outcome.report.as_deref(), Some("recovered report"));
    assert_eq!(outcome.state.search_results.len(), 1);
    assert!(outcome
        .state
        .error_message
        .unwrap()
        .contains("search results"));
}

#[tokio::test]
async fn run_without_findings_emits_the_minimal_report() {
    let dir = TempDir::new().unwrap();
    let llm = ScriptedModel::new(vec![
        LlmReply::text("1. Only step"),
        // Note-taking succeeds but produces no findings; synthesis must not
        // consult the model when the result list is empty.
        LlmReply::text("")
            .with_tool_call(ToolCallRequest::new("c1", "take_note", serde_json::json!({}))),
    ]);

    let outcome = engine(
        &dir,
        "run-8",
        "obscure topic",
        llm.clone(),
        CancelSignal::new(),
        EngineConfig::default(),
    )
    .run()
    .await;

    let report = outcome.report.expect("minimal report");
    assert!(report.contains("No information was gathered"));
    assert!(report.contains("obscure topic"));
    assert_eq!(llm.prompts().len(), 2);
}
