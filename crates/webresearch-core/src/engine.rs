//! The research workflow state machine.
//!
//! One engine instance owns one run: Planning -> Gathering -> Synthesizing,
//! with an implicit Aborted terminal reachable when the stop signal is
//! observed or the consecutive-failure threshold is exceeded. The stop
//! signal is honored cooperatively at the start of each phase and each
//! gathering iteration, never mid-step, so no step is left half-judged.
//!
//! Failure policy: model errors during planning or synthesis end the run;
//! anything that goes wrong inside a single gathering step marks that step
//! failed and the run moves on; checkpoint I/O problems are only ever
//! recorded, never thrown.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::checkpoint::CheckpointStore;
use crate::error::ResearchError;
use crate::llm::LanguageModel;
use crate::report;
use crate::state::{
    ChatMessage, PlanStep, SearchResultEntry, StateSnapshot, StepStatus, WorkflowPhase,
    WorkflowState,
};
use crate::tools::{self, ToolCallStatus, ToolKind, ToolSet, WEB_SEARCH_TOOL_NAME};

static PLAN_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\d+[.)]\s*|[*-]\s+)(.+)$").expect("invalid plan line regex")
});

const PLANNING_SYSTEM_PROMPT: &str = "\
You are a meticulous research assistant. Create a step-by-step research plan \
to thoroughly investigate the given topic. Format the output as a numbered \
list where each item is one distinct, actionable research task. Keep the \
plan focused; aim for 5-10 steps.";

const GATHERING_SYSTEM_PROMPT: &str = "\
You are a research assistant executing one step of a research plan. Use the \
available tools, especially the web search tool, to gather the information \
the current task needs. Be precise with your search queries.";

/// Engine behavior knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Abort the run after this many step failures in a row; 0 disables.
    pub max_consecutive_failures: usize,
    /// Name of the tool whose successful use marks a step completed.
    pub search_tool_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            search_tool_name: WEB_SEARCH_TOOL_NAME.to_string(),
        }
    }
}

/// What a finished run hands back to the caller. A missing report together
/// with a populated `error_message` is the canonical failed-run signal.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: Option<String>,
    pub state: WorkflowState,
}

/// Sequences one research run. Exclusively owns its `WorkflowState`; the
/// only externally mutable input is the shared `CancelSignal`.
pub struct WorkflowEngine {
    state: WorkflowState,
    store: CheckpointStore,
    llm: Arc<dyn LanguageModel>,
    tools: ToolSet,
    cancel: CancelSignal,
    config: EngineConfig,
    snapshots: Option<UnboundedSender<StateSnapshot>>,
}

impl WorkflowEngine {
    pub fn new(
        state: WorkflowState,
        store: CheckpointStore,
        llm: Arc<dyn LanguageModel>,
        tools: ToolSet,
        cancel: CancelSignal,
        config: EngineConfig,
    ) -> Self {
        Self {
            state,
            store,
            llm,
            tools,
            cancel,
            config,
            snapshots: None,
        }
    }

    /// Stream a snapshot to the given channel after every persisted mutation.
    pub fn with_snapshots(mut self, sender: UnboundedSender<StateSnapshot>) -> Self {
        self.snapshots = Some(sender);
        self
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Drive the run to a terminal state.
    pub async fn run(mut self) -> RunOutcome {
        let task_id = self.state.task_id.clone();
        info!(task_id = %task_id, topic = %self.state.topic, "starting research run");

        self.restore();

        if self.check_stop(WorkflowPhase::Planning) {
            return self.finish(None);
        }
        if let Err(err) = self.plan_node().await {
            error!(task_id = %task_id, error = %err, "planning failed");
            self.state.record_error(err.to_string());
            self.emit(WorkflowPhase::Aborted);
            return self.finish(None);
        }

        self.gather_loop().await;

        if self.check_stop(WorkflowPhase::Synthesizing) {
            return self.finish(None);
        }
        let report = self.synthesis_node().await;
        self.finish(report)
    }

    /// Reconstruct in-memory state from on-disk artifacts. Parse failures
    /// are recoverable: the run continues with defaults and records the
    /// message for visibility.
    fn restore(&mut self) {
        match self.store.load_plan(&self.state.task_id) {
            Ok((plan, resume_index)) => {
                if !plan.is_empty() {
                    self.state.plan = plan;
                    self.state.current_step_index = resume_index;
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to load plan checkpoint, continuing fresh");
                self.state.record_error(format!("failed to load plan: {err}"));
            }
        }

        match self.store.load_results(&self.state.task_id) {
            Ok(results) => self.state.search_results = results,
            Err(err) => {
                warn!(error = %err, "failed to load result checkpoint, continuing empty");
                self.state
                    .record_error(format!("failed to load search results: {err}"));
            }
        }
    }

    async fn plan_node(&mut self) -> Result<(), ResearchError> {
        // A resumed plan that already made progress is reused unchanged;
        // resumption stability beats a potentially better plan.
        if !self.state.plan.is_empty() && self.state.current_step_index > 0 {
            info!(
                steps = self.state.plan.len(),
                resume_index = self.state.current_step_index,
                "resuming with existing plan"
            );
            self.persist();
            self.emit(WorkflowPhase::Planning);
            return Ok(());
        }

        info!(topic = %self.state.topic, "generating research plan");
        let messages = vec![
            ChatMessage::system(PLANNING_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Generate a research plan for the topic: {}",
                self.state.topic
            )),
        ];
        let reply = self
            .llm
            .ask(&messages)
            .await
            .map_err(|err| ResearchError::Planning(format!("model error: {err}")))?;

        let plan = parse_plan(&reply.content);
        if plan.is_empty() {
            return Err(ResearchError::Planning(
                "model produced no parseable plan steps".to_string(),
            ));
        }

        info!(steps = plan.len(), "generated research plan");
        self.state.plan = plan;
        self.state.current_step_index = 0;
        self.persist();
        self.emit(WorkflowPhase::Planning);
        Ok(())
    }

    async fn gather_loop(&mut self) {
        let mut consecutive_failures = 0usize;

        while self.state.current_step_index < self.state.plan.len() {
            // Stop without advancing so a resumed run retries this step.
            if self.check_stop(WorkflowPhase::Gathering) {
                return;
            }

            let index = self.state.current_step_index;
            if self.state.plan[index].status == StepStatus::Completed {
                debug!(step = self.state.plan[index].step, "step already completed, skipping");
                self.state.current_step_index = index + 1;
                continue;
            }

            let completed = self.execute_step(index).await;
            self.state.current_step_index = index + 1;

            if completed {
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
                if self.config.max_consecutive_failures > 0
                    && consecutive_failures >= self.config.max_consecutive_failures
                {
                    error!(
                        failures = consecutive_failures,
                        "failure threshold exceeded, aborting run"
                    );
                    self.state.record_error(format!(
                        "aborted after {consecutive_failures} consecutive step failures"
                    ));
                    self.cancel.cancel();
                    self.emit(WorkflowPhase::Aborted);
                    return;
                }
            }
        }
    }

    /// Run one plan step, containing every failure inside it. The step ends
    /// up Completed or Failed, the checkpoint is written either way, and a
    /// snapshot is emitted. Returns whether the step completed.
    async fn execute_step(&mut self, index: usize) -> bool {
        let step_number = self.state.plan[index].step;
        info!(step = step_number, task = %self.state.plan[index].task, "executing plan step");

        let completed = match self.try_execute_step(index).await {
            Ok(done) => done,
            Err(err) => {
                error!(step = step_number, error = %err, "unhandled error in step body");
                self.state
                    .record_error(format!("step {step_number} failed: {err}"));
                let step = &mut self.state.plan[index];
                step.status = StepStatus::Failed;
                step.result_summary = Some(err.to_string());
                false
            }
        };

        self.persist();
        self.emit(WorkflowPhase::Gathering);
        completed
    }

    async fn try_execute_step(&mut self, index: usize) -> anyhow::Result<bool> {
        let task_text = self.state.plan[index].task.clone();
        let step_number = self.state.plan[index].step;

        if self.state.conversation.is_empty() {
            self.state.conversation.push(ChatMessage::system(format!(
                "{GATHERING_SYSTEM_PROMPT}\n\nAvailable tools:\n{}",
                self.tools.describe()
            )));
        }
        self.state.conversation.push(ChatMessage::user(format!(
            "Research task (step {step_number}): {task_text}"
        )));

        let reply = self.llm.ask(&self.state.conversation).await?;

        if reply.tool_calls.is_empty() {
            warn!(step = step_number, "model did not call any tool");
            self.state
                .conversation
                .push(ChatMessage::assistant(reply.content));
            let step = &mut self.state.plan[index];
            step.status = StepStatus::Failed;
            step.result_summary = Some("model did not use a tool as expected".to_string());
            self.state
                .record_error(format!("model called no tool for step {step_number}"));
            return Ok(false);
        }

        let called: Vec<String> = reply.tool_calls.iter().map(|c| c.name.clone()).collect();
        self.state.conversation.push(ChatMessage::assistant(format!(
            "[requested tools: {}]",
            called.join(", ")
        )));

        let results = tools::dispatch(&reply.tool_calls, &self.tools, &self.cancel).await;

        let mut queries = Vec::new();
        let mut search_completed = false;
        let mut errors = Vec::new();

        for result in &results {
            match result.status {
                ToolCallStatus::Completed => {
                    let is_search = self
                        .tools
                        .get(&result.call.name)
                        .map(|tool| tool.kind() == ToolKind::Search)
                        .unwrap_or(false)
                        && result.call.name == self.config.search_tool_name;

                    if is_search {
                        search_completed = true;
                        if let Some(payload) = &result.payload {
                            let outcomes: Vec<SearchResultEntry> =
                                serde_json::from_value(payload.clone())?;
                            queries.extend(outcomes.iter().map(|o| o.query.clone()));
                            self.state.search_results.extend(outcomes);
                        }
                    } else {
                        // Non-search payloads land in the transcript only;
                        // they do not count as research findings.
                        debug!(tool = %result.call.name, "non-search tool result");
                    }
                    self.state.conversation.push(ChatMessage::tool(format!(
                        "{}: {}",
                        result.call.name,
                        result
                            .payload
                            .as_ref()
                            .map(|p| p.to_string())
                            .unwrap_or_default()
                    )));
                }
                ToolCallStatus::Failed => {
                    let message = result.error.clone().unwrap_or_else(|| "unknown".into());
                    self.state
                        .conversation
                        .push(ChatMessage::tool(format!("error: {message}")));
                    errors.push(message);
                }
                ToolCallStatus::Cancelled => {
                    self.state
                        .conversation
                        .push(ChatMessage::tool(format!("{}: cancelled", result.call.name)));
                }
            }
        }

        let step = &mut self.state.plan[index];
        if !queries.is_empty() {
            step.queries = Some(queries);
        }

        // A step counts as research only when the designated search tool ran
        // cleanly and nothing else errored.
        if search_completed && errors.is_empty() {
            info!(step = step_number, tools = ?called, "step completed");
            step.status = StepStatus::Completed;
            step.result_summary = Some(format!("executed tool(s): {}", called.join(", ")));
            Ok(true)
        } else {
            warn!(step = step_number, errors = errors.len(), "step failed");
            step.status = StepStatus::Failed;
            step.result_summary = Some(if errors.is_empty() {
                "search tool was not used".to_string()
            } else {
                format!("tool errors: {}", errors.join("; "))
            });
            self.state
                .record_error(format!("step {step_number} did not complete"));
            Ok(false)
        }
    }

    async fn synthesis_node(&mut self) -> Option<String> {
        if self.state.search_results.is_empty() {
            info!("no search results gathered, emitting minimal report");
            let report = report::empty_report(&self.state.topic);
            self.save_report(&report);
            self.emit(WorkflowPhase::Done);
            return Some(report);
        }

        match report::synthesize(
            self.llm.clone(),
            &self.state.topic,
            &self.state.plan,
            &self.state.search_results,
        )
        .await
        {
            Ok(report) => {
                self.save_report(&report);
                self.emit(WorkflowPhase::Done);
                Some(report)
            }
            Err(err) => {
                let err = ResearchError::Synthesis(err.to_string());
                error!(error = %err, "synthesis failed");
                self.state.record_error(err.to_string());
                self.emit(WorkflowPhase::Aborted);
                None
            }
        }
    }

    /// Persist plan and results; failures are recorded, never raised.
    fn persist(&mut self) {
        if let Err(err) = self.store.save_plan(&self.state.task_id, &self.state.plan) {
            warn!(error = %err, "failed to persist plan");
            self.state.record_error(format!("failed to persist plan: {err}"));
        }
        if let Err(err) = self
            .store
            .save_results(&self.state.task_id, &self.state.search_results)
        {
            warn!(error = %err, "failed to persist search results");
            self.state
                .record_error(format!("failed to persist search results: {err}"));
        }
    }

    fn save_report(&self, report: &str) {
        // Best effort: the report has no downstream readers inside the run.
        if let Err(err) = self.store.save_report(&self.state.task_id, report) {
            warn!(error = %err, "failed to persist report");
        }
    }

    fn check_stop(&mut self, phase: WorkflowPhase) -> bool {
        if self.cancel.is_cancelled() {
            info!(?phase, "stop requested, halting run");
            self.emit(WorkflowPhase::Aborted);
            return true;
        }
        false
    }

    fn emit(&self, phase: WorkflowPhase) {
        if let Some(sender) = &self.snapshots {
            let _ = sender.send(self.state.snapshot(phase));
        }
    }

    fn finish(self, report: Option<String>) -> RunOutcome {
        info!(
            task_id = %self.state.task_id,
            produced_report = report.is_some(),
            error = self.state.error_message.as_deref().unwrap_or(""),
            "research run finished"
        );
        RunOutcome {
            report,
            state: self.state,
        }
    }
}

/// Parse a numbered or bulleted task list into pending plan steps. Lines
/// that carry no marker are ignored.
pub fn parse_plan(text: &str) -> Vec<PlanStep> {
    let mut plan = Vec::new();
    for line in text.lines() {
        if let Some(caps) = PLAN_LINE.captures(line) {
            let task = caps[1].trim();
            if !task.is_empty() {
                plan.push(PlanStep::pending(plan.len() as u32 + 1, task));
            }
        }
    }
    plan
}
