//! Resumable deep-research workflow engine.
//!
//! Given a topic, the engine asks a language model for a step-by-step plan,
//! executes each step by fanning search queries out to a bounded pool of
//! browser workers, and synthesizes a cited report from the findings. Every
//! state mutation is checkpointed to disk, so an interrupted run continues
//! from its last completed step, and a shared [`CancelSignal`] stops a run
//! cooperatively at well-defined points.
//!
//! Browser automation and the model wire protocol stay behind the
//! [`SearchWorker`] and [`LanguageModel`] traits; this crate only sequences
//! and persists the work.

mod cancel;
mod checkpoint;
mod engine;
mod error;
mod llm;
mod pool;
mod registry;
mod report;
mod state;
mod telemetry;
mod tools;

pub use cancel::CancelSignal;
pub use checkpoint::{
    CheckpointStore, PLAN_FILENAME, REPORT_FILENAME, RESULTS_FILENAME,
};
pub use engine::{parse_plan, EngineConfig, RunOutcome, WorkflowEngine};
pub use error::ResearchError;
pub use llm::{LanguageModel, LlmReply, ToolCallRequest};
pub use pool::{SearchWorker, TaskPool};
pub use registry::{RunRegistry, StartedRun, ToolSetBuilder};
pub use report::{build_findings, build_plan_summary, empty_report, synthesize};
pub use state::{
    ChatMessage, MessageRole, PlanStep, SearchResultEntry, SearchStatus, StateSnapshot,
    StepStatus, WorkflowPhase, WorkflowState,
};
pub use telemetry::init_telemetry;
pub use tools::{
    dispatch, ListDirTool, ReadFileTool, Tool, ToolCallResult, ToolCallStatus, ToolKind,
    ToolSet, WebSearchTool, WriteFileTool, WEB_SEARCH_TOOL_NAME,
};
