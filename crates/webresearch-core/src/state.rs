//! In-memory state for a single research run.
//!
//! `WorkflowState` is owned exclusively by the engine for the duration of one
//! run and mutated only between node executions; every mutation is followed
//! by a checkpoint write so the on-disk artifacts never lag the state by more
//! than one step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a single plan step. Transitions only
/// `Pending -> {Completed, Failed}`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

/// One unit of research work with a stable 1-based step number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: u32,
    pub task: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

impl PlanStep {
    pub fn pending(step: u32, task: impl Into<String>) -> Self {
        Self {
            step,
            task: task.into(),
            status: StepStatus::Pending,
            queries: None,
            result_summary: None,
        }
    }
}

/// Terminal status of one search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Outcome of one search query, immutable once appended to the run's results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultEntry {
    pub query: String,
    pub status: SearchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResultEntry {
    pub fn completed(query: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            query: query.into(),
            status: SearchStatus::Completed,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failed(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            status: SearchStatus::Failed,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            status: SearchStatus::Cancelled,
            payload: None,
            error: None,
        }
    }
}

/// Role of a conversation message exchanged with the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One message in the run's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
        }
    }
}

/// Phase of the workflow state machine, reported in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Planning,
    Gathering,
    Synthesizing,
    Done,
    Aborted,
}

/// Mutable state of one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub task_id: String,
    pub topic: String,
    pub plan: Vec<PlanStep>,
    pub search_results: Vec<SearchResultEntry>,
    /// Cursor into `plan`; always within `0..=plan.len()`.
    pub current_step_index: usize,
    /// Last error observed; overwritten on each new failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub conversation: Vec<ChatMessage>,
}

impl WorkflowState {
    pub fn new(task_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            topic: topic.into(),
            plan: Vec::new(),
            search_results: Vec::new(),
            current_step_index: 0,
            error_message: None,
            conversation: Vec::new(),
        }
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    /// Snapshot of the state suitable for streaming to observers.
    pub fn snapshot(&self, phase: WorkflowPhase) -> StateSnapshot {
        StateSnapshot {
            task_id: self.task_id.clone(),
            phase,
            plan: self.plan.clone(),
            results_len: self.search_results.len(),
            current_step_index: self.current_step_index,
            error_message: self.error_message.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time view of a run, emitted after every persisted mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub task_id: String,
    pub phase: WorkflowPhase,
    pub plan: Vec<PlanStep>,
    pub results_len: usize,
    pub current_step_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}
