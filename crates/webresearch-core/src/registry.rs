//! Lookup-and-stop surface for active runs.
//!
//! Replaces the module-global stop-flag maps of older designs with an
//! explicit object the process creates and injects: each active task id maps
//! to its cancel signal, and the entry disappears when the run future
//! finishes, which is what makes `stop` a clean no-op afterwards.

use std::path::Path;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::checkpoint::CheckpointStore;
use crate::engine::{EngineConfig, RunOutcome, WorkflowEngine};
use crate::error::ResearchError;
use crate::llm::LanguageModel;
use crate::state::{StateSnapshot, WorkflowState};
use crate::tools::ToolSet;

/// Builds the tool set for a run, given the run's checkpoint directory
/// (file tools are rooted there).
pub type ToolSetBuilder = dyn Fn(&Path) -> ToolSet + Send + Sync;

/// Handle to a started run: its id, the snapshot stream, and the join
/// handle resolving to the final outcome.
pub struct StartedRun {
    pub task_id: String,
    pub snapshots: UnboundedReceiver<StateSnapshot>,
    pub outcome: JoinHandle<RunOutcome>,
}

/// Tracks active runs by task id.
pub struct RunRegistry {
    store: CheckpointStore,
    llm: Arc<dyn LanguageModel>,
    build_tools: Arc<ToolSetBuilder>,
    config: EngineConfig,
    active: Arc<DashMap<String, CancelSignal>>,
}

impl RunRegistry {
    pub fn new(
        store: CheckpointStore,
        llm: Arc<dyn LanguageModel>,
        build_tools: Arc<ToolSetBuilder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            llm,
            build_tools,
            config,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Start a run for `topic`. Passing `resume_task_id` continues from that
    /// task's checkpoint; otherwise a fresh task id is minted.
    pub fn start(
        &self,
        topic: &str,
        resume_task_id: Option<&str>,
    ) -> Result<StartedRun, ResearchError> {
        let task_id = resume_task_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let cancel = CancelSignal::new();

        // One engine per task id at a time; concurrent engines on the same
        // checkpoint directory would corrupt the resumption invariant. The
        // id is claimed atomically before any run setup, so two concurrent
        // starts cannot both pass the guard.
        match self.active.entry(task_id.clone()) {
            Entry::Occupied(_) => return Err(ResearchError::AlreadyRunning(task_id)),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }

        let (snapshot_tx, snapshot_rx) = mpsc::unbounded_channel();
        let tools = (self.build_tools)(&self.store.task_dir(&task_id));
        let engine = WorkflowEngine::new(
            WorkflowState::new(task_id.clone(), topic),
            self.store.clone(),
            self.llm.clone(),
            tools,
            cancel.clone(),
            self.config.clone(),
        )
        .with_snapshots(snapshot_tx);

        info!(task_id = %task_id, topic, "registered research run");

        let active = self.active.clone();
        let run_id = task_id.clone();
        let outcome = tokio::spawn(async move {
            let outcome = engine.run().await;
            active.remove(&run_id);
            debug!(task_id = %run_id, "run deregistered");
            outcome
        });

        Ok(StartedRun {
            task_id,
            snapshots: snapshot_rx,
            outcome,
        })
    }

    /// Request a stop. Returns whether a live run was signalled; calling it
    /// for a finished or unknown task is a no-op.
    pub fn stop(&self, task_id: &str) -> bool {
        match self.active.get(task_id) {
            Some(entry) => {
                info!(task_id, "stop requested");
                entry.value().cancel();
                true
            }
            None => {
                debug!(task_id, "stop for inactive task ignored");
                false
            }
        }
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id)
    }
}
