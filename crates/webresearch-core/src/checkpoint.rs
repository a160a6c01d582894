//! Durable checkpoint artifacts for resumable runs.
//!
//! Each run owns one directory under the store root, keyed by task id, with
//! three artifacts: a markdown plan checklist, a JSON array of search
//! results, and the final report. The persisted plan's step order and status
//! marks are the only source of truth for where a resumed run continues.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ResearchError;
use crate::state::{PlanStep, SearchResultEntry, StepStatus};

pub const PLAN_FILENAME: &str = "research_plan.md";
pub const RESULTS_FILENAME: &str = "search_info.json";
pub const REPORT_FILENAME: &str = "report.md";

const DONE_MARKER: &str = "- [x]";
const PENDING_MARKER: &str = "- [ ]";

/// Reads and writes per-run checkpoint artifacts. All writes are whole-file
/// overwrites staged through a temp file and renamed into place, so a
/// concurrent reader never observes a partial write.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root.join(task_id)
    }

    /// Parse the plan checklist. Missing artifact yields an empty plan and
    /// resume index 0. Lines without a checklist marker are skipped.
    ///
    /// The resume index is the position of the first pending step, or
    /// `plan.len()` when every step is marked done.
    pub fn load_plan(&self, task_id: &str) -> Result<(Vec<PlanStep>, usize), ResearchError> {
        let path = self.task_dir(task_id).join(PLAN_FILENAME);
        if !path.exists() {
            return Ok((Vec::new(), 0));
        }

        let raw = fs::read_to_string(&path)
            .map_err(|err| ResearchError::checkpoint_io(path.clone(), err))?;

        let mut plan = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            let (status, rest) = if let Some(rest) = line.strip_prefix(DONE_MARKER) {
                (StepStatus::Completed, rest)
            } else if let Some(rest) = line.strip_prefix(PENDING_MARKER) {
                (StepStatus::Pending, rest)
            } else {
                continue;
            };
            let task = rest.trim();
            if task.is_empty() {
                continue;
            }
            let mut step = PlanStep::pending(plan.len() as u32 + 1, task);
            step.status = status;
            plan.push(step);
        }

        let resume_index = plan
            .iter()
            .position(|step| step.status == StepStatus::Pending)
            .unwrap_or(plan.len());

        info!(
            task_id,
            steps = plan.len(),
            resume_index,
            "loaded research plan from checkpoint"
        );
        Ok((plan, resume_index))
    }

    /// Parse the search-results artifact. Missing file yields an empty list;
    /// malformed JSON is a recoverable error the caller records and survives.
    pub fn load_results(&self, task_id: &str) -> Result<Vec<SearchResultEntry>, ResearchError> {
        let path = self.task_dir(task_id).join(RESULTS_FILENAME);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&path)
            .map_err(|err| ResearchError::checkpoint_io(path.clone(), err))?;
        let results: Vec<SearchResultEntry> = serde_json::from_str(&raw)
            .map_err(|err| ResearchError::malformed(path.clone(), err.to_string()))?;

        info!(task_id, entries = results.len(), "loaded search results from checkpoint");
        Ok(results)
    }

    /// Overwrite the plan checklist. Idempotent: saving the same plan twice
    /// produces byte-identical artifacts.
    pub fn save_plan(&self, task_id: &str, plan: &[PlanStep]) -> Result<(), ResearchError> {
        let mut contents = String::from("# Research Plan\n\n");
        for step in plan {
            let marker = match step.status {
                StepStatus::Completed => DONE_MARKER,
                // Failed steps persist as pending so a resumed run retries
                // them; only completion is durable.
                StepStatus::Pending | StepStatus::Failed => PENDING_MARKER,
            };
            contents.push_str(marker);
            contents.push(' ');
            contents.push_str(&step.task);
            contents.push('\n');
        }

        let path = self.task_dir(task_id).join(PLAN_FILENAME);
        self.write_atomic(&path, contents.as_bytes())?;
        debug!(task_id, steps = plan.len(), "saved research plan");
        Ok(())
    }

    /// Overwrite the full result list (whole-list semantics, not append).
    pub fn save_results(
        &self,
        task_id: &str,
        results: &[SearchResultEntry],
    ) -> Result<(), ResearchError> {
        let payload = serde_json::to_vec_pretty(results)
            .map_err(|err| ResearchError::Other(err.into()))?;
        let path = self.task_dir(task_id).join(RESULTS_FILENAME);
        self.write_atomic(&path, &payload)?;
        debug!(task_id, entries = results.len(), "saved search results");
        Ok(())
    }

    /// Persist the final report. Callers treat failures as non-fatal: the
    /// report is a terminal artifact with no downstream readers here.
    pub fn save_report(&self, task_id: &str, report: &str) -> Result<(), ResearchError> {
        let path = self.task_dir(task_id).join(REPORT_FILENAME);
        self.write_atomic(&path, report.as_bytes())?;
        info!(task_id, bytes = report.len(), "saved final report");
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), ResearchError> {
        let parent = path
            .parent()
            .ok_or_else(|| ResearchError::malformed(path.to_path_buf(), "no parent directory"))?;
        fs::create_dir_all(parent)
            .map_err(|err| ResearchError::checkpoint_io(parent.to_path_buf(), err))?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, bytes).map_err(|err| ResearchError::checkpoint_io(tmp.clone(), err))?;
        fs::rename(&tmp, path)
            .map_err(|err| ResearchError::checkpoint_io(path.to_path_buf(), err))?;
        Ok(())
    }
}
