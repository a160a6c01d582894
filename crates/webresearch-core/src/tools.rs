//! Named tool capabilities and the dispatcher that normalizes their
//! outcomes. The language model requests invocations by name; every request
//! yields exactly one result record, and no call's failure aborts its
//! siblings.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelSignal;
use crate::llm::ToolCallRequest;
use crate::pool::{SearchWorker, TaskPool};

/// Capability family a tool belongs to. Dispatch is by name; the kind is a
/// tag for callers that treat search results specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Search,
    File,
    /// Externally constructed protocol tools (MCP-style servers).
    Protocol,
}

/// A named capability the language model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn kind(&self) -> ToolKind;
    async fn invoke(&self, args: Value, cancel: &CancelSignal) -> anyhow::Result<Value>;
}

/// Registry of tools available to a run, resolved by name at dispatch time.
#[derive(Default, Clone)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Render the registry as a bulleted inventory for prompt context,
    /// sorted by name so the rendering is deterministic.
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Uniform record of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub call: ToolCallRequest,
    pub status: ToolCallStatus,
    pub payload: Option<Value>,
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn is_error(&self) -> bool {
        self.status == ToolCallStatus::Failed
    }
}

/// Execute every requested call, in request order. Unknown tools and tool
/// errors become per-call `Failed` records; a stop signal already raised
/// before a call short-circuits it to `Cancelled` without invoking the tool.
pub async fn dispatch(
    calls: &[ToolCallRequest],
    tools: &ToolSet,
    cancel: &CancelSignal,
) -> Vec<ToolCallResult> {
    let mut results = Vec::with_capacity(calls.len());

    for call in calls {
        if cancel.is_cancelled() {
            debug!(tool = %call.name, "skipping tool call, stop already signalled");
            results.push(ToolCallResult {
                call: call.clone(),
                status: ToolCallStatus::Cancelled,
                payload: None,
                error: None,
            });
            continue;
        }

        let Some(tool) = tools.get(&call.name) else {
            warn!(tool = %call.name, available = ?tools.names(), "requested tool not found");
            results.push(ToolCallResult {
                call: call.clone(),
                status: ToolCallStatus::Failed,
                payload: None,
                error: Some(format!("tool '{}' not found", call.name)),
            });
            continue;
        };

        info!(tool = %call.name, "invoking tool");
        match tool.invoke(call.arguments.clone(), cancel).await {
            Ok(payload) => results.push(ToolCallResult {
                call: call.clone(),
                status: ToolCallStatus::Completed,
                payload: Some(payload),
                error: None,
            }),
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool invocation failed");
                results.push(ToolCallResult {
                    call: call.clone(),
                    status: ToolCallStatus::Failed,
                    payload: None,
                    error: Some(format!(
                        "tool '{}' failed with args {}: {err}",
                        call.name, call.arguments
                    )),
                });
            }
        }
    }

    results
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    queries: Vec<String>,
}

/// Searches the web by fanning queries out to browser workers through a
/// bounded pool. Its payload is the ordered outcome list, which the engine
/// appends to the run's search results.
pub struct WebSearchTool {
    pool: TaskPool,
    worker: Arc<dyn SearchWorker>,
    max_queries: usize,
    description: String,
}

pub const WEB_SEARCH_TOOL_NAME: &str = "web_search";

impl WebSearchTool {
    pub fn new(pool: TaskPool, worker: Arc<dyn SearchWorker>, max_queries: usize) -> Self {
        let max_queries = max_queries.max(1);
        let description = format!(
            "Search the web for information relevant to the research task. \
             Runs up to {max_queries} distinct queries in parallel with a browser \
             worker per query; provide the most specific queries you can."
        );
        Self {
            pool,
            worker,
            max_queries,
            description,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        WEB_SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Search
    }

    async fn invoke(&self, args: Value, cancel: &CancelSignal) -> anyhow::Result<Value> {
        let mut args: SearchArgs = serde_json::from_value(args)?;
        if args.queries.len() > self.max_queries {
            // The model sometimes ignores the advertised limit; truncation
            // is this caller's policy, the pool stays a pure fan-out.
            debug!(
                requested = args.queries.len(),
                kept = self.max_queries,
                "truncating search queries"
            );
            args.queries.truncate(self.max_queries);
        }

        let outcomes = self.pool.run(&args.queries, cancel, self.worker.clone()).await;
        Ok(serde_json::to_value(outcomes)?)
    }
}

fn resolve_within(root: &Path, relative: &str) -> anyhow::Result<PathBuf> {
    let candidate = Path::new(relative);
    if candidate.is_absolute()
        || candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
    {
        anyhow::bail!("path '{relative}' escapes the run workspace");
    }
    Ok(root.join(candidate))
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

/// Reads a UTF-8 file from the run's workspace directory.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file from the research workspace; takes {\"path\": ...}."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::File
    }

    async fn invoke(&self, args: Value, _cancel: &CancelSignal) -> anyhow::Result<Value> {
        let args: PathArgs = serde_json::from_value(args)?;
        let path = resolve_within(&self.root, &args.path)?;
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Value::String(content))
    }
}

/// Writes a UTF-8 file into the run's workspace directory.
pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write a text file into the research workspace; takes {\"path\": ..., \"content\": ...}."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::File
    }

    async fn invoke(&self, args: Value, _cancel: &CancelSignal) -> anyhow::Result<Value> {
        let args: WriteArgs = serde_json::from_value(args)?;
        let path = resolve_within(&self.root, &args.path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, args.content.as_bytes()).await?;
        Ok(serde_json::json!({ "written": args.path, "bytes": args.content.len() }))
    }
}

/// Lists files under the run's workspace directory, recursively.
pub struct ListDirTool {
    root: PathBuf,
}

impl ListDirTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List files in the research workspace; takes {\"path\": ...} relative to it."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::File
    }

    async fn invoke(&self, args: Value, _cancel: &CancelSignal) -> anyhow::Result<Value> {
        let args: PathArgs = serde_json::from_value(args)?;
        let base = resolve_within(&self.root, &args.path)?;

        let mut entries = Vec::new();
        for entry in WalkDir::new(&base).min_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    entries.push(rel.to_string_lossy().into_owned());
                }
            }
        }
        entries.sort();
        Ok(serde_json::to_value(entries)?)
    }
}
