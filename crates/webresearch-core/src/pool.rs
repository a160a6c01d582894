//! Bounded fan-out of search queries across concurrent workers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::state::SearchResultEntry;

/// Opaque browser-automation capability executing a single search query.
#[async_trait]
pub trait SearchWorker: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<serde_json::Value>;
}

/// Runs a batch of queries with at most `limit` workers in flight. The pool
/// itself never fails; every query gets exactly one outcome, in input
/// order, regardless of completion order.
#[derive(Debug, Clone)]
pub struct TaskPool {
    limit: usize,
}

impl TaskPool {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Execute all queries. Cancellation is late-binding: it is re-checked
    /// once a permit is held, immediately before the worker is invoked, so
    /// queries already dispatched run to completion while queued ones are
    /// marked `Cancelled` without ever touching the worker. One query's
    /// failure never affects its siblings.
    pub async fn run(
        &self,
        queries: &[String],
        cancel: &CancelSignal,
        worker: Arc<dyn SearchWorker>,
    ) -> Vec<SearchResultEntry> {
        info!(count = queries.len(), limit = self.limit, "dispatching search queries");

        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut handles = Vec::with_capacity(queries.len());

        for query in queries {
            let query = query.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let worker = worker.clone();

            handles.push(tokio::spawn(async move {
                // Closing the semaphore is not part of this pool's contract,
                // so acquisition only fails if the pool itself is dropped.
                let Ok(_permit) = semaphore.acquire().await else {
                    return SearchResultEntry::cancelled(query);
                };

                if cancel.is_cancelled() {
                    debug!(%query, "skipping query, stop already signalled");
                    return SearchResultEntry::cancelled(query);
                }

                match worker.search(&query).await {
                    Ok(payload) => {
                        debug!(%query, "search completed");
                        SearchResultEntry::completed(query, payload)
                    }
                    Err(err) => {
                        warn!(%query, error = %err, "search failed");
                        SearchResultEntry::failed(query, err.to_string())
                    }
                }
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (handle, query) in handles.into_iter().zip(queries) {
            match handle.await {
                Ok(entry) => outcomes.push(entry),
                Err(err) => {
                    warn!(%query, error = %err, "search task panicked");
                    outcomes.push(SearchResultEntry::failed(query.clone(), err.to_string()));
                }
            }
        }

        outcomes
    }
}
