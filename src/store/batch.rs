//! Self-resuming background batches.
//!
//! A batch fetches one window of runs at a time through a [`WorkerPool`],
//! then hands the scheduler a continuation for the rest. Between windows the
//! scheduler can run (or park the batch behind) high-priority work.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::{DataStore, Progress, ProgressFn};
use crate::gateway::RunDetails;
use crate::pool::WorkerPool;
use crate::scheduler::{Priority, Task, TaskFuture, TaskPayload, TaskStep};

type BatchResults = HashMap<String, Arc<RunDetails>>;

struct Batch {
    store: DataStore,
    pending: VecDeque<String>,
    results: BatchResults,
    completed: usize,
    total: usize,
    on_progress: Option<ProgressFn>,
    done: Option<oneshot::Sender<BatchResults>>,
}

/// Queue a low-priority batch for `run_ids`. Runs already cached go straight
/// into the results and are not counted as progress.
pub(super) fn submit(
    store: &DataStore,
    run_ids: Vec<String>,
    on_progress: Option<ProgressFn>,
    done: Option<oneshot::Sender<BatchResults>>,
) {
    let mut results = HashMap::new();
    let mut pending = VecDeque::new();
    for id in run_ids {
        match store.get_cached_run_details(&id) {
            Some(details) => {
                results.insert(id, details);
            }
            None => pending.push_back(id),
        }
    }

    if pending.is_empty() {
        if let Some(done) = done {
            let _ = done.send(results);
        }
        return;
    }

    let batch = Batch {
        store: store.clone(),
        total: pending.len(),
        pending,
        results,
        completed: 0,
        on_progress,
        done,
    };
    let payload = batch.payload();
    store
        .inner
        .scheduler
        .enqueue(Task::new(Priority::Low, payload, move || batch.into_work()));
}

impl Batch {
    fn payload(&self) -> TaskPayload {
        TaskPayload::Batch(self.pending.iter().cloned().collect())
    }

    fn into_work(self) -> TaskFuture {
        Box::pin(self.run_window())
    }

    async fn run_window(mut self) -> anyhow::Result<TaskStep> {
        let pool = WorkerPool::new(self.store.inner.settings.concurrency);
        let take = pool.limit().min(self.pending.len());
        let window: Vec<String> = self.pending.drain(..take).collect();

        let store = self.store.clone();
        let mut deferred = Vec::new();
        pool.run(
            window,
            |run_id| {
                let store = store.clone();
                async move {
                    let outcome = store.fetch_inline(&run_id).await;
                    (run_id, outcome)
                }
            },
            |(run_id, outcome)| {
                let Some(result) = outcome else {
                    deferred.push(run_id);
                    return;
                };
                self.completed += 1;
                match result {
                    Ok(details) => {
                        self.results.insert(run_id, details);
                    }
                    Err(e) => warn!(%run_id, error = %e, "Background fetch failed"),
                }
                if let Some(on_progress) = &self.on_progress {
                    on_progress(Progress {
                        completed: self.completed,
                        total: self.total,
                    });
                }
            },
        )
        .await;

        if !deferred.is_empty() {
            debug!(count = deferred.len(), "Deferring runs fetched by high-priority tasks");
            self.pending.extend(deferred);
        }

        if self.pending.is_empty() {
            debug!(fetched = self.results.len(), total = self.total, "Batch finished");
            if let Some(done) = self.done.take() {
                let _ = done.send(std::mem::take(&mut self.results));
            }
            return Ok(TaskStep::Done);
        }

        Ok(TaskStep::continue_with(self.payload(), move || {
            self.into_work()
        }))
    }
}
