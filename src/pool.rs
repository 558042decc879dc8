//! Bounded-concurrency worker pool.
//!
//! At most `limit` jobs are in flight at once; as each settles the next item
//! is started, so the request rate stays capped instead of bursting.

use std::future::Future;

use futures::stream::{self, StreamExt};

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    limit: usize,
}

impl WorkerPool {
    /// A limit of zero is treated as one.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `job` over every item, calling `on_settled` with each output in
    /// completion order. Returns once every job has settled.
    pub async fn run<I, T, F, Fut, O>(&self, items: I, job: F, mut on_settled: impl FnMut(O))
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = O>,
    {
        let mut settled = stream::iter(items).map(job).buffer_unordered(self.limit);
        while let Some(output) = settled.next().await {
            on_settled(output);
        }
    }

    /// Like [`WorkerPool::run`], collecting the outputs in completion order.
    pub async fn collect<I, T, F, Fut, O>(&self, items: I, job: F) -> Vec<O>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = O>,
    {
        let mut outputs = Vec::new();
        self.run(items, job, |o| outputs.push(o)).await;
        outputs
    }
}
