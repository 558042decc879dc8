//! The run/test data store.
//!
//! [`DataStore`] is the single source of truth for what has been fetched. A
//! run id is cached iff a fetch for it completed successfully, and cached
//! details are never updated afterwards. Every fetch goes through one
//! in-flight future per run id, so concurrent callers share a single request.

mod batch;
pub mod stats;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::error::StoreError;
use crate::gateway::{Gateway, RunDetails, RunSummary};
use crate::logs::{self, LogEntry};
use crate::notify::{ListenerBus, ListenerId};
use crate::pool::WorkerPool;
use crate::prefetch::{self, PrefetchPolicy};
use crate::scheduler::{Priority, Scheduler, SchedulerSnapshot, Task, TaskPayload, TaskStep};

pub use stats::{TestOccurrence, TestStats};

pub type FetchResult<T> = Result<T, StoreError>;
type SharedFetch<T> = Shared<BoxFuture<'static, FetchResult<T>>>;
type DetailsSender = oneshot::Sender<FetchResult<Arc<RunDetails>>>;

/// Batch progress: `completed` counts settled fetches, successful or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

pub type ProgressFn = Arc<dyn Fn(Progress) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Simultaneous requests within one batch window
    pub concurrency: usize,
    /// Background prefetch after the first run list load; `None` disables it
    pub prefetch: Option<PrefetchPolicy>,
    pub fetch_pr_titles: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            prefetch: Some(PrefetchPolicy::default()),
            fetch_pr_titles: true,
        }
    }
}

impl StoreSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.prefetch.concurrency,
            prefetch: config
                .prefetch
                .enabled
                .then(|| config.prefetch_policy()),
            fetch_pr_titles: config.fetch_pr_titles,
        }
    }
}

#[derive(Default)]
struct CacheState {
    runs: Option<Arc<Vec<RunSummary>>>,
    runs_inflight: Option<SharedFetch<Arc<Vec<RunSummary>>>>,
    details: HashMap<String, Arc<RunDetails>>,
    inflight: HashMap<String, SharedFetch<Arc<RunDetails>>>,
    /// `None` values are titles known to be unavailable
    pr_titles: HashMap<u64, Option<String>>,
    prefetched: bool,
}

struct Inner {
    gateway: Arc<dyn Gateway>,
    settings: StoreSettings,
    state: Mutex<CacheState>,
    scheduler: Scheduler,
    listeners: ListenerBus,
}

/// How a caller gets hold of a run's details.
enum Claim {
    Cached(Arc<RunDetails>),
    /// Someone else is fetching; await their result
    InFlight(SharedFetch<Arc<RunDetails>>),
    /// The caller owns the fetch and must complete it through `sender`
    Owned {
        fetch: SharedFetch<Arc<RunDetails>>,
        sender: DetailsSender,
    },
}

/// Handle to one application's cache. Clones share the same state.
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<Inner>,
}

impl DataStore {
    pub fn new(gateway: Arc<dyn Gateway>, settings: StoreSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                gateway,
                settings,
                state: Mutex::new(CacheState::default()),
                scheduler: Scheduler::new(),
                listeners: ListenerBus::new(),
            }),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.inner.settings
    }

    // ---- run list ----

    /// The full run list, newest first. The first call fetches it; concurrent
    /// callers during that fetch share the same request.
    pub async fn get_all_runs(&self) -> FetchResult<Arc<Vec<RunSummary>>> {
        let fetch = {
            let mut state = self.lock();
            if let Some(runs) = &state.runs {
                return Ok(Arc::clone(runs));
            }
            self.runs_fetch(&mut state)
        };
        fetch.await
    }

    /// Refetch the run list and replace the whole collection.
    pub async fn refresh_runs(&self) -> FetchResult<Arc<Vec<RunSummary>>> {
        let fetch = {
            let mut state = self.lock();
            self.runs_fetch(&mut state)
        };
        fetch.await
    }

    pub fn cached_runs(&self) -> Option<Arc<Vec<RunSummary>>> {
        self.lock().runs.clone()
    }

    fn runs_fetch(&self, state: &mut CacheState) -> SharedFetch<Arc<Vec<RunSummary>>> {
        if let Some(fetch) = &state.runs_inflight {
            return fetch.clone();
        }
        let store = self.clone();
        let fetch = async move { store.load_runs().await }.boxed().shared();
        state.runs_inflight = Some(fetch.clone());
        fetch
    }

    async fn load_runs(&self) -> FetchResult<Arc<Vec<RunSummary>>> {
        let mut runs = match self.inner.gateway.list_runs().await {
            Ok(runs) => runs,
            Err(e) => {
                self.lock().runs_inflight = None;
                warn!(error = %e, "Failed to load run list");
                return Err(e.into());
            }
        };

        if self.inner.settings.fetch_pr_titles {
            self.attach_pr_titles(&mut runs).await;
        }
        runs.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
        let runs = Arc::new(runs);

        let first_load = {
            let mut state = self.lock();
            state.runs_inflight = None;
            state.runs = Some(Arc::clone(&runs));
            !std::mem::replace(&mut state.prefetched, true)
        };
        info!(count = runs.len(), "Loaded run list");
        self.inner.listeners.notify();

        if first_load {
            if let Some(policy) = &self.inner.settings.prefetch {
                self.prefetch(&runs, policy);
            }
        }
        Ok(runs)
    }

    async fn attach_pr_titles(&self, runs: &mut [RunSummary]) {
        let prs: HashSet<u64> = runs.iter().filter_map(|r| r.pr_number).collect();
        if prs.is_empty() {
            return;
        }

        let pool = WorkerPool::new(self.inner.settings.concurrency);
        let titles: HashMap<u64, Option<String>> = pool
            .collect(prs, |pr| {
                let store = self.clone();
                async move { (pr, store.pr_title(pr).await) }
            })
            .await
            .into_iter()
            .collect();

        for run in runs.iter_mut() {
            if let Some(pr) = run.pr_number {
                run.pr_title = titles.get(&pr).cloned().flatten();
            }
        }
    }

    /// Title of a pull request, cached per number. A title reported as
    /// unavailable is cached too; a failed request is not.
    pub async fn pr_title(&self, pr_number: u64) -> Option<String> {
        let cached = self.lock().pr_titles.get(&pr_number).cloned();
        if let Some(title) = cached {
            return title;
        }

        match self.inner.gateway.fetch_pr_title(pr_number).await {
            Ok(title) => {
                self.lock().pr_titles.insert(pr_number, title.clone());
                title
            }
            Err(e) => {
                warn!(pr = pr_number, error = %e, "Failed to fetch pull request title");
                None
            }
        }
    }

    // ---- run details ----

    /// A run's details, fetching them with high priority on a cache miss.
    pub async fn get_run_details(&self, run_id: &str) -> FetchResult<Arc<RunDetails>> {
        let fetch = match self.claim(run_id) {
            Claim::Cached(details) => {
                trace!(%run_id, "Run details cache hit");
                return Ok(details);
            }
            Claim::InFlight(fetch) => fetch,
            Claim::Owned { fetch, sender } => {
                let store = self.clone();
                let id = run_id.to_string();
                let own = fetch.clone();
                self.inner.scheduler.enqueue(Task::new(
                    Priority::High,
                    TaskPayload::Run(id.clone()),
                    move || async move {
                        store.run_fetch(&id, &own, sender).await?;
                        Ok::<_, anyhow::Error>(TaskStep::Done)
                    },
                ));
                fetch
            }
        };
        fetch.await
    }

    /// Cached details only; never triggers a fetch.
    pub fn get_cached_run_details(&self, run_id: &str) -> Option<Arc<RunDetails>> {
        self.lock().details.get(run_id).cloned()
    }

    pub fn has_run_details(&self, run_id: &str) -> bool {
        self.lock().details.contains_key(run_id)
    }

    pub fn cached_run_count(&self) -> usize {
        self.lock().details.len()
    }

    /// Fetch and cache many runs as one low-priority batch, returning the
    /// details of every run that is cached afterwards. Individual failures are
    /// logged and left out of the result. With `load_all`, every run in the
    /// run list is added to `run_ids`.
    ///
    /// `on_progress` is called once per fetched run, whether it succeeded or
    /// not; runs that were already cached are not counted.
    pub async fn fetch_and_cache_run_details(
        &self,
        run_ids: &[String],
        on_progress: Option<ProgressFn>,
        load_all: bool,
    ) -> FetchResult<HashMap<String, Arc<RunDetails>>> {
        let mut seen = HashSet::new();
        let mut ids: Vec<String> = run_ids
            .iter()
            .filter(|id| seen.insert(id.as_str().to_owned()))
            .cloned()
            .collect();

        if load_all {
            let runs = self.get_all_runs().await?;
            ids.extend(
                runs.iter()
                    .filter(|r| seen.insert(r.id.clone()))
                    .map(|r| r.id.clone()),
            );
        }

        let (tx, rx) = oneshot::channel();
        batch::submit(self, ids, on_progress, Some(tx));
        rx.await.map_err(|_| StoreError::BatchCancelled)
    }

    fn prefetch(&self, runs: &[RunSummary], policy: &PrefetchPolicy) {
        let ids: Vec<String> = prefetch::select(runs, policy)
            .into_iter()
            .filter(|id| !self.has_run_details(id))
            .collect();
        if ids.is_empty() {
            return;
        }
        info!(count = ids.len(), "Prefetching runs in the background");
        batch::submit(self, ids, None, None);
    }

    fn claim(&self, run_id: &str) -> Claim {
        let mut state = self.lock();
        if let Some(details) = state.details.get(run_id) {
            return Claim::Cached(Arc::clone(details));
        }
        if let Some(fetch) = state.inflight.get(run_id) {
            // A resolved entry belongs to a dropped task; replace it
            if fetch.clone().now_or_never().is_none() {
                return Claim::InFlight(fetch.clone());
            }
        }

        let (sender, receiver) = oneshot::channel();
        let id = run_id.to_string();
        let fetch = receiver
            .map(move |r| r.unwrap_or_else(|_| Err(StoreError::Cancelled { run_id: id })))
            .boxed()
            .shared();
        state.inflight.insert(run_id.to_string(), fetch.clone());
        Claim::Owned { fetch, sender }
    }

    /// Perform a claimed fetch inside the current task, without going
    /// through the scheduler. Returns `None` when the run is being fetched by
    /// a queued high-priority task, which cannot run until the caller yields.
    async fn fetch_inline(&self, run_id: &str) -> Option<FetchResult<Arc<RunDetails>>> {
        match self.claim(run_id) {
            Claim::Cached(details) => Some(Ok(details)),
            Claim::InFlight(fetch) => {
                if self.inner.scheduler.has_pending_high() {
                    None
                } else {
                    Some(fetch.await)
                }
            }
            Claim::Owned { fetch, sender } => Some(self.run_fetch(run_id, &fetch, sender).await),
        }
    }

    async fn run_fetch(
        &self,
        run_id: &str,
        own: &SharedFetch<Arc<RunDetails>>,
        sender: DetailsSender,
    ) -> FetchResult<Arc<RunDetails>> {
        debug!(%run_id, "Fetching run details");
        let result = self
            .inner
            .gateway
            .list_run_details(run_id)
            .await
            .map(|tests| {
                Arc::new(RunDetails {
                    id: run_id.to_string(),
                    tests,
                })
            })
            .map_err(StoreError::from);

        let result = {
            let mut state = self.lock();
            if state.inflight.get(run_id).is_some_and(|f| f.ptr_eq(own)) {
                state.inflight.remove(run_id);
            }
            // Entries are written once and never replaced
            result.map(|details| {
                Arc::clone(
                    state
                        .details
                        .entry(run_id.to_string())
                        .or_insert(details),
                )
            })
        };

        match &result {
            Ok(details) => {
                debug!(%run_id, tests = details.tests.len(), "Cached run details");
                self.inner.listeners.notify();
            }
            Err(e) => debug!(%run_id, error = %e, "Run details fetch failed"),
        }
        let _ = sender.send(result.clone());
        result
    }

    // ---- derived views ----

    /// Every cached result of one test, newest run first.
    pub fn get_test_results_from_cache(&self, test_name: &str) -> Vec<TestOccurrence> {
        let state = self.lock();
        stats::history(
            test_name,
            state.details.values().map(Arc::as_ref),
            state.runs.as_deref().map(Vec::as_slice),
        )
    }

    /// Pass/fail counts per test name over every cached run.
    pub fn get_test_stats_from_cache(&self) -> BTreeMap<String, TestStats> {
        let state = self.lock();
        stats::aggregate(state.details.values().map(Arc::as_ref))
    }

    /// Download and parse a test's structured log.
    pub async fn fetch_test_log(&self, run_id: &str, test_name: &str) -> FetchResult<Vec<LogEntry>> {
        let details = self.get_run_details(run_id).await?;
        let test = details
            .test(test_name)
            .ok_or_else(|| StoreError::TestNotFound {
                run_id: run_id.to_string(),
                test: test_name.to_string(),
            })?;
        let text = self.inner.gateway.fetch_text(&test.log_path()).await?;
        Ok(logs::parse_log(&text)?)
    }

    // ---- observers ----

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    // ---- maintenance ----

    /// Evict every cached run's details. Manual/debug use only.
    pub fn clear_cache(&self) {
        let evicted = {
            let mut state = self.lock();
            let count = state.details.len();
            state.details.clear();
            count
        };
        info!(evicted, "Cleared run details cache");
        self.inner.listeners.notify();
    }

    /// Emergency stop: drop all queued work. Callers waiting on dropped tasks
    /// get [`StoreError::Cancelled`]. In-flight requests run to completion,
    /// but a running batch stops after its current window and its caller
    /// gets [`StoreError::BatchCancelled`].
    pub fn reset(&self) -> usize {
        self.inner.scheduler.clear()
    }

    pub fn scheduler_snapshot(&self) -> SchedulerSnapshot {
        self.inner.scheduler.snapshot()
    }

    /// Wait until all queued fetch work, including prefetching, has finished.
    pub async fn wait_idle(&self) {
        self.inner.scheduler.wait_idle().await;
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("cached_runs", &self.cached_run_count())
            .field("scheduler", &self.inner.scheduler)
            .finish_non_exhaustive()
    }
}
