//! Shared test helpers: an in-memory gateway with call counters, injectable
//! failures and gates for holding fetches in flight.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use petri_viewer::error::GatewayError;
use petri_viewer::gateway::{Gateway, RunSummary, TestResult, TestStatus};
use petri_viewer::store::{DataStore, StoreSettings};

#[derive(Default)]
pub struct MockGateway {
    runs: Mutex<Vec<RunSummary>>,
    details: Mutex<HashMap<String, Vec<TestResult>>>,
    failures: Mutex<HashMap<String, GatewayError>>,
    fail_once: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    texts: Mutex<HashMap<String, String>>,
    pr_titles: Mutex<HashMap<u64, Option<String>>>,
    detail_calls: Mutex<HashMap<String, usize>>,
    call_order: Mutex<Vec<String>>,
    list_calls: AtomicUsize,
    pr_calls: AtomicUsize,
    list_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs "1".."n"; higher ids are newer. Every run has two tests.
    pub fn with_runs(n: u32) -> Self {
        let mock = Self::new();
        for i in 1..=n {
            mock.add_run(summary(&i.to_string(), i, "feature", 0));
        }
        mock
    }

    pub fn add_run(&self, run: RunSummary) {
        self.details
            .lock()
            .unwrap()
            .insert(run.id.clone(), default_tests(&run.id));
        self.runs.lock().unwrap().push(run);
    }

    pub fn set_tests(&self, run_id: &str, tests: Vec<TestResult>) {
        self.details
            .lock()
            .unwrap()
            .insert(run_id.to_string(), tests);
    }

    /// Every fetch of `run_id` fails with `error` until `clear_failure`.
    pub fn fail(&self, run_id: &str, error: GatewayError) {
        self.failures
            .lock()
            .unwrap()
            .insert(run_id.to_string(), error);
    }

    pub fn clear_failure(&self, run_id: &str) {
        self.failures.lock().unwrap().remove(run_id);
    }

    /// The next fetch of `run_id` fails with a transport error.
    pub fn fail_once(&self, run_id: &str) {
        self.fail_once.lock().unwrap().insert(run_id.to_string());
    }

    /// Hold fetches of `run_id` until the returned gate is notified.
    pub fn gate(&self, run_id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(run_id.to_string(), Arc::clone(&gate));
        gate
    }

    /// Hold run list requests until the returned gate is notified.
    pub fn gate_list(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn set_text(&self, path: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(path.to_string(), text.to_string());
    }

    pub fn set_pr_title(&self, pr: u64, title: Option<&str>) {
        self.pr_titles
            .lock()
            .unwrap()
            .insert(pr, title.map(str::to_string));
    }

    pub fn detail_calls(&self, run_id: &str) -> usize {
        self.detail_calls
            .lock()
            .unwrap()
            .get(run_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_detail_calls(&self) -> usize {
        self.detail_calls.lock().unwrap().values().sum()
    }

    /// Run ids in the order their fetches started.
    pub fn call_order(&self) -> Vec<String> {
        self.call_order.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn pr_calls(&self) -> usize {
        self.pr_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn list_runs(&self) -> Result<Vec<RunSummary>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.list_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.runs.lock().unwrap().clone())
    }

    async fn list_run_details(&self, run_id: &str) -> Result<Vec<TestResult>, GatewayError> {
        *self
            .detail_calls
            .lock()
            .unwrap()
            .entry(run_id.to_string())
            .or_default() += 1;
        self.call_order.lock().unwrap().push(run_id.to_string());

        let gate = self.gates.lock().unwrap().get(run_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail_once.lock().unwrap().remove(run_id) {
            return Err(GatewayError::Transport {
                url: format!("mock://{run_id}"),
                message: "connection reset".to_string(),
            });
        }
        if let Some(error) = self.failures.lock().unwrap().get(run_id) {
            return Err(error.clone());
        }
        self.details
            .lock()
            .unwrap()
            .get(run_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn fetch_pr_title(&self, pr_number: u64) -> Result<Option<String>, GatewayError> {
        self.pr_calls.fetch_add(1, Ordering::SeqCst);
        self.pr_titles
            .lock()
            .unwrap()
            .get(&pr_number)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                url: format!("mock://pulls/{pr_number}"),
                status: 500,
            })
    }

    async fn fetch_text(&self, path: &str) -> Result<String, GatewayError> {
        self.texts
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                url: format!("mock://{path}"),
                status: 404,
            })
    }
}

/// A run created `age_rank` hours after a fixed epoch; higher is newer.
pub fn summary(id: &str, age_rank: u32, branch: &str, failed: u32) -> RunSummary {
    RunSummary {
        id: id.to_string(),
        creation_time: created_at(age_rank),
        branch: branch.to_string(),
        passed: 10,
        failed,
        pr_number: None,
        pr_title: None,
    }
}

pub fn created_at(age_rank: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(i64::from(age_rank))
}

pub fn test_result(run_id: &str, name: &str, status: TestStatus) -> TestResult {
    TestResult {
        name: name.to_string(),
        status,
        path: format!("{run_id}/{name}"),
    }
}

pub fn default_tests(run_id: &str) -> Vec<TestResult> {
    vec![
        test_result(run_id, "x86_64/boot_linux", TestStatus::Passed),
        test_result(run_id, "aarch64/boot_linux", TestStatus::Passed),
    ]
}

/// A store with prefetching off, so tests control every fetch.
pub fn store_with(mock: &Arc<MockGateway>, concurrency: usize) -> DataStore {
    let settings = StoreSettings {
        concurrency,
        prefetch: None,
        fetch_pr_titles: false,
    };
    DataStore::new(Arc::clone(mock) as Arc<dyn Gateway>, settings)
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
