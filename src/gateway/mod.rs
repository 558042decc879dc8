//! Remote data gateway: the blob-listing and pull-request APIs the store
//! fetches from, and the data model they produce.

pub mod blob;
pub mod listing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

pub use blob::BlobClient;

/// One CI run, as listed under `runs/` in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub creation_time: DateTime<Utc>,
    pub branch: String,
    pub passed: u32,
    pub failed: u32,
    pub pr_number: Option<u64>,
    pub pr_title: Option<String>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    Unknown,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::Unknown => "unknown",
        })
    }
}

/// One test execution within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// `<arch>/<test-path>`
    pub name: String,
    pub status: TestStatus,
    /// Storage path of the test's result folder, relative to the container.
    pub path: String,
}

impl TestResult {
    pub fn architecture(&self) -> &str {
        self.name.split('/').next().unwrap_or_default()
    }

    /// Path of the structured log inside the result folder.
    pub fn log_path(&self) -> String {
        format!("{}/{}", self.path, listing::LOG_FILE)
    }
}

/// A run's complete, final test result set. This is the cache's value type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDetails {
    pub id: String,
    pub tests: Vec<TestResult>,
}

impl RunDetails {
    pub fn test(&self, name: &str) -> Option<&TestResult> {
        self.tests.iter().find(|t| t.name == name)
    }
}

/// The remote collaborators the store depends on. Implementations do no caching.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// List every run in the container, following continuation markers.
    async fn list_runs(&self) -> Result<Vec<RunSummary>, GatewayError>;

    /// List the completed test results of one run.
    ///
    /// Fails with [`GatewayError::NotFound`] when nothing is stored under the run.
    async fn list_run_details(&self, run_id: &str) -> Result<Vec<TestResult>, GatewayError>;

    /// Title of a pull request. `Ok(None)` means the title is unavailable
    /// (rate limited) and should not be requested again.
    async fn fetch_pr_title(&self, pr_number: u64) -> Result<Option<String>, GatewayError>;

    /// Download a blob as text.
    async fn fetch_text(&self, path: &str) -> Result<String, GatewayError>;
}
