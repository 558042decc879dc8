//! Data layer for browsing CI test-run artifacts stored in a blob container.
//!
//! [`DataStore`] caches runs and their test results, deduplicates concurrent
//! fetches, and schedules user-triggered work ahead of background prefetching.

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod logs;
pub mod notify;
pub mod pool;
pub mod prefetch;
pub mod scheduler;
pub mod store;

pub use config::Config;
pub use error::{GatewayError, LogParseError, StoreError};
pub use gateway::{BlobClient, Gateway, RunDetails, RunSummary, TestResult, TestStatus};
pub use store::{DataStore, Progress, ProgressFn, StoreSettings, TestOccurrence, TestStats};
