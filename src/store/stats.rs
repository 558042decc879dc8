//! Aggregates derived from cached run details. Never stored; always
//! recomputed from the cache so they match its contents exactly.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::gateway::{RunDetails, RunSummary, TestResult, TestStatus};

/// Pass/fail counts for one test name across cached runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestStats {
    pub passed: u32,
    pub failed: u32,
    pub unknown: u32,
}

impl TestStats {
    pub fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.passed + self.failed + self.unknown
    }

    /// Pass rate as a percentage (0.0 - 100.0) of runs with a verdict
    pub fn pass_rate(&self) -> f64 {
        let decided = self.passed + self.failed;
        if decided == 0 {
            0.0
        } else {
            f64::from(self.passed) / f64::from(decided) * 100.0
        }
    }
}

/// One appearance of a test in a cached run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOccurrence {
    pub run_id: String,
    /// Known only when the run list has been loaded
    pub creation_time: Option<DateTime<Utc>>,
    pub result: TestResult,
}

pub fn aggregate<'a>(runs: impl IntoIterator<Item = &'a RunDetails>) -> BTreeMap<String, TestStats> {
    let mut stats: BTreeMap<String, TestStats> = BTreeMap::new();
    for run in runs {
        for test in &run.tests {
            stats.entry(test.name.clone()).or_default().record(test.status);
        }
    }
    stats
}

/// Every cached result for `test_name`, newest run first.
pub fn history<'a>(
    test_name: &str,
    runs: impl IntoIterator<Item = &'a RunDetails>,
    summaries: Option<&[RunSummary]>,
) -> Vec<TestOccurrence> {
    let created: HashMap<&str, DateTime<Utc>> = summaries
        .unwrap_or_default()
        .iter()
        .map(|r| (r.id.as_str(), r.creation_time))
        .collect();

    let mut occurrences: Vec<TestOccurrence> = runs
        .into_iter()
        .filter_map(|run| {
            run.test(test_name).map(|result| TestOccurrence {
                run_id: run.id.clone(),
                creation_time: created.get(run.id.as_str()).copied(),
                result: result.clone(),
            })
        })
        .collect();

    occurrences.sort_by(|a, b| {
        b.creation_time
            .cmp(&a.creation_time)
            .then_with(|| compare_run_ids(&b.run_id, &a.run_id))
    });
    occurrences
}

/// Numeric ordering for numeric ids, lexical otherwise.
pub fn compare_run_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_rate_ignores_unknown() {
        let stats = TestStats {
            passed: 3,
            failed: 1,
            unknown: 4,
        };
        assert!((stats.pass_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(stats.total(), 8);
        assert!(TestStats::default().pass_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_compare_run_ids_numeric() {
        assert_eq!(compare_run_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_run_ids("b", "a"), Ordering::Greater);
    }
}
