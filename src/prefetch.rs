//! Opportunistic prefetch policy.
//!
//! After the run list loads, the runs a user is most likely to open next are
//! fetched in the background: recent failures first, then the most recent
//! runs, then everything on the primary branch.

use std::collections::HashSet;

use crate::gateway::RunSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchPolicy {
    /// N: most recent failed runs
    pub recent_failed: usize,
    /// M: most recent runs regardless of status
    pub recent: usize,
    pub primary_branch: Option<String>,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self {
            recent_failed: 7,
            recent: 10,
            primary_branch: Some("main".to_string()),
        }
    }
}

/// Pick the run ids to prefetch, in priority order and without duplicates.
///
/// Recency is by creation time, newest first; runs with equal creation times
/// keep their order from `runs`.
pub fn select(runs: &[RunSummary], policy: &PrefetchPolicy) -> Vec<String> {
    let mut by_recency: Vec<&RunSummary> = runs.iter().collect();
    by_recency.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));

    let failed = by_recency
        .iter()
        .copied()
        .filter(|r| r.has_failures())
        .take(policy.recent_failed);
    let recent = by_recency.iter().copied().take(policy.recent);
    let on_branch = by_recency
        .iter()
        .copied()
        .filter(|r| policy.primary_branch.as_deref() == Some(r.branch.as_str()));

    let mut seen: HashSet<&str> = HashSet::new();
    let mut selected = Vec::new();
    for run in failed.chain(recent).chain(on_branch) {
        if seen.insert(run.id.as_str()) {
            selected.push(run.id.clone());
        }
    }
    selected
}
