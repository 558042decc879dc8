mod common;

use std::collections::HashSet;

use petri_viewer::gateway::RunSummary;
use petri_viewer::prefetch::{select, PrefetchPolicy};

use common::summary;

fn policy(recent_failed: usize, recent: usize, branch: Option<&str>) -> PrefetchPolicy {
    PrefetchPolicy {
        recent_failed,
        recent,
        primary_branch: branch.map(str::to_string),
    }
}

/// Twenty runs on a feature branch; runs 2, 5 and 9 failed. Higher ids are newer.
fn twenty_runs() -> Vec<RunSummary> {
    (1..=20)
        .map(|i| {
            let failed = u32::from([2, 5, 9].contains(&i));
            summary(&i.to_string(), i, "feature", failed)
        })
        .collect()
}

#[test]
fn test_failed_and_recent_union() {
    let runs = twenty_runs();
    let selected = select(&runs, &policy(7, 10, Some("main")));

    let expected: HashSet<String> = ["2", "5", "9"]
        .into_iter()
        .map(str::to_string)
        .chain((11..=20).map(|i| i.to_string()))
        .collect();
    let got: HashSet<String> = selected.iter().cloned().collect();

    assert_eq!(got, expected);
    assert_eq!(selected.len(), got.len(), "no duplicates");
    assert!(selected.len() <= 13);
}

#[test]
fn test_failures_come_first_newest_first() {
    let runs = twenty_runs();
    let selected = select(&runs, &policy(7, 10, None));
    assert_eq!(&selected[..4], ["9", "5", "2", "20"]);
}

#[test]
fn test_recent_failures_are_capped() {
    let runs = twenty_runs();
    let selected = select(&runs, &policy(2, 0, None));
    assert_eq!(selected, ["9", "5"]);
}

#[test]
fn test_primary_branch_runs_are_added_last() {
    let mut runs = twenty_runs();
    runs[0].branch = "main".to_string(); // run 1, the oldest
    runs[3].branch = "main".to_string(); // run 4

    let selected = select(&runs, &policy(1, 2, Some("main")));
    assert_eq!(selected, ["9", "20", "19", "4", "1"]);
}

#[test]
fn test_overlap_is_deduplicated() {
    let mut runs = twenty_runs();
    for run in &mut runs {
        run.branch = "main".to_string();
    }
    runs[19].failed = 1; // run 20 is both failed and most recent

    let selected = select(&runs, &policy(7, 10, Some("main")));
    assert_eq!(selected.len(), 20);
    assert_eq!(selected[0], "20");
    let unique: HashSet<&String> = selected.iter().collect();
    assert_eq!(unique.len(), 20);
}

#[test]
fn test_equal_creation_times_keep_list_order() {
    let runs = vec![
        summary("a", 1, "feature", 1),
        summary("b", 1, "feature", 1),
        summary("c", 1, "feature", 1),
    ];
    let selected = select(&runs, &policy(2, 0, None));
    assert_eq!(selected, ["a", "b"]);
}

#[test]
fn test_empty_inputs() {
    assert!(select(&[], &PrefetchPolicy::default()).is_empty());
    assert!(select(&twenty_runs(), &policy(0, 0, None)).is_empty());
}
