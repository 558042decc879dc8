//! Parsing of the container's XML blob listings.
//!
//! Listings are tolerant: a blob with missing properties or metadata still
//! yields a run, with empty/zero defaults in place of the missing fields.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{RunSummary, TestResult, TestStatus};

/// Prefix under which every run's marker blob is stored.
pub const RUNS_PREFIX: &str = "runs/";
/// A folder is a completed test result iff it contains this file.
pub const LOG_FILE: &str = "petri.jsonl";
/// Present next to the log when the test passed.
pub const PASSED_MARKER: &str = "petri.passed";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnumerationResults {
    #[serde(rename = "Blobs")]
    blobs: BlobList,
    #[serde(rename = "NextMarker")]
    next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BlobList {
    #[serde(rename = "Blob")]
    blob: Vec<Blob>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Blob {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Properties")]
    pub properties: BlobProperties,
    #[serde(rename = "Metadata")]
    pub metadata: BlobMetadata,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlobProperties {
    #[serde(rename = "Creation-Time")]
    pub creation_time: Option<String>,
    #[serde(rename = "Last-Modified")]
    pub last_modified: Option<String>,
    #[serde(rename = "Etag")]
    pub etag: Option<String>,
    #[serde(rename = "Content-Length")]
    pub content_length: Option<String>,
}

/// Custom metadata the CI pipeline attaches to each run blob.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlobMetadata {
    pub petrifailed: Option<String>,
    pub petripassed: Option<String>,
    pub ghbranch: Option<String>,
    pub ghpr: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Default)]
pub struct ListingPage {
    pub blobs: Vec<Blob>,
    /// Continuation token for the next page, if any.
    pub next_marker: Option<String>,
}

pub fn parse_page(xml: &str) -> Result<ListingPage, quick_xml::DeError> {
    let results: EnumerationResults = quick_xml::de::from_str(xml)?;
    Ok(ListingPage {
        blobs: results.blobs.blob,
        next_marker: non_empty(results.next_marker),
    })
}

/// Build the run list from `runs/` blobs, newest first.
///
/// A run id is the path segment following `runs/`. Only the first blob seen
/// for an id contributes.
pub fn runs_from_blobs(blobs: &[Blob]) -> Vec<RunSummary> {
    let mut seen = HashSet::new();
    let mut runs = Vec::new();

    for blob in blobs {
        let Some(id) = run_id_of(&blob.name) else {
            continue;
        };
        if !seen.insert(id.to_string()) {
            continue;
        }

        let meta = &blob.metadata;
        runs.push(RunSummary {
            id: id.to_string(),
            creation_time: parse_time(blob.properties.creation_time.as_deref()),
            branch: meta.ghbranch.clone().unwrap_or_default(),
            passed: parse_count(meta.petripassed.as_deref()),
            failed: parse_count(meta.petrifailed.as_deref()),
            pr_number: meta
                .ghpr
                .as_deref()
                .and_then(|pr| pr.trim().parse().ok()),
            pr_title: None,
        });
    }

    // sort_by is stable, so equal timestamps keep listing order
    runs.sort_by(|a, b| b.creation_time.cmp(&a.creation_time));
    runs
}

/// Build a run's test results from the blobs stored under `<run_id>/`.
///
/// A folder with a log is a completed test, passed iff it also holds the
/// pass marker. A pass marker without a log cannot be confirmed and is
/// reported as unknown. Folders with neither are skipped.
pub fn tests_from_blobs(run_id: &str, blobs: &[Blob]) -> Vec<TestResult> {
    #[derive(Default)]
    struct Folder {
        has_log: bool,
        passed: bool,
    }

    let prefix = format!("{run_id}/");
    let mut folders: BTreeMap<&str, Folder> = BTreeMap::new();

    for blob in blobs {
        let Some(rest) = blob.name.strip_prefix(&prefix) else {
            continue;
        };
        let Some((folder, file)) = rest.rsplit_once('/') else {
            continue;
        };
        if folder.is_empty() {
            continue;
        }
        let entry = folders.entry(folder).or_default();
        match file {
            LOG_FILE => entry.has_log = true,
            PASSED_MARKER => entry.passed = true,
            _ => {}
        }
    }

    folders
        .into_iter()
        .filter(|(_, f)| f.has_log || f.passed)
        .map(|(folder, f)| TestResult {
            name: folder.to_string(),
            status: match (f.has_log, f.passed) {
                (true, true) => TestStatus::Passed,
                (true, false) => TestStatus::Failed,
                (false, _) => TestStatus::Unknown,
            },
            path: format!("{prefix}{folder}"),
        })
        .collect()
}

fn run_id_of(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(RUNS_PREFIX)?;
    let id = rest.split('/').next()?;
    (!id.is_empty()).then_some(id)
}

fn parse_time(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

fn parse_count(value: Option<&str>) -> u32 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_of() {
        assert_eq!(run_id_of("runs/123"), Some("123"));
        assert_eq!(run_id_of("runs/123/extra"), Some("123"));
        assert_eq!(run_id_of("runs/"), None);
        assert_eq!(run_id_of("other/123"), None);
    }

    #[test]
    fn test_parse_count_defaults_to_zero() {
        assert_eq!(parse_count(Some("12")), 12);
        assert_eq!(parse_count(Some("")), 0);
        assert_eq!(parse_count(Some("x")), 0);
        assert_eq!(parse_count(None), 0);
    }

    #[test]
    fn test_parse_time_rfc1123() {
        let t = parse_time(Some("Tue, 02 Jan 2024 03:04:05 GMT"));
        assert_eq!(t.to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert_eq!(parse_time(None), DateTime::<Utc>::default());
    }
}
