//! Structured test logs (`petri.jsonl`): one JSON object per line.
//!
//! Parsing is fail-fast. A malformed line aborts with its line number rather
//! than silently dropping log content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LogParseError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub message: String,
    /// File name of an attachment (screenshot, dump) stored next to the log
    #[serde(default)]
    pub attachment: Option<String>,
}

impl LogEntry {
    pub fn is_error(&self) -> bool {
        self.severity.eq_ignore_ascii_case("error")
    }

    pub fn is_warning(&self) -> bool {
        self.severity.eq_ignore_ascii_case("warn") || self.severity.eq_ignore_ascii_case("warning")
    }

    /// Single-line rendering: `<time> <SEVERITY> [source] message`
    pub fn display_line(&self) -> String {
        let time = self
            .timestamp
            .map(|t| t.format("%H:%M:%S%.3f").to_string())
            .unwrap_or_default();
        let mut line = format!("{time} {:<5} [{}] {}", self.severity.to_uppercase(), self.source, self.message);
        if let Some(attachment) = &self.attachment {
            line.push_str(&format!(" (attachment: {attachment})"));
        }
        line.trim_start().to_string()
    }
}

pub fn parse_log(text: &str) -> Result<Vec<LogEntry>, LogParseError> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry = serde_json::from_str(line).map_err(|e| LogParseError {
            line: idx + 1,
            message: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}
