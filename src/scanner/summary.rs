//! Scan summaries
//!
//! A structured report produced each scan recording the decision taken for
//! every candidate file. Write-only during the scan; persisted as a blob
//! and loaded on demand by id.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warn,
    Unmatched,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummaryLog {
    pub file_path: String,
    pub severity: LogSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub created_at: DateTime<Utc>,
    pub total_files: usize,
    pub matched_files: usize,
    pub unmatched_files: usize,
    pub logs: Vec<ScanSummaryLog>,
}

/// Collects per-file decisions during a scan. Thread-safe so matcher
/// workers can log concurrently.
pub struct SummaryLogger {
    logs: Mutex<Vec<ScanSummaryLog>>,
}

impl SummaryLogger {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(Vec::new()),
        }
    }

    pub fn info(&self, file_path: &str, message: impl Into<String>) {
        self.push(file_path, LogSeverity::Info, message.into());
    }

    pub fn warn(&self, file_path: &str, message: impl Into<String>) {
        self.push(file_path, LogSeverity::Warn, message.into());
    }

    pub fn unmatched(&self, file_path: &str, message: impl Into<String>) {
        self.push(file_path, LogSeverity::Unmatched, message.into());
    }

    fn push(&self, file_path: &str, severity: LogSeverity, message: String) {
        self.logs.lock().push(ScanSummaryLog {
            file_path: file_path.to_string(),
            severity,
            message,
        });
    }

    pub fn finalize(self, total_files: usize, matched_files: usize) -> ScanSummary {
        let logs = self.logs.into_inner();
        let unmatched_files = logs
            .iter()
            .filter(|l| l.severity == LogSeverity::Unmatched)
            .count();
        ScanSummary {
            created_at: Utc::now(),
            total_files,
            matched_files,
            unmatched_files,
            logs,
        }
    }
}

impl Default for SummaryLogger {
    fn default() -> Self {
        Self::new()
    }
}
