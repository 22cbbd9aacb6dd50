//! Execution log.
//!
//! One [`IterationRecord`] per iteration, appended in order and persisted
//! wholesale after every append. The on-disk form is a pretty-printed JSON
//! array whose records use the keys `iteration`, `success`, `output`,
//! `stack_trace`, `exit_code`, `timed_out`, `parsed_traceback`,
//! `ai_response`, `file_contents`, `fix_applied`, `started_at` and
//! `duration_ms`.

use crate::classify::ImplicatedElement;
use crate::context::FileSnapshot;
use crate::error::{MenderError, Result};
use crate::synthesize::FixProposal;
use crate::testing::{FailureReport, FileSystem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Everything that happened in one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    #[serde(rename = "iteration")]
    pub iteration_number: u32,

    #[serde(flatten)]
    pub report: FailureReport,

    /// Classifier output; absent when the target succeeded.
    #[serde(rename = "parsed_traceback", default)]
    pub implicated: Option<Vec<ImplicatedElement>>,

    /// Synthesizer output; absent on success or when no proposal came back.
    #[serde(rename = "ai_response", default)]
    pub proposal: Option<FixProposal>,

    /// Files gathered for this iteration.
    #[serde(rename = "file_contents", default)]
    pub context: FileSnapshot,

    /// Whether the proposal was written to the target.
    #[serde(default)]
    pub fix_applied: bool,

    /// Absent in logs written before timestamps were recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub duration_ms: u64,
}

impl IterationRecord {
    /// Record for a successful run.
    #[must_use]
    pub fn success(iteration_number: u32, report: FailureReport, started_at: DateTime<Utc>) -> Self {
        Self {
            iteration_number,
            report,
            implicated: None,
            proposal: None,
            context: FileSnapshot::new(),
            fix_applied: false,
            started_at: Some(started_at),
            duration_ms: 0,
        }
    }

    /// Record for a failed run and the repair attempt that followed.
    #[must_use]
    pub fn failure(
        iteration_number: u32,
        report: FailureReport,
        implicated: Vec<ImplicatedElement>,
        proposal: Option<FixProposal>,
        context: FileSnapshot,
        fix_applied: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            iteration_number,
            report,
            implicated: Some(implicated),
            proposal,
            context,
            fix_applied,
            started_at: Some(started_at),
            duration_ms: 0,
        }
    }

    /// Set the elapsed time.
    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

/// Ordered, append-only list of iteration records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLog(Vec<IterationRecord>);

impl ExecutionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn push(&mut self, record: IterationRecord) {
        self.0.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[IterationRecord] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&IterationRecord> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IterationRecord> {
        self.0.iter()
    }

    /// Aggregate figures for display.
    #[must_use]
    pub fn summary(&self) -> LogSummary {
        LogSummary {
            iterations: self.0.len(),
            succeeded: self.last().is_some_and(|r| r.report.succeeded),
            fixes_applied: self.0.iter().filter(|r| r.fix_applied).count(),
            proposals: self.0.iter().filter(|r| r.proposal.is_some()).count(),
            timeouts: self.0.iter().filter(|r| r.report.timed_out).count(),
            total_duration_ms: self.0.iter().map(|r| r.duration_ms).sum(),
        }
    }
}

/// Aggregate view of an execution log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSummary {
    pub iterations: usize,
    /// Whether the final iteration succeeded.
    pub succeeded: bool,
    pub fixes_applied: usize,
    pub proposals: usize,
    pub timeouts: usize,
    pub total_duration_ms: u64,
}

/// Persists the execution log through a [`FileSystem`].
#[derive(Clone)]
pub struct ExecutionLogStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
}

impl ExecutionLogStore {
    pub fn new(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the persisted log with `log`.
    ///
    /// # Errors
    ///
    /// Returns [`MenderError::Persist`] if the write fails.
    pub fn save(&self, log: &ExecutionLog) -> Result<()> {
        let json = serde_json::to_string_pretty(log)?;
        self.fs
            .write_atomic(&self.path, &json)
            .map_err(|e| MenderError::persist(&self.path, e.to_string()))?;
        debug!(
            "Saved execution log ({} records) to {}",
            log.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Read a persisted log.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a JSON error if
    /// it is not a valid log.
    pub fn load(&self) -> Result<ExecutionLog> {
        let content = self.fs.read_file(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFileSystem;
    use chrono::TimeZone;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn failed_record(n: u32) -> IterationRecord {
        let mut context = FileSnapshot::new();
        context.insert("script.py", "print(x)\n");
        IterationRecord::failure(
            n,
            FailureReport::failure("", "NameError: name 'x' is not defined", Some(1)),
            vec![
                ImplicatedElement::file("script.py"),
                ImplicatedElement::error("NameError", "name 'x' is not defined"),
            ],
            Some(FixProposal {
                reasoning: "x is undefined".into(),
                suggested_fix_summary: "define x".into(),
                full_corrected_script: Some("x = 1\nprint(x)\n".into()),
            }),
            context,
            true,
            started(),
        )
        .with_duration(Duration::from_millis(1500))
    }

    #[test]
    fn test_record_wire_keys() {
        let value = serde_json::to_value(failed_record(1)).unwrap();
        assert_eq!(value["iteration"], 1);
        assert_eq!(value["success"], false);
        assert_eq!(value["output"], "");
        assert_eq!(value["stack_trace"], "NameError: name 'x' is not defined");
        assert_eq!(value["parsed_traceback"][0]["element"], "file");
        assert_eq!(value["ai_response"]["suggested_fix"], "define x");
        assert_eq!(value["file_contents"]["script.py"], "print(x)\n");
        assert_eq!(value["fix_applied"], true);
        assert_eq!(value["duration_ms"], 1500);
    }

    #[test]
    fn test_success_record_has_no_repair_data() {
        let record = IterationRecord::success(2, FailureReport::success("ok\n"), started());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value["parsed_traceback"].is_null());
        assert!(value["ai_response"].is_null());
        assert!(value["stack_trace"].is_null());
        assert_eq!(value["file_contents"], serde_json::json!({}));
    }

    #[test]
    fn test_log_serialization_roundtrip() {
        let mut log = ExecutionLog::new();
        log.push(failed_record(1));
        log.push(IterationRecord::success(2, FailureReport::success("ok\n"), started()));

        let json = serde_json::to_string_pretty(&log).unwrap();
        let back: ExecutionLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }

    #[test]
    fn test_reads_log_without_added_fields() {
        let json = r#"[
    {
        "iteration": 1,
        "success": false,
        "output": "",
        "stack_trace": "NameError: name 'x' is not defined",
        "parsed_traceback": [{"element": "file", "content": "script.py"}],
        "ai_response": {"reasoning": "x is undefined", "suggested_fix": "define x", "full_corrected_script": "x = 1\nprint(x)\n"},
        "file_contents": {"script.py": "print(x)\n"}
    },
    {
        "iteration": 2,
        "success": true,
        "output": "1\n",
        "stack_trace": null,
        "parsed_traceback": null,
        "ai_response": null,
        "file_contents": {}
    }
]"#;
        let log: ExecutionLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.len(), 2);

        let first = &log.records()[0];
        assert!(!first.report.succeeded);
        assert_eq!(first.started_at, None);
        assert_eq!(first.duration_ms, 0);
        assert!(!first.fix_applied);
        assert_eq!(first.context.get("script.py"), Some("print(x)\n"));
        assert!(log.records()[1].report.succeeded);

        let summary = log.summary();
        assert!(summary.succeeded);
        assert_eq!(summary.proposals, 1);
    }

    #[test]
    fn test_started_at_is_written() {
        let value = serde_json::to_value(failed_record(1)).unwrap();
        assert_eq!(value["started_at"], "2026-03-01T12:00:00Z");
    }

    #[test]
    fn test_summary() {
        let mut log = ExecutionLog::new();
        log.push(failed_record(1));
        log.push(
            IterationRecord::success(2, FailureReport::success(""), started())
                .with_duration(Duration::from_millis(500)),
        );

        let summary = log.summary();
        assert_eq!(summary.iterations, 2);
        assert!(summary.succeeded);
        assert_eq!(summary.fixes_applied, 1);
        assert_eq!(summary.proposals, 1);
        assert_eq!(summary.total_duration_ms, 2000);
    }

    #[test]
    fn test_store_save_and_load() {
        let fs = Arc::new(MockFileSystem::new());
        let store = ExecutionLogStore::new(fs.clone(), "full_execution_log.json");

        let mut log = ExecutionLog::new();
        log.push(failed_record(1));
        store.save(&log).unwrap();

        assert!(fs
            .contents("full_execution_log.json")
            .unwrap()
            .starts_with("[\n"));
        assert_eq!(store.load().unwrap(), log);
    }

    #[test]
    fn test_store_save_failure_is_persist_error() {
        let fs = Arc::new(MockFileSystem::new().with_failing_writes());
        let store = ExecutionLogStore::new(fs, "log.json");
        let err = store.save(&ExecutionLog::new()).unwrap_err();
        assert!(matches!(err, MenderError::Persist { .. }));
    }
}
