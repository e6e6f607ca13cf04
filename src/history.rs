//! Bounded log of past runs and run-over-run deltas.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::report::{AnalysisResult, FileTypeStats, ResultSummary};
use crate::store::{ensure_dir, JsonDocument};

pub const HISTORY_FILE: &str = "analysis-history.json";
pub const MAX_HISTORY_ENTRIES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub project_path: String,
    pub timestamp: DateTime<Utc>,
    pub summary: ResultSummary,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricDeltas {
    pub total_files: i64,
    pub total_lines: i64,
    pub code_lines: i64,
    pub comment_lines: i64,
    pub blank_lines: i64,
}

/// Percentages rendered with one decimal place. `None` when the previous
/// value was zero.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PercentageChanges {
    pub total_files: Option<String>,
    pub total_lines: Option<String>,
    pub code_lines: Option<String>,
    pub comment_lines: Option<String>,
    pub blank_lines: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileTypeChangeKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTypeChange {
    pub files: i64,
    pub lines: i64,
    pub kind: FileTypeChangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryDelta {
    pub previous: ResultSummary,
    pub previous_timestamp: DateTime<Utc>,
    pub time_since_previous: Duration,
    pub changes: MetricDeltas,
    pub percentage_changes: PercentageChanges,
    /// Every type seen in either run; unchanged types carry zero deltas.
    pub file_type_changes: BTreeMap<String, FileTypeChange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comparison {
    NoPrevious,
    Changed(Box<HistoryDelta>),
}

fn delta(current: u64, previous: u64) -> i64 {
    current as i64 - previous as i64
}

fn percentage(current: u64, previous: u64) -> Option<String> {
    if previous == 0 {
        return None;
    }
    let change = delta(current, previous) as f64 / previous as f64 * 100.0;
    Some(format!("{:.1}", change))
}

fn file_type_changes(
    current: &BTreeMap<String, FileTypeStats>,
    previous: &BTreeMap<String, FileTypeStats>,
) -> BTreeMap<String, FileTypeChange> {
    let types: BTreeSet<&String> = current.keys().chain(previous.keys()).collect();
    let mut changes = BTreeMap::new();
    for ext in types {
        let change = match (current.get(ext), previous.get(ext)) {
            (Some(now), None) => FileTypeChange {
                files: now.files as i64,
                lines: now.total_lines as i64,
                kind: FileTypeChangeKind::Added,
            },
            (None, Some(before)) => FileTypeChange {
                files: -(before.files as i64),
                lines: -(before.total_lines as i64),
                kind: FileTypeChangeKind::Removed,
            },
            (Some(now), Some(before)) => FileTypeChange {
                files: delta(now.files, before.files),
                lines: delta(now.total_lines, before.total_lines),
                kind: FileTypeChangeKind::Changed,
            },
            (None, None) => continue,
        };
        changes.insert(ext.clone(), change);
    }
    changes
}

/// Compute the delta between two summaries.
pub fn diff_summaries(
    current: &ResultSummary,
    previous: &ResultSummary,
    previous_timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
) -> HistoryDelta {
    HistoryDelta {
        previous: previous.clone(),
        previous_timestamp,
        time_since_previous: now - previous_timestamp,
        changes: MetricDeltas {
            total_files: delta(current.total_files, previous.total_files),
            total_lines: delta(current.total_lines, previous.total_lines),
            code_lines: delta(current.code_lines, previous.code_lines),
            comment_lines: delta(current.comment_lines, previous.comment_lines),
            blank_lines: delta(current.blank_lines, previous.blank_lines),
        },
        percentage_changes: PercentageChanges {
            total_files: percentage(current.total_files, previous.total_files),
            total_lines: percentage(current.total_lines, previous.total_lines),
            code_lines: percentage(current.code_lines, previous.code_lines),
            comment_lines: percentage(current.comment_lines, previous.comment_lines),
            blank_lines: percentage(current.blank_lines, previous.blank_lines),
        },
        file_type_changes: file_type_changes(&current.by_file_type, &previous.by_file_type),
    }
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    log: JsonDocument<Vec<HistoryEntry>>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(HistoryStore {
            log: JsonDocument::new(&dir, HISTORY_FILE),
        })
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.log.load()
    }

    /// Append a run, dropping the oldest entries beyond the global cap.
    pub fn append(&self, project_path: &str, result: &AnalysisResult) -> Result<HistoryEntry> {
        let mut entries = self.log.load();
        let entry = HistoryEntry {
            project_path: project_path.to_string(),
            timestamp: Utc::now(),
            summary: result.summary(),
        };
        entries.push(entry.clone());
        if entries.len() > MAX_HISTORY_ENTRIES {
            let excess = entries.len() - MAX_HISTORY_ENTRIES;
            entries.drain(..excess);
        }
        self.log.save(&entries)?;
        Ok(entry)
    }

    /// Up to `limit` entries for `project_path`, most recent first.
    pub fn recent(&self, project_path: &str, limit: usize) -> Vec<HistoryEntry> {
        self.log
            .load()
            .into_iter()
            .rev()
            .filter(|entry| entry.project_path == project_path)
            .take(limit)
            .collect()
    }

    /// Compare `current` against the run before the latest one recorded for
    /// `project_path`. Expects `current` to have been appended already.
    pub fn compare(&self, project_path: &str, current: &AnalysisResult) -> Comparison {
        let recent = self.recent(project_path, 2);
        match recent.get(1) {
            Some(previous) => Comparison::Changed(Box::new(diff_summaries(
                &current.summary(),
                &previous.summary,
                previous.timestamp,
                Utc::now(),
            ))),
            None => Comparison::NoPrevious,
        }
    }
}
