use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::language::LineCounts;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTypeStats {
    pub files: u64,
    pub total_lines: u64,
    pub code_lines: u64,
    pub comment_lines: u64,
    pub blank_lines: u64,
}

impl FileTypeStats {
    fn add(&mut self, counts: &LineCounts) {
        self.files += 1;
        self.total_lines += counts.total;
        self.code_lines += counts.code;
        self.comment_lines += counts.comment;
        self.blank_lines += counts.blank;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargestFile {
    pub path: String,
    pub lines: u64,
    #[serde(rename = "type")]
    pub file_type: String,
    pub size: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFiles {
    pub too_large: u64,
    pub binary: u64,
    pub access_denied: u64,
    pub other: u64,
}

impl SkippedFiles {
    pub fn total(&self) -> u64 {
        self.too_large + self.binary + self.access_denied + self.other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooLarge,
    Binary,
    AccessDenied,
    Other,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub root_path: String,
    pub total_files: u64,
    pub total_directories: u64,
    pub total_lines: u64,
    pub code_lines: u64,
    pub comment_lines: u64,
    pub blank_lines: u64,
    pub by_file_type: BTreeMap<String, FileTypeStats>,
    /// Every analyzed file, most lines first.
    pub largest_files: Vec<LargestFile>,
    pub skipped_files: SkippedFiles,
}

impl AnalysisResult {
    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            total_files: self.total_files,
            total_lines: self.total_lines,
            code_lines: self.code_lines,
            comment_lines: self.comment_lines,
            blank_lines: self.blank_lines,
            by_file_type: self.by_file_type.clone(),
        }
    }
}

/// The part of a result kept in the history log.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total_files: u64,
    pub total_lines: u64,
    pub code_lines: u64,
    pub comment_lines: u64,
    pub blank_lines: u64,
    pub by_file_type: BTreeMap<String, FileTypeStats>,
}

/// Folds per-file outcomes into an [`AnalysisResult`]. Each file lands in
/// exactly one bucket: analyzed or one of the four skip reasons.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    result: AnalysisResult,
}

impl ResultAggregator {
    pub fn new(root_path: impl Into<String>) -> Self {
        ResultAggregator {
            result: AnalysisResult {
                root_path: root_path.into(),
                ..AnalysisResult::default()
            },
        }
    }

    pub fn record_file(&mut self, relative: &str, extension: &str, size: u64, counts: LineCounts) {
        self.result
            .by_file_type
            .entry(extension.to_string())
            .or_default()
            .add(&counts);

        let result = &mut self.result;
        result.total_files += 1;
        result.total_lines += counts.total;
        result.code_lines += counts.code;
        result.comment_lines += counts.comment;
        result.blank_lines += counts.blank;
        result.largest_files.push(LargestFile {
            path: relative.to_string(),
            lines: counts.total,
            file_type: extension.to_string(),
            size,
        });
    }

    pub fn record_skip(&mut self, reason: SkipReason) {
        self.add_skips(reason, 1);
    }

    pub fn add_skips(&mut self, reason: SkipReason, count: u64) {
        let skipped = &mut self.result.skipped_files;
        match reason {
            SkipReason::TooLarge => skipped.too_large += count,
            SkipReason::Binary => skipped.binary += count,
            SkipReason::AccessDenied => skipped.access_denied += count,
            SkipReason::Other => skipped.other += count,
        }
    }

    pub fn set_directories(&mut self, directories: u64) {
        self.result.total_directories = directories;
    }

    pub fn finish(mut self) -> AnalysisResult {
        self.result
            .largest_files
            .sort_by(|a, b| b.lines.cmp(&a.lines));
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(code: u64, comment: u64, blank: u64) -> LineCounts {
        LineCounts {
            total: code + comment + blank,
            code,
            comment,
            blank,
        }
    }

    #[test]
    fn test_aggregate_totals_match_buckets() {
        let mut aggregator = ResultAggregator::new("/proj");
        aggregator.record_file("a.js", "js", 10, counts(3, 1, 1));
        aggregator.record_file("b.js", "js", 20, counts(10, 0, 2));
        aggregator.record_file("c.py", "py", 5, counts(1, 1, 0));
        aggregator.record_skip(SkipReason::Binary);
        aggregator.add_skips(SkipReason::AccessDenied, 2);
        let result = aggregator.finish();

        assert_eq!(result.total_files, 3);
        assert_eq!(result.total_lines, 19);
        assert_eq!(
            result.code_lines + result.comment_lines + result.blank_lines,
            result.total_lines
        );
        let bucket_total: u64 = result.by_file_type.values().map(|s| s.total_lines).sum();
        assert_eq!(bucket_total, result.total_lines);
        assert_eq!(result.by_file_type["js"].files, 2);
        assert_eq!(result.skipped_files.binary, 1);
        assert_eq!(result.skipped_files.access_denied, 2);
        assert_eq!(result.skipped_files.total(), 3);
    }

    #[test]
    fn test_largest_files_sorted_descending() {
        let mut aggregator = ResultAggregator::new("/proj");
        aggregator.record_file("small.rs", "rs", 1, counts(1, 0, 0));
        aggregator.record_file("big.rs", "rs", 1, counts(50, 0, 0));
        aggregator.record_file("mid.rs", "rs", 1, counts(7, 0, 0));
        let result = aggregator.finish();
        let order: Vec<&str> = result.largest_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(order, vec!["big.rs", "mid.rs", "small.rs"]);
    }

    #[test]
    fn test_result_serializes_type_field_name() {
        let mut aggregator = ResultAggregator::new("/proj");
        aggregator.record_file("a.go", "go", 3, counts(1, 0, 0));
        let json = serde_json::to_string(&aggregator.finish()).unwrap();
        assert!(json.contains("\"type\":\"go\""), "json: {json}");
    }
}
