//! Source code statistics with a persistent result cache.
//!
//! [`Analyzer::analyze`] walks a directory tree, classifies every eligible
//! file's lines as code, comment or blank, and folds them into an
//! [`AnalysisResult`]. Results are cached per request and each completed run
//! updates cumulative usage statistics and a bounded history used to report
//! run-over-run changes.

pub mod analyzer;
pub mod binary;
pub mod cache;
pub mod error;
pub mod history;
pub mod language;
pub mod options;
pub mod reader;
pub mod report;
pub mod stats;
pub mod store;
pub mod walker;

pub use analyzer::{AnalysisOutput, Analyzer, RunMetadata};
pub use cache::{CachePolicy, CacheStats, CacheStore};
pub use error::{AnalysisError, ErrorCode, Result};
pub use history::{Comparison, FileTypeChangeKind, HistoryDelta, HistoryStore};
pub use language::{LineClassifier, LineCounts};
pub use options::{
    AnalysisOptions, AnalysisRequest, CancellationToken, ProgressCallback, ProgressEvent,
    ProgressStage,
};
pub use report::{AnalysisResult, FileTypeStats, LargestFile, SkippedFiles};
pub use stats::{Milestone, MilestoneKind, StatsTracker, UserStats};
