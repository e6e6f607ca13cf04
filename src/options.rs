//! Inputs accepted by the analyzer: the request itself, tunable limits and the
//! cooperative hooks (progress reporting and cancellation).

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_STREAMING_THRESHOLD: u64 = 1024 * 1024;
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 100;
pub const DEFAULT_MAX_FILES_PER_DIRECTORY: usize = 10_000;
pub const DEFAULT_BINARY_SAMPLE_SIZE: usize = 1024;
pub const DEFAULT_BINARY_THRESHOLD: f64 = 0.3;
pub const DEFAULT_CANCELLATION_CHECK_INTERVAL: usize = 1000;

/// What to analyze.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub root_path: PathBuf,
    /// Extensions without the leading dot, compared case-insensitively.
    pub extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
}

impl AnalysisRequest {
    pub fn new<P, E, I>(root_path: P, extensions: E, ignore_patterns: I) -> Self
    where
        P: Into<PathBuf>,
        E: IntoIterator,
        E::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        AnalysisRequest {
            root_path: root_path.into(),
            extensions: extensions
                .into_iter()
                .map(|ext| ext.into().trim_start_matches('.').to_lowercase())
                .collect(),
            ignore_patterns: ignore_patterns.into_iter().map(Into::into).collect(),
        }
    }
}

/// Cooperative cancellation flag shared between the caller and a running analysis.
///
/// Cancelling never raises: the analysis stops at the next check point and
/// returns whatever it has accumulated.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Counting,
    Analyzing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    /// 0 to 100.
    pub progress: u8,
    pub files_processed: Option<u64>,
    pub total_files: Option<u64>,
    pub current_file: Option<String>,
}

#[derive(Clone)]
pub struct ProgressCallback(Arc<dyn Fn(&ProgressEvent) + Send + Sync>);

impl ProgressCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        ProgressCallback(Arc::new(f))
    }

    pub fn emit(&self, event: &ProgressEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressCallback(..)")
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub max_file_size: u64,
    pub streaming_threshold: u64,
    pub max_recursion_depth: usize,
    pub max_files_per_directory: usize,
    pub binary_detection_sample_size: usize,
    pub binary_detection_threshold: f64,
    pub cancellation_check_interval: usize,
    pub skip_binary_files: bool,
    pub show_hidden: bool,
    pub use_cache: bool,
    pub track_stats: bool,
    pub verbose: bool,
    pub progress: Option<ProgressCallback>,
    pub cancellation: CancellationToken,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_files_per_directory: DEFAULT_MAX_FILES_PER_DIRECTORY,
            binary_detection_sample_size: DEFAULT_BINARY_SAMPLE_SIZE,
            binary_detection_threshold: DEFAULT_BINARY_THRESHOLD,
            cancellation_check_interval: DEFAULT_CANCELLATION_CHECK_INTERVAL,
            skip_binary_files: true,
            show_hidden: false,
            use_cache: true,
            track_stats: true,
            verbose: false,
            progress: None,
            cancellation: CancellationToken::new(),
        }
    }
}

impl AnalysisOptions {
    pub(crate) fn report_progress(&self, event: ProgressEvent) {
        if let Some(callback) = &self.progress {
            callback.emit(&event);
        }
    }
}
