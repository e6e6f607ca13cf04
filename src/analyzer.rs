//! The analysis pipeline: cache lookup, walk, per-file reading, aggregation
//! and the bookkeeping that follows a completed run.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::binary::is_binary;
use crate::cache::{CachePolicy, CacheStore};
use crate::error::{AnalysisError, ErrorCode, Result};
use crate::history::{Comparison, HistoryStore};
use crate::language::{rules_for_extension, CommentRules};
use crate::options::{AnalysisOptions, AnalysisRequest, ProgressEvent, ProgressStage};
use crate::reader::{read_file, FileRead, ReadError, ReadLimits};
use crate::report::{AnalysisResult, ResultAggregator, SkipReason};
use crate::stats::{Milestone, StatsTracker, UserStats};
use crate::walker::{count_eligible_files, file_extension, PathWalker, WalkConfig, WalkEntry};

/// Files between two "analyzing" progress events.
pub const PROGRESS_INTERVAL: u64 = 10;

pub const CACHE_SUBDIR: &str = "cache";

/// Everything about a run that is not the result itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetadata {
    pub from_cache: bool,
    /// Milestones first reached by this run.
    pub milestones: Vec<Milestone>,
    /// `None` when stats tracking is off.
    pub user_stats: Option<UserStats>,
    pub comparison: Option<Comparison>,
    pub cancelled: bool,
    /// Non-fatal conditions met during the walk.
    pub warnings: Vec<AnalysisError>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub result: AnalysisResult,
    pub meta: RunMetadata,
}

enum FileOutcome {
    Counted(FileRead),
    Skipped(SkipReason),
}

/// Owns the three persisted stores and runs analyses against them.
#[derive(Debug, Clone)]
pub struct Analyzer {
    cache: CacheStore,
    stats: StatsTracker,
    history: HistoryStore,
}

impl Analyzer {
    /// Stats and history documents live directly in `state_dir`, cache
    /// entries in its `cache` subdirectory.
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_cache_policy(state_dir, CachePolicy::default())
    }

    pub fn with_cache_policy(state_dir: impl Into<PathBuf>, policy: CachePolicy) -> Result<Self> {
        let state_dir = state_dir.into();
        Ok(Analyzer {
            cache: CacheStore::new(state_dir.join(CACHE_SUBDIR), policy)?,
            stats: StatsTracker::new(&state_dir)?,
            history: HistoryStore::new(&state_dir)?,
        })
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Analyze the tree described by `request`.
    ///
    /// A missing or non-directory root is an error; everything that goes
    /// wrong below the root is absorbed into skip counters or returned as
    /// warnings. A cancelled run returns its partial result and is neither
    /// cached nor recorded.
    pub async fn analyze(
        &self,
        request: &AnalysisRequest,
        options: &AnalysisOptions,
    ) -> Result<AnalysisOutput> {
        let request = AnalysisRequest {
            root_path: resolve_root(&request.root_path).await?,
            ..request.clone()
        };

        if options.use_cache {
            if let Some(result) = self.cache.load(&request, options).await {
                info!("using cached result for {}", request.root_path.display());
                let mut meta = RunMetadata {
                    from_cache: true,
                    ..RunMetadata::default()
                };
                if options.track_stats {
                    let update = self.stats.update(&result, true)?;
                    meta.milestones = update.new_milestones;
                    meta.user_stats = Some(update.stats);
                }
                return Ok(AnalysisOutput { result, meta });
            }
        }

        let (result, mut meta) = run_pipeline(&request, options).await;
        if meta.cancelled {
            info!(
                "analysis of {} cancelled after {} files",
                request.root_path.display(),
                result.total_files
            );
            return Ok(AnalysisOutput { result, meta });
        }

        if options.use_cache {
            self.cache.save(&request, options, &result).await?;
        }
        if options.track_stats {
            let update = self.stats.update(&result, false)?;
            meta.milestones = update.new_milestones;
            meta.user_stats = Some(update.stats);

            self.history.append(&result.root_path, &result)?;
            meta.comparison = Some(self.history.compare(&result.root_path, &result));
        }
        Ok(AnalysisOutput { result, meta })
    }

    /// Analyze one file. Unlike a tree walk, every problem is an error.
    pub async fn analyze_file(
        &self,
        path: &Path,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult> {
        let metadata = tokio::fs::metadata(path).await.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => AnalysisError::failure(
                ErrorCode::FileNotFound,
                format!("file not found: {}", path.display()),
            ),
            io::ErrorKind::PermissionDenied => AnalysisError::AccessDenied {
                path: path.to_path_buf(),
            },
            _ => AnalysisError::io(ErrorCode::FileAnalysis, path, &err),
        })?;
        if !metadata.is_file() {
            return Err(AnalysisError::failure(
                ErrorCode::NotAFile,
                format!("not a file: {}", path.display()),
            ));
        }

        let size = metadata.len();
        if size > options.max_file_size {
            return Err(AnalysisError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit: options.max_file_size,
            });
        }

        let extension = file_extension(path);
        if options.skip_binary_files
            && is_binary(
                path,
                &extension,
                options.binary_detection_sample_size,
                options.binary_detection_threshold,
            )
            .await
        {
            return Err(AnalysisError::BinaryFile {
                path: path.to_path_buf(),
            });
        }

        let read = read_file(
            path,
            size,
            rules_for_extension(&extension),
            &read_limits(options),
            &options.cancellation,
        )
        .await
        .map_err(|err| match err {
            ReadError::TooLarge { size, limit } => AnalysisError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit,
            },
            ReadError::AccessDenied => AnalysisError::AccessDenied {
                path: path.to_path_buf(),
            },
            other => AnalysisError::failure(
                ErrorCode::FileAnalysis,
                format!("{}: {}", path.display(), other),
            ),
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut aggregator = ResultAggregator::new(path.display().to_string());
        aggregator.record_file(&name, &extension, size, read.counts);
        Ok(aggregator.finish())
    }
}

async fn resolve_root(root: &Path) -> Result<PathBuf> {
    let metadata = tokio::fs::metadata(root).await.map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => AnalysisError::failure(
            ErrorCode::FileNotFound,
            format!("directory not found: {}", root.display()),
        ),
        io::ErrorKind::PermissionDenied => AnalysisError::AccessDenied {
            path: root.to_path_buf(),
        },
        _ => AnalysisError::io(ErrorCode::FileAnalysis, root, &err),
    })?;
    if !metadata.is_dir() {
        return Err(AnalysisError::failure(
            ErrorCode::NotADirectory,
            format!("not a directory: {}", root.display()),
        ));
    }
    Ok(tokio::fs::canonicalize(root)
        .await
        .unwrap_or_else(|_| root.to_path_buf()))
}

fn read_limits(options: &AnalysisOptions) -> ReadLimits {
    ReadLimits {
        max_file_size: options.max_file_size,
        streaming_threshold: options.streaming_threshold,
        cancellation_check_interval: options.cancellation_check_interval,
    }
}

fn percent(done: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) if total > 0 => (done.min(total) * 100 / total) as u8,
        _ => 100,
    }
}

async fn run_pipeline(
    request: &AnalysisRequest,
    options: &AnalysisOptions,
) -> (AnalysisResult, RunMetadata) {
    let config = WalkConfig::new(request, options);
    let cancel = options.cancellation.clone();

    // The counting pass only exists to give progress events a denominator.
    let total_files = if options.progress.is_some() {
        options.report_progress(ProgressEvent {
            stage: ProgressStage::Counting,
            progress: 0,
            files_processed: None,
            total_files: None,
            current_file: None,
        });
        let total = count_eligible_files(&request.root_path, config.clone(), cancel.clone()).await;
        options.report_progress(ProgressEvent {
            stage: ProgressStage::Counting,
            progress: 100,
            files_processed: None,
            total_files: Some(total),
            current_file: None,
        });
        Some(total)
    } else {
        None
    };

    let limits = read_limits(options);
    let mut rules_cache: HashMap<String, &'static CommentRules> = HashMap::new();
    let mut aggregator = ResultAggregator::new(request.root_path.to_string_lossy().into_owned());
    let mut walker = PathWalker::new(&request.root_path, config, cancel);
    let mut processed: u64 = 0;
    let mut cancelled = false;

    while let Some(entry) = walker.next_file().await {
        let rules = *rules_cache
            .entry(entry.extension.clone())
            .or_insert_with(|| rules_for_extension(&entry.extension));

        match process_file(&entry, rules, &limits, options).await {
            FileOutcome::Counted(read) => {
                aggregator.record_file(&entry.relative, &entry.extension, entry.size, read.counts);
                if read.cancelled {
                    cancelled = true;
                    break;
                }
            }
            FileOutcome::Skipped(reason) => aggregator.record_skip(reason),
        }
        processed += 1;
        if processed % PROGRESS_INTERVAL == 0 {
            options.report_progress(ProgressEvent {
                stage: ProgressStage::Analyzing,
                progress: percent(processed, total_files),
                files_processed: Some(processed),
                total_files,
                current_file: Some(entry.relative.clone()),
            });
        }
    }

    let summary = walker.into_summary();
    cancelled |= summary.cancelled;
    aggregator.add_skips(SkipReason::AccessDenied, summary.access_denied);
    aggregator.add_skips(SkipReason::Other, summary.other);
    aggregator.set_directories(summary.directories);

    if !cancelled {
        options.report_progress(ProgressEvent {
            stage: ProgressStage::Analyzing,
            progress: 100,
            files_processed: Some(processed),
            total_files,
            current_file: None,
        });
    }
    debug!(
        "walked {} directories, {} files eligible",
        summary.directories, processed
    );

    let meta = RunMetadata {
        cancelled,
        warnings: summary.warnings,
        ..RunMetadata::default()
    };
    (aggregator.finish(), meta)
}

/// Decide the fate of one walked file: size first, then content sniffing,
/// then the actual read.
async fn process_file(
    entry: &WalkEntry,
    rules: &'static CommentRules,
    limits: &ReadLimits,
    options: &AnalysisOptions,
) -> FileOutcome {
    if entry.size > options.max_file_size {
        if options.verbose {
            warn!(
                "skipping {}: {} bytes exceeds the {} byte limit",
                entry.relative, entry.size, options.max_file_size
            );
        }
        return FileOutcome::Skipped(SkipReason::TooLarge);
    }

    if options.skip_binary_files
        && is_binary(
            &entry.path,
            &entry.extension,
            options.binary_detection_sample_size,
            options.binary_detection_threshold,
        )
        .await
    {
        if options.verbose {
            warn!("skipping binary file {}", entry.relative);
        }
        return FileOutcome::Skipped(SkipReason::Binary);
    }

    match read_file(&entry.path, entry.size, rules, limits, &options.cancellation).await {
        Ok(read) => FileOutcome::Counted(read),
        Err(ReadError::TooLarge { .. }) => FileOutcome::Skipped(SkipReason::TooLarge),
        Err(ReadError::AccessDenied) => {
            if options.verbose {
                warn!("access denied to {}", entry.relative);
            }
            FileOutcome::Skipped(SkipReason::AccessDenied)
        }
        Err(err) => {
            if options.verbose {
                warn!("could not read {}: {}", entry.relative, err);
            }
            FileOutcome::Skipped(SkipReason::Other)
        }
    }
}
