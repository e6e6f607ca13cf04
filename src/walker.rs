//! Directory traversal.
//!
//! The walk keeps an explicit stack of `(directory, depth)` pairs instead of
//! recursing, so depth limiting is a counter comparison and very deep trees
//! cannot exhaust the call stack. Entries are visited in batches of
//! [`WALK_BATCH_SIZE`] with a scheduler yield in between.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::AnalysisError;
use crate::options::{AnalysisOptions, AnalysisRequest, CancellationToken};

pub const WALK_BATCH_SIZE: usize = 25;

#[derive(Debug, Clone)]
pub struct WalkConfig {
    pub max_recursion_depth: usize,
    pub max_files_per_directory: usize,
    pub ignore_patterns: Vec<String>,
    /// Lowercase extensions to yield; empty yields every regular file.
    pub extensions: Vec<String>,
    pub show_hidden: bool,
    pub verbose: bool,
}

impl WalkConfig {
    pub fn new(request: &AnalysisRequest, options: &AnalysisOptions) -> Self {
        WalkConfig {
            max_recursion_depth: options.max_recursion_depth,
            max_files_per_directory: options.max_files_per_directory,
            ignore_patterns: request.ignore_patterns.clone(),
            extensions: request.extensions.clone(),
            show_hidden: options.show_hidden,
            verbose: options.verbose,
        }
    }
}

/// A file that passed every filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// Path relative to the walk root, `/`-separated.
    pub relative: String,
    pub extension: String,
    pub size: u64,
}

/// Side effects of a walk that are not files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkSummary {
    pub directories: u64,
    pub access_denied: u64,
    pub other: u64,
    pub truncated_directories: u64,
    /// Non-fatal conditions: depth overruns and access denials.
    pub warnings: Vec<AnalysisError>,
    pub cancelled: bool,
}

/// Lowercase extension without the dot, or `unknown`.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Patterns starting with `.` match the exact basename or any part of the
/// relative path; all others match by substring of the relative path.
pub fn should_ignore(patterns: &[String], name: &str, relative: &str) -> bool {
    patterns.iter().any(|pattern| {
        if pattern.starts_with('.') {
            name == pattern.as_str() || relative.contains(pattern.as_str())
        } else {
            relative.contains(pattern.as_str())
        }
    })
}

fn relative_display(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

pub struct PathWalker {
    root: PathBuf,
    config: WalkConfig,
    cancel: CancellationToken,
    stack: Vec<(PathBuf, usize)>,
    pending: VecDeque<PathBuf>,
    pending_depth: usize,
    since_yield: usize,
    summary: WalkSummary,
}

impl PathWalker {
    pub fn new(root: impl Into<PathBuf>, config: WalkConfig, cancel: CancellationToken) -> Self {
        let root = root.into();
        PathWalker {
            stack: vec![(root.clone(), 0)],
            root,
            config,
            cancel,
            pending: VecDeque::new(),
            pending_depth: 0,
            since_yield: 0,
            summary: WalkSummary::default(),
        }
    }

    pub fn summary(&self) -> &WalkSummary {
        &self.summary
    }

    pub fn into_summary(self) -> WalkSummary {
        self.summary
    }

    /// Next eligible file, or `None` once the tree is exhausted or the walk
    /// was cancelled (see [`WalkSummary::cancelled`]).
    pub async fn next_file(&mut self) -> Option<WalkEntry> {
        loop {
            if let Some(path) = self.pending.pop_front() {
                if self.since_yield >= WALK_BATCH_SIZE {
                    self.since_yield = 0;
                    tokio::task::yield_now().await;
                }
                self.since_yield += 1;
                if self.cancel.is_cancelled() {
                    self.abort();
                    return None;
                }
                let depth = self.pending_depth;
                if let Some(entry) = self.visit(path, depth).await {
                    return Some(entry);
                }
                continue;
            }

            let (dir, depth) = self.stack.pop()?;
            if self.cancel.is_cancelled() {
                self.abort();
                return None;
            }
            if depth > self.config.max_recursion_depth {
                if self.config.verbose {
                    warn!(
                        "maximum recursion depth ({}) exceeded at {}",
                        self.config.max_recursion_depth,
                        dir.display()
                    );
                }
                self.summary
                    .warnings
                    .push(AnalysisError::RecursionDepthExceeded { path: dir });
                continue;
            }
            self.open_directory(dir, depth).await;
        }
    }

    fn abort(&mut self) {
        self.summary.cancelled = true;
        self.stack.clear();
        self.pending.clear();
    }

    async fn open_directory(&mut self, dir: PathBuf, depth: usize) {
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(err) => {
                self.record_failure(&dir, &err, "could not read directory");
                return;
            }
        };

        let mut entries = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => entries.push(entry.path()),
                Ok(None) => break,
                Err(err) => {
                    self.record_failure(&dir, &err, "could not list directory");
                    break;
                }
            }
        }
        entries.sort();

        let limit = self.config.max_files_per_directory;
        if entries.len() > limit {
            warn!(
                "directory {} contains {} entries, only the first {} are analyzed",
                dir.display(),
                entries.len(),
                limit
            );
            entries.truncate(limit);
            self.summary.truncated_directories += 1;
        }

        self.pending = entries.into();
        self.pending_depth = depth;
    }

    async fn visit(&mut self, path: PathBuf, depth: usize) -> Option<WalkEntry> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative = relative_display(&self.root, &path);

        if !self.config.show_hidden && name.starts_with('.') {
            return None;
        }
        if should_ignore(&self.config.ignore_patterns, &name, &relative) {
            return None;
        }

        let metadata = match tokio::fs::symlink_metadata(&path).await {
            Ok(metadata) => metadata,
            Err(err) => {
                self.record_failure(&path, &err, "could not stat");
                return None;
            }
        };

        let file_type = metadata.file_type();
        if file_type.is_symlink() {
            info!("skipping symbolic link {}", path.display());
            return None;
        }
        if file_type.is_dir() {
            self.summary.directories += 1;
            self.stack.push((path, depth + 1));
            return None;
        }
        if !file_type.is_file() {
            return None;
        }

        let extension = file_extension(&path);
        if !self.config.extensions.is_empty() && !self.config.extensions.contains(&extension) {
            return None;
        }
        Some(WalkEntry {
            path,
            relative,
            extension,
            size: metadata.len(),
        })
    }

    fn record_failure(&mut self, path: &Path, err: &io::Error, what: &str) {
        if err.kind() == io::ErrorKind::PermissionDenied {
            self.summary.access_denied += 1;
            self.summary.warnings.push(AnalysisError::AccessDenied {
                path: path.to_path_buf(),
            });
            if self.config.verbose {
                warn!("access denied to {}", path.display());
            }
        } else {
            self.summary.other += 1;
            if self.config.verbose {
                warn!("{} {}: {}", what, path.display(), err);
            }
        }
    }
}

/// Number of files a walk with `config` would yield. Used as the progress
/// denominator; honors cancellation like the real walk.
pub async fn count_eligible_files(
    root: &Path,
    config: WalkConfig,
    cancel: CancellationToken,
) -> u64 {
    let mut walker = PathWalker::new(root, config, cancel);
    let mut count = 0;
    while walker.next_file().await.is_some() {
        count += 1;
    }
    count
}
