//! Persistent result cache.
//!
//! An entry is keyed by a SHA-256 over the request parameters and is valid
//! while it is younger than the TTL and no file or directory under the root
//! has a modification time newer than the one recorded at save time.
//!
//! Checking the second condition costs a full stat walk of the tree on every
//! lookup. That is the price of never serving a stale result; on trees with
//! very many small files it approaches the cost of the analysis itself.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{AnalysisError, ErrorCode, Result};
use crate::options::{AnalysisOptions, AnalysisRequest};
use crate::report::AnalysisResult;
use crate::store::{ensure_dir, read_json, read_json_async, write_json_atomic};

pub const CACHE_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_SIZE_LIMIT: u64 = 100 * 1024 * 1024;

const SOFT_LIMIT: f64 = 0.8;
const AGGRESSIVE_LIMIT: f64 = 0.5;
const FINGERPRINT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub max_entries: usize,
    /// Total on-disk size above which cleanup turns aggressive.
    pub size_limit: u64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy {
            ttl: DEFAULT_CACHE_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
            size_limit: DEFAULT_SIZE_LIMIT,
        }
    }
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    path: &'a str,
    extensions: Vec<&'a str>,
    ignore: Vec<&'a str>,
    max_file_size: u64,
    show_hidden: bool,
    skip_binary_files: bool,
    version: u32,
}

/// Hex SHA-256 over the canonical request. Extension and ignore order do not
/// affect the key.
pub fn cache_key(request: &AnalysisRequest, options: &AnalysisOptions) -> String {
    let root = request.root_path.to_string_lossy();
    let mut extensions: Vec<&str> = request.extensions.iter().map(String::as_str).collect();
    extensions.sort_unstable();
    let mut ignore: Vec<&str> = request.ignore_patterns.iter().map(String::as_str).collect();
    ignore.sort_unstable();

    let material = KeyMaterial {
        path: &root,
        extensions,
        ignore,
        max_file_size: options.max_file_size,
        show_hidden: options.show_hidden,
        skip_binary_files: options.skip_binary_files,
        version: CACHE_SCHEMA_VERSION,
    };
    // Serializing a struct of strings, integers and bools cannot fail.
    let canonical = serde_json::to_vec(&material).unwrap_or_default();
    format!("{:x}", Sha256::digest(&canonical))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub timestamp: DateTime<Utc>,
    /// Newest modification time (epoch millis) seen under the root at save time.
    pub directory_fingerprint: i64,
    pub result: AnalysisResult,
    pub schema_version: u32,
}

#[derive(Deserialize)]
struct EntryHeader {
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub total_size: u64,
    pub cache_dir: PathBuf,
}

fn modified_millis(modified: std::io::Result<SystemTime>) -> i64 {
    modified
        .map(|time| DateTime::<Utc>::from(time).timestamp_millis())
        .unwrap_or(0)
}

/// Newest modification time under `root` in epoch milliseconds, covering
/// every file and directory. Symlinks are not followed. An unreadable root
/// yields "now", which invalidates whatever it is compared against.
pub async fn directory_fingerprint(root: &Path) -> i64 {
    let metadata = match tokio::fs::symlink_metadata(root).await {
        Ok(metadata) => metadata,
        Err(_) => return Utc::now().timestamp_millis(),
    };
    let mut latest = modified_millis(metadata.modified());
    if !metadata.is_dir() {
        return latest;
    }

    let mut stack = vec![root.to_path_buf()];
    let mut visited = 0usize;
    while let Some(dir) = stack.pop() {
        let Ok(mut read_dir) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            visited += 1;
            if visited % FINGERPRINT_BATCH_SIZE == 0 {
                tokio::task::yield_now().await;
            }
            let path = entry.path();
            let Ok(metadata) = tokio::fs::symlink_metadata(&path).await else {
                continue;
            };
            latest = latest.max(modified_millis(metadata.modified()));
            if metadata.is_dir() {
                stack.push(path);
            }
        }
    }
    latest
}

fn is_entry_file_name(name: &str) -> bool {
    name.strip_suffix(".json")
        .map(|stem| stem.len() == 64 && stem.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false)
}

struct EntryFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    policy: CachePolicy,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, policy: CachePolicy) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(CacheStore { dir, policy })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn is_expired(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(timestamp).num_milliseconds();
        let ttl = i64::try_from(self.policy.ttl.as_millis()).unwrap_or(i64::MAX);
        age > ttl
    }

    async fn discard(&self, path: &Path, why: &str) {
        debug!("discarding cache entry {}: {}", path.display(), why);
        let _ = tokio::fs::remove_file(path).await;
    }

    /// Look up a previous result. Expired, stale and unreadable entries are
    /// deleted and reported as a miss.
    pub async fn load(
        &self,
        request: &AnalysisRequest,
        options: &AnalysisOptions,
    ) -> Option<AnalysisResult> {
        self.maintain();

        let key = cache_key(request, options);
        let path = self.entry_path(&key);
        let entry: CacheEntry = match read_json_async(&path).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                debug!("cache miss for {}", request.root_path.display());
                return None;
            }
            Err(err) => {
                self.discard(&path, &err.to_string()).await;
                return None;
            }
        };

        if entry.schema_version != CACHE_SCHEMA_VERSION || entry.key != key {
            self.discard(&path, "schema mismatch").await;
            return None;
        }
        if self.is_expired(entry.timestamp, Utc::now()) {
            self.discard(&path, "expired").await;
            return None;
        }
        let current = directory_fingerprint(&request.root_path).await;
        if current > entry.directory_fingerprint {
            self.discard(&path, "directory modified").await;
            return None;
        }

        debug!("cache hit for {}", request.root_path.display());
        Some(entry.result)
    }

    pub async fn save(
        &self,
        request: &AnalysisRequest,
        options: &AnalysisOptions,
        result: &AnalysisResult,
    ) -> Result<()> {
        ensure_dir(&self.dir)?;
        let key = cache_key(request, options);
        let path = self.entry_path(&key);
        let entry = CacheEntry {
            directory_fingerprint: directory_fingerprint(&request.root_path).await,
            key,
            timestamp: Utc::now(),
            result: result.clone(),
            schema_version: CACHE_SCHEMA_VERSION,
        };
        write_json_atomic(&path, &entry)
            .map_err(|err| AnalysisError::io(ErrorCode::StateWrite, &path, &err))?;
        self.cleanup(self.stats().total_size > self.policy.size_limit);
        Ok(())
    }

    fn entry_files(&self) -> Vec<EntryFile> {
        let Ok(read_dir) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_entry_file_name(&entry.file_name().to_string_lossy()))
            .filter_map(|entry| {
                let metadata = entry.metadata().ok()?;
                Some(EntryFile {
                    path: entry.path(),
                    modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    size: metadata.len(),
                })
            })
            .collect()
    }

    /// Drop expired and unreadable entries, then evict the oldest files until
    /// at most 80% (50% when `aggressive`) of `max_entries` remain.
    pub fn cleanup(&self, aggressive: bool) -> CleanupReport {
        let now = Utc::now();
        let mut files = self.entry_files();
        files.sort_by_key(|file| file.modified);

        let mut report = CleanupReport::default();
        let mut remaining = Vec::with_capacity(files.len());
        for file in files {
            let expired = match read_json::<EntryHeader>(&file.path) {
                Ok(Some(header)) => self.is_expired(header.timestamp, now),
                _ => true,
            };
            if expired {
                if fs::remove_file(&file.path).is_ok() {
                    report.expired += 1;
                }
            } else {
                remaining.push(file);
            }
        }

        let fraction = if aggressive {
            AGGRESSIVE_LIMIT
        } else {
            SOFT_LIMIT
        };
        let threshold = (self.policy.max_entries as f64 * fraction) as usize;
        let excess = remaining.len().saturating_sub(threshold);
        for file in remaining.iter().take(excess) {
            if fs::remove_file(&file.path).is_ok() {
                report.evicted += 1;
            }
        }

        if report.expired + report.evicted > 0 {
            debug!(
                "cache cleanup removed {} expired and {} evicted entries",
                report.expired, report.evicted
            );
        }
        report
    }

    /// Cleanup triggered by entry count or total size, run before each load.
    pub fn maintain(&self) -> CleanupReport {
        let stats = self.stats();
        let mut report = CleanupReport::default();
        if stats.total_entries as f64 > self.policy.max_entries as f64 * SOFT_LIMIT {
            report = self.cleanup(false);
        }
        if stats.total_size > self.policy.size_limit {
            let aggressive = self.cleanup(true);
            report.expired += aggressive.expired;
            report.evicted += aggressive.evicted;
        }
        report
    }

    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let files = self.entry_files();
        let valid_entries = files
            .iter()
            .filter(|file| match read_json::<EntryHeader>(&file.path) {
                Ok(Some(header)) => !self.is_expired(header.timestamp, now),
                _ => false,
            })
            .count();
        CacheStats {
            total_entries: files.len(),
            valid_entries,
            total_size: files.iter().map(|file| file.size).sum(),
            cache_dir: self.dir.clone(),
        }
    }

    /// Remove every cache entry. Stats and history documents are kept.
    pub fn clear(&self) -> usize {
        self.entry_files()
            .iter()
            .filter(|file| fs::remove_file(&file.path).is_ok())
            .count()
    }
}
