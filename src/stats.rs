//! Cumulative usage counters and one-time milestones.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::report::AnalysisResult;
use crate::store::{ensure_dir, JsonDocument};

pub const USER_STATS_FILE: &str = "user-stats.json";
pub const PROJECTS_FILE: &str = "analyzed-projects.json";
pub const MAX_MILESTONES: usize = 1000;

const LINES_THRESHOLDS: &[u64] = &[
    1_000, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 500_000, 1_000_000,
];
const FILES_THRESHOLDS: &[u64] = &[10, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];
const PROJECTS_THRESHOLDS: &[u64] = &[1, 5, 10, 25, 50, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneKind {
    LinesAnalyzed,
    FilesAnalyzed,
    ProjectsAnalyzed,
}

impl MilestoneKind {
    pub const ALL: [MilestoneKind; 3] = [
        MilestoneKind::LinesAnalyzed,
        MilestoneKind::FilesAnalyzed,
        MilestoneKind::ProjectsAnalyzed,
    ];

    pub fn thresholds(self) -> &'static [u64] {
        match self {
            MilestoneKind::LinesAnalyzed => LINES_THRESHOLDS,
            MilestoneKind::FilesAnalyzed => FILES_THRESHOLDS,
            MilestoneKind::ProjectsAnalyzed => PROJECTS_THRESHOLDS,
        }
    }

    pub fn describe(self, threshold: u64) -> String {
        match self {
            MilestoneKind::LinesAnalyzed => {
                format!("Analyze {} lines of code", group_thousands(threshold))
            }
            MilestoneKind::FilesAnalyzed => format!("Analyze {} files", group_thousands(threshold)),
            MilestoneKind::ProjectsAnalyzed => format!("Analyze {} projects", threshold),
        }
    }
}

impl fmt::Display for MilestoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MilestoneKind::LinesAnalyzed => "lines analyzed",
            MilestoneKind::FilesAnalyzed => "files analyzed",
            MilestoneKind::ProjectsAnalyzed => "projects analyzed",
        };
        f.write_str(label)
    }
}

/// `1234567` -> `1,234,567`.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    #[serde(rename = "type")]
    pub kind: MilestoneKind,
    pub threshold: u64,
    pub achieved_at: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_lines_analyzed: u64,
    pub total_files_analyzed: u64,
    pub total_projects_analyzed: u64,
    pub analyses_completed: u64,
    pub cache_hits: u64,
    pub milestones: Vec<Milestone>,
    pub last_updated: DateTime<Utc>,
}

impl Default for UserStats {
    fn default() -> Self {
        UserStats {
            total_lines_analyzed: 0,
            total_files_analyzed: 0,
            total_projects_analyzed: 0,
            analyses_completed: 0,
            cache_hits: 0,
            milestones: Vec::new(),
            last_updated: Utc::now(),
        }
    }
}

impl UserStats {
    fn value_for(&self, kind: MilestoneKind) -> u64 {
        match kind {
            MilestoneKind::LinesAnalyzed => self.total_lines_analyzed,
            MilestoneKind::FilesAnalyzed => self.total_files_analyzed,
            MilestoneKind::ProjectsAnalyzed => self.total_projects_analyzed,
        }
    }

    fn has_milestone(&self, kind: MilestoneKind, threshold: u64) -> bool {
        self.milestones
            .iter()
            .any(|m| m.kind == kind && m.threshold == threshold)
    }

    /// Record every newly reached threshold and return the new milestones.
    fn award_milestones(&mut self, now: DateTime<Utc>) -> Vec<Milestone> {
        let mut awarded = Vec::new();
        for kind in MilestoneKind::ALL {
            let value = self.value_for(kind);
            for &threshold in kind.thresholds() {
                if value >= threshold && !self.has_milestone(kind, threshold) {
                    let milestone = Milestone {
                        kind,
                        threshold,
                        achieved_at: now,
                        description: kind.describe(threshold),
                    };
                    self.milestones.push(milestone.clone());
                    awarded.push(milestone);
                }
            }
        }
        if self.milestones.len() > MAX_MILESTONES {
            let excess = self.milestones.len() - MAX_MILESTONES;
            self.milestones.drain(..excess);
        }
        awarded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsUpdate {
    pub stats: UserStats,
    pub new_milestones: Vec<Milestone>,
}

#[derive(Debug, Clone)]
pub struct StatsTracker {
    stats: JsonDocument<UserStats>,
    projects: JsonDocument<BTreeSet<String>>,
}

impl StatsTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self::in_dir(&dir))
    }

    fn in_dir(dir: &Path) -> Self {
        StatsTracker {
            stats: JsonDocument::new(dir, USER_STATS_FILE),
            projects: JsonDocument::new(dir, PROJECTS_FILE),
        }
    }

    pub fn current(&self) -> UserStats {
        self.stats.load()
    }

    pub fn projects(&self) -> BTreeSet<String> {
        self.projects.load()
    }

    /// Fold one run into the cumulative counters. A cache hit only bumps
    /// `cache_hits`.
    pub fn update(&self, result: &AnalysisResult, from_cache: bool) -> Result<StatsUpdate> {
        let now = Utc::now();
        let mut stats = self.stats.load();

        if from_cache {
            stats.cache_hits += 1;
        } else {
            stats.total_lines_analyzed += result.total_lines;
            stats.total_files_analyzed += result.total_files;
            stats.analyses_completed += 1;

            let mut projects = self.projects.load();
            if projects.insert(result.root_path.clone()) {
                self.projects.save(&projects)?;
            }
            stats.total_projects_analyzed = projects.len() as u64;
        }

        let new_milestones = stats.award_milestones(now);
        stats.last_updated = now;
        self.stats.save(&stats)?;
        Ok(StatsUpdate {
            stats,
            new_milestones,
        })
    }
}
