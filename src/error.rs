use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Discriminant for [`AnalysisError::Failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    FileNotFound,
    NotAFile,
    NotADirectory,
    FileAnalysis,
    CacheUnavailable,
    StateWrite,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::NotAFile => "NOT_A_FILE",
            ErrorCode::NotADirectory => "NOT_A_DIRECTORY",
            ErrorCode::FileAnalysis => "FILE_ANALYSIS_ERROR",
            ErrorCode::CacheUnavailable => "CACHE_UNAVAILABLE",
            ErrorCode::StateWrite => "STATE_WRITE_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions surfaced to callers. Everything else is absorbed into skip counters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("file \"{}\" is too large ({size} bytes > {limit} bytes)", .path.display())]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    #[error("cannot analyze binary file \"{}\"", .path.display())]
    BinaryFile { path: PathBuf },

    #[error("maximum recursion depth exceeded at \"{}\"", .path.display())]
    RecursionDepthExceeded { path: PathBuf },

    #[error("access denied to \"{}\"", .path.display())]
    AccessDenied { path: PathBuf },

    #[error("{message} ({code})")]
    Failure { message: String, code: ErrorCode },
}

impl AnalysisError {
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        AnalysisError::Failure {
            message: message.into(),
            code,
        }
    }

    /// Wraps an I/O error that occurred while touching `path`.
    pub fn io(code: ErrorCode, path: &Path, err: &io::Error) -> Self {
        AnalysisError::failure(code, format!("{}: {}", path.display(), err))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            AnalysisError::BinaryFile { .. } => "BINARY_FILE",
            AnalysisError::RecursionDepthExceeded { .. } => "RECURSION_DEPTH_EXCEEDED",
            AnalysisError::AccessDenied { .. } => "ACCESS_DENIED",
            AnalysisError::Failure { code, .. } => code.as_str(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
