//! File consumption: buffered for ordinary files, line-streamed above the
//! streaming threshold, both feeding the same [`LineClassifier`].

use std::io;
use std::path::Path;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::language::{classify_text, CommentRules, LineClassifier, LineCounts};
use crate::options::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct ReadLimits {
    pub max_file_size: u64,
    pub streaming_threshold: u64,
    pub cancellation_check_interval: usize,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("file is too large ({size} bytes > {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },
    #[error("access denied")]
    AccessDenied,
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl ReadError {
    fn from_io(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            ReadError::AccessDenied
        } else {
            ReadError::Io(err)
        }
    }
}

/// Result of reading one file. `cancelled` is set when a streamed read
/// stopped early; `counts` then covers only the lines seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRead {
    pub counts: LineCounts,
    pub cancelled: bool,
}

/// Decode bytes as UTF-8, falling back to Latin-1 where every byte maps to
/// the code point of the same value.
pub fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

pub async fn read_buffered(
    path: &Path,
    rules: &'static CommentRules,
) -> Result<LineCounts, ReadError> {
    let bytes = tokio::fs::read(path).await.map_err(ReadError::from_io)?;
    Ok(classify_text(&decode_text(bytes), rules))
}

pub async fn read_streaming(
    path: &Path,
    rules: &'static CommentRules,
    check_interval: usize,
    cancel: &CancellationToken,
) -> Result<FileRead, ReadError> {
    let file = tokio::fs::File::open(path).await.map_err(ReadError::from_io)?;
    let mut reader = BufReader::new(file);
    let mut classifier = LineClassifier::new(rules);
    let mut buffer = Vec::with_capacity(8 * 1024);
    let interval = check_interval.max(1) as u64;

    loop {
        buffer.clear();
        let read = reader
            .read_until(b'\n', &mut buffer)
            .await
            .map_err(|err| ReadError::Stream(err.to_string()))?;
        if read == 0 {
            break;
        }
        if buffer.last() == Some(&b'\n') {
            buffer.pop();
        }
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
        let line = std::str::from_utf8(&buffer)
            .map_err(|err| ReadError::Stream(format!("invalid UTF-8: {}", err)))?;
        classifier.push_line(line);

        if classifier.counts().total % interval == 0 && cancel.is_cancelled() {
            return Ok(FileRead {
                counts: classifier.finish(),
                cancelled: true,
            });
        }
    }

    Ok(FileRead {
        counts: classifier.finish(),
        cancelled: false,
    })
}

/// Count the lines of `path`, whose size the caller already knows.
pub async fn read_file(
    path: &Path,
    size: u64,
    rules: &'static CommentRules,
    limits: &ReadLimits,
    cancel: &CancellationToken,
) -> Result<FileRead, ReadError> {
    if size > limits.max_file_size {
        return Err(ReadError::TooLarge {
            size,
            limit: limits.max_file_size,
        });
    }

    if size > limits.streaming_threshold {
        match read_streaming(path, rules, limits.cancellation_check_interval, cancel).await {
            Ok(read) => return Ok(read),
            Err(ReadError::AccessDenied) => return Err(ReadError::AccessDenied),
            Err(err) => {
                debug!(
                    "streaming read of {} failed, falling back to a full read: {}",
                    path.display(),
                    err
                );
            }
        }
    }

    let counts = read_buffered(path, rules).await?;
    Ok(FileRead {
        counts,
        cancelled: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::rules_for_extension;
    use std::fs;
    use tempfile::TempDir;

    fn limits(streaming_threshold: u64) -> ReadLimits {
        ReadLimits {
            max_file_size: 10 * 1024 * 1024,
            streaming_threshold,
            cancellation_check_interval: 2,
        }
    }

    #[tokio::test]
    async fn test_streaming_and_buffered_paths_agree() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("mixed.groovy");
        let content = concat!(
            "/* a\n\"\"\" inside c-block\n*/\n",
            "\"\"\"\n*/ not the end\n\"\"\"\n",
            "\n  def x = 1\n// tail\n"
        );
        fs::write(&path, content)?;
        let rules = rules_for_extension("groovy");
        let size = content.len() as u64;
        let token = CancellationToken::new();

        let buffered = read_file(&path, size, rules, &limits(u64::MAX), &token)
            .await
            .expect("buffered read");
        let streamed = read_file(&path, size, rules, &limits(0), &token)
            .await
            .expect("streamed read");
        assert_eq!(buffered, streamed);
        assert_eq!(buffered.counts.total, 9);
        assert_eq!(buffered.counts.comment, 7, "counts: {:?}", buffered.counts);
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_file_is_never_read() {
        let token = CancellationToken::new();
        let missing = Path::new("/definitely/not/here.js");
        let limits = ReadLimits {
            max_file_size: 10,
            streaming_threshold: 5,
            cancellation_check_interval: 1000,
        };
        let err = read_file(missing, 11, rules_for_extension("js"), &limits, &token)
            .await
            .expect_err("should be rejected by size");
        assert!(matches!(err, ReadError::TooLarge { size: 11, limit: 10 }));
    }

    #[tokio::test]
    async fn test_invalid_utf8_falls_back_to_latin1() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("legacy.c");
        fs::write(&path, b"// caf\xe9\nint x;\n")?;
        let token = CancellationToken::new();
        // Streaming rejects the line and the buffered fallback decodes it.
        let read = read_file(&path, 15, rules_for_extension("c"), &limits(0), &token)
            .await
            .expect("read with fallback");
        assert_eq!(read.counts.comment, 1);
        assert_eq!(read.counts.code, 1);
        assert_eq!(decode_text(b"caf\xe9".to_vec()), "caf\u{e9}");
        Ok(())
    }

    #[tokio::test]
    async fn test_streaming_stops_on_cancellation() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("long.js");
        let content = "let a = 1;\n".repeat(10);
        fs::write(&path, &content)?;
        let token = CancellationToken::new();
        token.cancel();
        let read = read_streaming(&path, rules_for_extension("js"), 4, &token)
            .await
            .expect("streamed read");
        assert!(read.cancelled);
        assert_eq!(read.counts.total, 4, "stops at the first check point");
        Ok(())
    }

    #[test]
    fn test_permission_denied_maps_to_access_denied() {
        let denied = ReadError::from_io(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(denied, ReadError::AccessDenied));
        let missing = ReadError::from_io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(missing, ReadError::Io(_)));
    }

    #[tokio::test]
    async fn test_missing_file_reports_io_error() {
        let err = read_buffered(Path::new("/no/such/file.rs"), rules_for_extension("rs"))
            .await
            .expect_err("missing file");
        assert!(matches!(err, ReadError::Io(_)));
    }
}
