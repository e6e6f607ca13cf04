//! Whole-document JSON persistence shared by the cache, stats and history
//! stores. Writes go to a sibling temporary file that is renamed into place.

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AnalysisError, ErrorCode, Result};

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec(value).map_err(io::Error::other)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()));
    fs::write(&tmp, &bytes)?;

    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path)?;
        }
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

/// Parse `path` as JSON. `Ok(None)` when the file does not exist; parse
/// failures are reported as `InvalidData`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// [`read_json`] over `tokio::fs`, for lookups on the async path.
pub async fn read_json_async<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Create the state directory, the one failure that is fatal to a run.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|err| AnalysisError::io(ErrorCode::CacheUnavailable, dir, &err))
}

/// One named JSON document inside a state directory. Missing or unreadable
/// documents load as `T::default()`.
#[derive(Debug, Clone)]
pub struct JsonDocument<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonDocument<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(dir: &Path, file_name: &str) -> Self {
        JsonDocument {
            path: dir.join(file_name),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> T {
        read_json(&self.path).ok().flatten().unwrap_or_default()
    }

    pub fn save(&self, value: &T) -> Result<()> {
        write_json_atomic(&self.path, value)
            .map_err(|err| AnalysisError::io(ErrorCode::StateWrite, &self.path, &err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_document_round_trip_and_defaults() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let doc: JsonDocument<Vec<String>> = JsonDocument::new(temp_dir.path(), "projects.json");
        assert!(doc.load().is_empty(), "missing document loads as default");

        doc.save(&vec!["/a".to_string()]).expect("save");
        assert_eq!(doc.load(), vec!["/a".to_string()]);

        fs::write(doc.path(), "{ not json")?;
        assert!(doc.load().is_empty(), "corrupt document loads as default");
        Ok(())
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("doc.json");
        write_json_atomic(&path, &vec![1, 2, 3])?;
        write_json_atomic(&path, &vec![4])?;
        let names: Vec<_> = fs::read_dir(temp_dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["doc.json"]);
        assert_eq!(read_json::<Vec<i32>>(&path)?, Some(vec![4]));
        Ok(())
    }

    #[tokio::test]
    async fn test_async_read_matches_blocking_read() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("doc.json");
        assert_eq!(read_json_async::<Vec<i32>>(&path).await?, None);
        write_json_atomic(&path, &vec![7, 8])?;
        assert_eq!(read_json_async::<Vec<i32>>(&path).await?, Some(vec![7, 8]));
        fs::write(&path, "{")?;
        let err = read_json_async::<Vec<i32>>(&path).await.expect_err("invalid json");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        Ok(())
    }

    #[test]
    fn test_read_json_reports_invalid_data() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "[1,")?;
        let err = read_json::<Vec<i32>>(&path).expect_err("invalid json");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(read_json::<Vec<i32>>(&temp_dir.path().join("none.json"))?, None);
        Ok(())
    }
}
