use std::path::Path;

use tokio::io::AsyncReadExt;

const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "jpg", "jpeg", "png", "gif", "bmp", "ico", "webp", "tif", "tiff", "pdf",
    // archives
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar", "jar",
    // executables and libraries
    "exe", "dll", "so", "dylib", "o", "a", "lib", "class", "wasm",
];

pub fn has_binary_extension(extension: &str) -> bool {
    let ext = extension.to_ascii_lowercase();
    BINARY_EXTENSIONS.contains(&ext.as_str())
}

/// Fraction of `sample` made of control bytes other than tab, LF and CR.
/// Any NUL byte makes the sample binary outright.
pub fn sample_looks_binary(sample: &[u8], threshold: f64) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let control = sample
        .iter()
        .filter(|&&b| b < 32 && b != b'\t' && b != b'\n' && b != b'\r')
        .count();
    (control as f64 / sample.len() as f64) > threshold
}

/// Decide whether a file is binary, by extension first and then by sampling
/// up to `sample_size` leading bytes. Unreadable files count as text; the
/// caller reports the read failure itself.
pub async fn is_binary(path: &Path, extension: &str, sample_size: usize, threshold: f64) -> bool {
    if has_binary_extension(extension) {
        return true;
    }
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(_) => return false,
    };
    let mut sample = Vec::with_capacity(sample_size);
    if file
        .take(sample_size as u64)
        .read_to_end(&mut sample)
        .await
        .is_err()
    {
        return false;
    }
    sample_looks_binary(&sample, threshold)
}
