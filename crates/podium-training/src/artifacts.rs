use crate::error::{TrainingError, TrainingResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Copy `src` to `dest` and return the SHA-256 of the written copy.
pub fn copy_verified(src: &Path, dest: &Path) -> TrainingResult<String> {
    if !src.is_file() {
        return Err(TrainingError::Artifact(format!(
            "artifact path does not exist: {}",
            src.display()
        )));
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, dest)?;

    let expected = sha256_file(src)?;
    let actual = sha256_file(dest)?;
    if expected != actual {
        return Err(TrainingError::Artifact(format!(
            "checksum mismatch copying {} to {}",
            src.display(),
            dest.display()
        )));
    }
    Ok(actual)
}

/// Write pretty JSON through a temp file + rename so readers never observe a
/// half-written record.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
