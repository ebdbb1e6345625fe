//! JSON file persistence -- atomic writes and file-backed key-value stores.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::providers::KeyValueStore;

/// Write `value` as pretty JSON to `path` through a temp file in the same
/// directory followed by a rename. Readers never observe a partial file.
pub fn atomic_write_json(path: &Path, value: &Value) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("no parent directory for {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let file_name = path
        .file_name()
        .with_context(|| format!("no file name in {}", path.display()))?
        .to_string_lossy()
        .into_owned();
    let tmp = parent.join(format!(".{file_name}.tmp"));

    let bytes = serde_json::to_vec_pretty(value).context("failed to serialize JSON")?;
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;

    Ok(())
}

/// One JSON file acting as a persistent key-value store, in the spirit of
/// the host platform's `.storage` helpers. Absent and corrupt files both
/// read as "nothing stored".
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn load(&self) -> Result<Option<Value>> {
        let path = self.path.clone();
        let content = tokio::task::spawn_blocking(move || match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
        .await?
        .context("store read failed")?;

        let Some(content) = content else {
            return Ok(None);
        };

        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "store file is corrupt, treating as empty");
                Ok(None)
            }
        }
    }

    async fn save(&self, value: &Value) -> Result<()> {
        let path = self.path.clone();
        let value = value.clone();
        tokio::task::spawn_blocking(move || atomic_write_json(&path, &value)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("store.json"));

        assert!(store.load().await.unwrap().is_none());

        let value = json!({"current_sensitivity": 3.5});
        store.save(&value).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(path);
        assert!(store.load().await.unwrap().is_none());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        atomic_write_json(&path, &json!({"a": 1})).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out.json".to_string()]);
    }
}
