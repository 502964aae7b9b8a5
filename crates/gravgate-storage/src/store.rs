use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One JSON-encoded file. Writes go write-temp-then-rename under the file
/// mutex; a missing file decodes to `T::default()`, a corrupt existing file
/// fails loudly.
#[derive(Debug)]
pub struct JsonFile<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<T, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(T::default());
            }
            Err(err) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: err,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|err| StoreError::Decode {
            path: self.path.clone(),
            source: err,
        })
    }

    pub async fn write(&self, value: &T) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(value).map_err(|err| StoreError::Encode {
            path: self.path.clone(),
            source: err,
        })?;

        let _guard = self.lock.lock().await;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|err| StoreError::Io {
                path: tmp.clone(),
                source: err,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|err| StoreError::Io {
                path: self.path.clone(),
                source: err,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Vec<String>> = JsonFile::new(dir.path().join("absent.json"));
        assert!(file.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Vec<String>> = JsonFile::new(dir.path().join("list.json"));
        file.write(&vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(file.load().await.unwrap(), vec!["a", "b"]);
        // No leftover temp file after the rename.
        assert!(!dir.path().join("list.json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_existing_file_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        let file: JsonFile<Vec<String>> = JsonFile::new(&path);
        assert!(matches!(
            file.load().await,
            Err(StoreError::Decode { .. })
        ));
    }
}
