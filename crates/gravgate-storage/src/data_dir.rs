use std::path::{Path, PathBuf};

use crate::store::StoreError;

pub fn resolve_data_dir(cli_value: &str) -> String {
    if !cli_value.trim().is_empty() {
        return cli_value.to_string();
    }
    if let Ok(value) = std::env::var("GRAVGATE_DATA_DIR")
        && !value.trim().is_empty()
    {
        return value;
    }
    "./data".to_string()
}

/// Root of the gateway's persisted state. Holds the four file paths and
/// ensures the directory exists before anything touches it.
#[derive(Debug, Clone)]
pub struct DataDir {
    base: PathBuf,
}

impl DataDir {
    pub async fn ensure(base: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base = base.into();
        tokio::fs::create_dir_all(&base)
            .await
            .map_err(|err| StoreError::Io {
                path: base.clone(),
                source: err,
            })?;
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn accounts(&self) -> PathBuf {
        self.base.join("accounts.json")
    }

    pub fn api_keys(&self) -> PathBuf {
        self.base.join("api_keys.json")
    }

    pub fn app_logs(&self) -> PathBuf {
        self.base.join("app_logs.json")
    }

    pub fn config(&self) -> PathBuf {
        self.base.join("config.json")
    }
}
