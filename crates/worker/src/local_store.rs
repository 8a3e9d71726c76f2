//! Notebook source backed by a local file, for dev mode.
//!
//! The derived configuration lives next to the notebook in
//! `<file>.livenb.json`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use livenb_core::error::CoreError;
use livenb_core::notebook::{Notebook, NotebookConfig, NotebookSource};
use livenb_core::store::NotebookStore;
use livenb_core::types::DbId;

pub struct FileNotebookStore {
    path: PathBuf,
}

impl FileNotebookStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn config_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".livenb.json");
        PathBuf::from(name)
    }
}

async fn read_config(path: &Path) -> Result<NotebookConfig, CoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => serde_json::from_str(&text).map_err(|e| {
            CoreError::Validation(format!("Malformed config {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(NotebookConfig::default()),
        Err(e) => Err(CoreError::capability("notebook-source", e)),
    }
}

#[async_trait]
impl NotebookStore for FileNotebookStore {
    async fn load(&self, notebook_id: DbId) -> Result<NotebookSource, CoreError> {
        let notebook = Notebook::from_path(&self.path).await?;
        let config = read_config(&self.config_path()).await?;
        Ok(NotebookSource {
            notebook_id,
            owner_id: None,
            notebook,
            config,
        })
    }

    async fn save_config(
        &self,
        _notebook_id: DbId,
        config: &NotebookConfig,
    ) -> Result<(), CoreError> {
        let text = serde_json::to_string_pretty(config)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        tokio::fs::write(self.config_path(), text)
            .await
            .map_err(|e| CoreError::capability("notebook-source", e))
    }
}
