use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// Persistence for the index of the last selected preset
#[async_trait]
pub trait PresetStore: Send + Sync {
    /// Load the stored index, if any
    async fn load_last_preset(&self) -> Result<Option<usize>>;

    /// Store `index` as the last selected preset
    async fn save_last_preset(&self, index: usize) -> Result<()>;
}

/// Store that keeps the index in memory only
#[derive(Debug, Default)]
pub struct MemoryStore {
    last_preset: Mutex<Option<usize>>,
}

#[async_trait]
impl PresetStore for MemoryStore {
    async fn load_last_preset(&self) -> Result<Option<usize>> {
        Ok(*self.last_preset.lock().await)
    }

    async fn save_last_preset(&self, index: usize) -> Result<()> {
        *self.last_preset.lock().await = Some(index);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(rename = "lastPresetIndex", default)]
    last_preset_index: Option<usize>,
}

/// Store backed by a JSON file
///
/// A missing file reads as "nothing stored".
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_file(&self) -> Result<StoreFile> {
        match tokio::fs::read(&self.path).await {
            Ok(contents) => Ok(serde_json::from_slice(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreFile::default()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl PresetStore for JsonFileStore {
    async fn load_last_preset(&self) -> Result<Option<usize>> {
        Ok(self.read_file().await?.last_preset_index)
    }

    async fn save_last_preset(&self, index: usize) -> Result<()> {
        let mut file = self.read_file().await?;
        file.last_preset_index = Some(index);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(&file)?).await?;
        debug!("Stored last preset {} in {}", index, self.path.display());
        Ok(())
    }
}
