use bytes::Bytes;
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    codec,
    error::{MountError, Result},
    session::Session,
    store::PresetStore,
    types::{CharacteristicRole, Preset, PresetEntry, PresetOption},
};

/// Title of the placeholder option shown when no presets are stored
pub const NO_PRESETS_TITLE: &str = "None";

/// Presets stored on the mount
///
/// The list is read once after connecting and re-read only by an explicit
/// [`load`](Self::load). Selecting a preset replays its move command.
pub struct PresetCatalog {
    session: Session,
    store: Arc<dyn PresetStore>,
    presets: RwLock<Vec<Preset>>,
    deferred_disconnect: Duration,
}

impl std::fmt::Debug for PresetCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresetCatalog")
            .field("session", &self.session)
            .field("deferred_disconnect", &self.deferred_disconnect)
            .finish_non_exhaustive()
    }
}

impl PresetCatalog {
    /// Create an empty catalog
    pub fn new(
        session: Session,
        store: Arc<dyn PresetStore>,
        deferred_disconnect: Duration,
    ) -> Self {
        Self {
            session,
            store,
            presets: RwLock::new(Vec::new()),
            deferred_disconnect,
        }
    }

    /// Read every preset slot and replace the catalog
    ///
    /// Slots that fail to read or do not hold a valid preset are skipped.
    /// Returns the number of presets loaded.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the slot list cannot be resolved; the
    /// current catalog is kept in that case.
    pub async fn load(&self) -> Result<usize> {
        info!("Loading presets from MotionMount");
        self.session.connect().await?;

        let mut presets = Vec::new();
        for (slot, uuid) in self.session.preset_candidates().await {
            let buf = match self.session.read(CharacteristicRole::PresetSlot(slot)).await {
                Ok(buf) => buf,
                Err(e) => {
                    warn!("Error reading preset characteristic {}: {}", uuid, e);
                    continue;
                }
            };

            let Some(record) = codec::parse_preset_buffer(&buf) else {
                debug!("Slot {:#04x} holds no preset", slot);
                continue;
            };

            let name = record
                .name
                .unwrap_or_else(|| format!("Preset {}", presets.len()));
            presets.push(Preset {
                name,
                move_buffer: record.move_buffer,
                source: uuid,
                slot,
            });
        }

        info!(
            "Presets loaded: {}",
            presets
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let count = presets.len();
        *self.presets.write().await = presets;
        Ok(count)
    }

    /// Move to the preset at `index`
    ///
    /// Writes the preset's move command, schedules a disconnect after the
    /// deferred-disconnect delay and stores `index` as the last selection.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::IndexOutOfRange`] if `index` does not address a
    /// loaded preset, or the session error if the write fails.
    pub async fn select(&self, index: usize) -> Result<Preset> {
        let preset = {
            let presets = self.presets.read().await;
            presets
                .get(index)
                .cloned()
                .ok_or(MountError::IndexOutOfRange {
                    index,
                    len: presets.len(),
                })?
        };

        info!("Going to preset {} {}", index, preset.name);
        if let Err(e) = self
            .session
            .write(
                CharacteristicRole::Move,
                Bytes::copy_from_slice(&preset.move_buffer),
            )
            .await
        {
            warn!("Error writing preset move buffer: {}", e);
            return Err(e);
        }

        self.session.disconnect_after(self.deferred_disconnect);

        if let Err(e) = self.store.save_last_preset(index).await {
            warn!("Error storing last preset index: {}", e);
        }

        Ok(preset)
    }

    /// Presets whose name contains `query`, ignoring case
    ///
    /// An empty query matches everything. Ids are catalog indices.
    pub async fn search(&self, query: &str) -> Vec<PresetEntry> {
        let search = query.to_lowercase();
        self.presets
            .read()
            .await
            .iter()
            .enumerate()
            .filter(|(_, preset)| search.is_empty() || preset.name.to_lowercase().contains(&search))
            .map(|(index, preset)| PresetEntry {
                id: index.to_string(),
                name: preset.name.clone(),
            })
            .collect()
    }

    /// Options for the preset picker
    ///
    /// An empty catalog yields a single placeholder option.
    pub async fn options(&self) -> Vec<PresetOption> {
        let presets = self.presets.read().await;
        if presets.is_empty() {
            return vec![PresetOption {
                id: "0".to_string(),
                title: NO_PRESETS_TITLE.to_string(),
            }];
        }

        presets
            .iter()
            .enumerate()
            .map(|(index, preset)| PresetOption {
                id: index.to_string(),
                title: preset.name.clone(),
            })
            .collect()
    }

    /// Index the picker should show after a (re)load
    ///
    /// The stored selection, or 0 when nothing valid is stored.
    pub async fn restored_selection(&self) -> usize {
        let stored = match self.store.load_last_preset().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Error loading last preset index: {}", e);
                None
            }
        };

        let len = self.len().await;
        stored.filter(|index| *index < len).unwrap_or(0)
    }

    /// Snapshot of the loaded presets
    pub async fn presets(&self) -> Vec<Preset> {
        self.presets.read().await.clone()
    }

    /// Preset at `index`
    pub async fn get(&self, index: usize) -> Option<Preset> {
        self.presets.read().await.get(index).cloned()
    }

    /// Number of loaded presets
    pub async fn len(&self) -> usize {
        self.presets.read().await.len()
    }

    /// Whether no presets are loaded
    pub async fn is_empty(&self) -> bool {
        self.presets.read().await.is_empty()
    }
}
