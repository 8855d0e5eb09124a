//! Worksheet snapshots as JSON files.
//!
//! Each worksheet lives in `<data dir>/wsheet/<id>.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use tokio::task::JoinHandle;
use worksheet_engine::{SnapshotStore, WorksheetHandle, WorksheetSnapshot};

/// Get the default directory for stored worksheets
pub fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wsheet")
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for a worksheet id. Anything outside `[A-Za-z0-9_-]` becomes `_`
    /// so an id can never escape the store directory.
    pub fn path_for(&self, id: &str) -> PathBuf {
        let name: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl SnapshotStore for JsonFileStore {
    fn is_new(&self, id: &str) -> bool {
        !self.path_for(id).exists()
    }

    fn load(&self, id: &str) -> Result<Option<WorksheetSnapshot>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &WorksheetSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path_for(&snapshot.id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        debug!("[store] Saved {} to {}", snapshot.id, path.display());
        Ok(())
    }
}

/// Periodically save the worksheet behind `handle`, skipping unchanged
/// snapshots. Stops when the engine goes away.
pub fn spawn_autosave(
    handle: WorksheetHandle,
    store: JsonFileStore,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        let mut last_saved: Option<WorksheetSnapshot> = None;
        loop {
            ticker.tick().await;
            let Ok(snapshot) = handle.snapshot().await else {
                debug!("[store] Engine stopped, ending autosave");
                return;
            };
            if last_saved.as_ref() == Some(&snapshot) {
                continue;
            }
            match store.save(&snapshot) {
                Ok(()) => last_saved = Some(snapshot),
                Err(e) => warn!("[store] Autosave failed: {:#}", e),
            }
        }
    })
}
