//! Persisted worksheet shape and the storage collaborator interface.

use serde::{Deserialize, Serialize};

use crate::cell::{CellId, CellKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorksheetSnapshot {
    pub id: String,
    #[serde(default)]
    pub last_id: CellId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cells: Vec<CellSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub id: CellId,
    #[serde(rename = "type")]
    pub kind: CellKind,
    #[serde(default)]
    pub input: String,
    /// Rendered HTML output (see `Output::to_html`).
    #[serde(default)]
    pub output: String,
}

/// Key-value persistence for worksheet snapshots.
///
/// The engine only produces and consumes [`WorksheetSnapshot`] values; where
/// they live is up to the implementation.
pub trait SnapshotStore {
    fn is_new(&self, id: &str) -> bool;

    fn load(&self, id: &str) -> anyhow::Result<Option<WorksheetSnapshot>>;

    fn save(&self, snapshot: &WorksheetSnapshot) -> anyhow::Result<()>;
}
