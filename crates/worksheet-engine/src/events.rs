//! Events published to observers (the rendering / front-end layer).
//!
//! The engine never renders anything itself. Observers keep their own view
//! of the worksheet up to date from this stream and feed user actions back
//! through [`crate::WorksheetHandle`].

use log::debug;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::cell::{CellId, ExecState};
use crate::connection::ConnectionState;
use crate::inspect::{PaneView, View};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorksheetEvent {
    ConnectionChanged {
        state: ConnectionState,
    },

    /// Reconnect countdown tick while disconnected.
    ReconnectCountdown {
        seconds_left: u64,
    },

    /// Countdown elapsed or "try now": an attempt is in flight.
    Reconnecting,

    /// Mirrors `Worksheet::server_available` for "disconnected" styling.
    ServerAvailability {
        available: bool,
    },

    CellStateChanged {
        cell: CellId,
        state: ExecState,
    },

    OutputAppended {
        cell: CellId,
        tag: String,
        text: String,
    },

    OutputCleared {
        cell: CellId,
    },

    /// The running code is blocked reading stdin.
    StdinRequested {
        cell: CellId,
    },

    InterruptFailed {
        cell: CellId,
    },

    InteractOpened {
        cell: CellId,
        widget: String,
        labels: Vec<String>,
    },

    InteractClosed {
        cell: CellId,
        widget: String,
    },

    InspectUpdated {
        cell: CellId,
        view: View,
        word: String,
        pane: PaneView,
    },

    InspectClosed {
        cell: CellId,
    },

    /// A completion was written into the cell input.
    CompletionApplied {
        cell: CellId,
        line: usize,
        content: String,
        cursor: usize,
    },
}

/// Cheap clonable sender for [`WorksheetEvent`]s.
///
/// Sending never fails: with no observer attached, events are dropped.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<WorksheetEvent>>,
}

impl Notifier {
    pub fn new(tx: mpsc::UnboundedSender<WorksheetEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A notifier with no observer.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: WorksheetEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("[session] Event observer dropped");
            }
        }
    }
}
