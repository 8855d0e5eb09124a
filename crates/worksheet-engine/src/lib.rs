//! worksheet-engine - Client-side engine for a browser-style code worksheet.
//!
//! The engine keeps one WebSocket connection to a remote execution server,
//! correlates numbered requests with their replies, and drives each cell
//! through its execution states (computing, interrupting, killing, waiting
//! for stdin). Completions, documentation and source lookups are shown in a
//! per-cell introspection session; interact widgets re-evaluate on control
//! changes after a debounce.
//!
//! Front ends call [`start`] and then talk to the engine through a
//! [`WorksheetHandle`], rendering the [`WorksheetEvent`] stream it returns.

pub mod cell;
pub mod completion_grid;
pub mod connection;
pub mod correlator;
pub mod events;
pub mod inspect;
pub mod interact;
pub mod output;
pub mod protocol;
pub mod reconnect;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod timer;
pub mod worksheet;

pub use cell::{CellId, CellKind, ExecState};
pub use connection::ConnectionState;
pub use events::WorksheetEvent;
pub use inspect::{Direction, PaneView, View};
pub use output::Output;
pub use protocol::{Frame, RequestId, Tag};
pub use session::{start, CellView, SessionError, WorksheetHandle};
pub use settings::ClientSettings;
pub use snapshot::{CellSnapshot, SnapshotStore, WorksheetSnapshot};
pub use worksheet::{Worksheet, WorksheetError};
