//! The engine task and the handle used to drive it.
//!
//! A single spawned task ([`run_event_loop`]) owns the connection manager,
//! the correlator and the worksheet. User actions arrive as [`Command`]s
//! from any number of cloned [`WorksheetHandle`]s; transport I/O and timers
//! post [`LoopEvent`]s. Both are handled one at a time on this task, so the
//! engine state needs no locks.

use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cell::{CellId, CellKind, ExecState};
use crate::connection::{ConnectionManager, ConnectionState, TransportEvent};
use crate::correlator::Link;
use crate::events::{Notifier, WorksheetEvent};
use crate::inspect::Direction;
use crate::output::Output;
use crate::protocol::{Frame, RequestId};
use crate::settings::ClientSettings;
use crate::snapshot::WorksheetSnapshot;
use crate::worksheet::{Worksheet, WorksheetCorrelator, WorksheetError};

/// Error type for [`WorksheetHandle`] calls.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Worksheet session closed")]
    Closed,

    #[error(transparent)]
    Worksheet(#[from] WorksheetError),
}

/// Events posted to the loop by transport and timer tasks.
#[derive(Debug)]
pub enum LoopEvent {
    Transport(TransportEvent),
    ReconnectTick {
        generation: u64,
    },
    InteractExpired {
        cell: CellId,
        widget: String,
        generation: u64,
    },
}

/// Read-only copy of one cell's state.
#[derive(Debug, Clone, PartialEq)]
pub struct CellView {
    pub id: CellId,
    pub kind: CellKind,
    pub state: ExecState,
    pub input: String,
    pub output: Output,
    pub interrupt_failed: bool,
}

type Reply<T> = oneshot::Sender<Result<T, WorksheetError>>;

/// Commands sent from handles to the engine task.
#[derive(Debug)]
enum Command {
    InsertCell {
        kind: CellKind,
        before: Option<CellId>,
        reply: Reply<CellId>,
    },
    RemoveCell {
        cell: CellId,
        reply: Reply<()>,
    },
    SetInput {
        cell: CellId,
        input: String,
        reply: Reply<()>,
    },
    Focus {
        cell: CellId,
        reply: Reply<()>,
    },
    Evaluate {
        cell: CellId,
        reply: Reply<RequestId>,
    },
    Interrupt {
        cell: CellId,
        reply: Reply<RequestId>,
    },
    Kill {
        cell: CellId,
        reply: Reply<RequestId>,
    },
    SendStdin {
        text: String,
        eof: bool,
        reply: oneshot::Sender<RequestId>,
    },
    Inspect {
        cell: CellId,
        line: usize,
        column: usize,
        width: usize,
        reply: Reply<Option<RequestId>>,
    },
    ToggleInspect {
        cell: CellId,
        reply: Reply<()>,
    },
    MoveSelection {
        cell: CellId,
        direction: Direction,
        reply: Reply<()>,
    },
    AcceptCompletion {
        cell: CellId,
        reply: Reply<()>,
    },
    CloseInspect {
        cell: CellId,
        reply: Reply<bool>,
    },
    SetControl {
        cell: CellId,
        widget: String,
        index: usize,
        value: Value,
        reply: Reply<()>,
    },
    UpdateInteract {
        cell: CellId,
        widget: String,
        reply: Reply<RequestId>,
    },
    TryNow,
    GetCell {
        cell: CellId,
        reply: oneshot::Sender<Option<CellView>>,
    },
    GetConnectionState {
        reply: oneshot::Sender<ConnectionState>,
    },
    Snapshot {
        reply: oneshot::Sender<WorksheetSnapshot>,
    },
    Restore {
        snapshot: WorksheetSnapshot,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle for sending commands to the engine task.
///
/// This is clonable and can be shared across tasks. Commands are sent
/// through a channel and processed in order by the engine task.
#[derive(Clone)]
pub struct WorksheetHandle {
    tx: mpsc::Sender<Command>,
}

impl WorksheetHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn insert_cell(
        &self,
        kind: CellKind,
        before: Option<CellId>,
    ) -> Result<CellId, SessionError> {
        Ok(self
            .call(|reply| Command::InsertCell {
                kind,
                before,
                reply,
            })
            .await??)
    }

    pub async fn remove_cell(&self, cell: CellId) -> Result<(), SessionError> {
        Ok(self.call(|reply| Command::RemoveCell { cell, reply }).await??)
    }

    pub async fn set_input(&self, cell: CellId, input: &str) -> Result<(), SessionError> {
        Ok(self
            .call(|reply| Command::SetInput {
                cell,
                input: input.to_string(),
                reply,
            })
            .await??)
    }

    pub async fn focus(&self, cell: CellId) -> Result<(), SessionError> {
        Ok(self.call(|reply| Command::Focus { cell, reply }).await??)
    }

    /// Start executing a code cell.
    pub async fn evaluate(&self, cell: CellId) -> Result<RequestId, SessionError> {
        Ok(self.call(|reply| Command::Evaluate { cell, reply }).await??)
    }

    pub async fn interrupt(&self, cell: CellId) -> Result<RequestId, SessionError> {
        Ok(self.call(|reply| Command::Interrupt { cell, reply }).await??)
    }

    pub async fn kill(&self, cell: CellId) -> Result<RequestId, SessionError> {
        Ok(self.call(|reply| Command::Kill { cell, reply }).await??)
    }

    pub async fn send_stdin(&self, text: &str) -> Result<RequestId, SessionError> {
        self.call(|reply| Command::SendStdin {
            text: text.to_string(),
            eof: false,
            reply,
        })
        .await
    }

    /// Send `text` (if any) followed by end-of-file.
    pub async fn send_stdin_eof(&self, text: &str) -> Result<RequestId, SessionError> {
        self.call(|reply| Command::SendStdin {
            text: text.to_string(),
            eof: true,
            reply,
        })
        .await
    }

    /// Open an introspection session at the cursor.
    pub async fn inspect(
        &self,
        cell: CellId,
        line: usize,
        column: usize,
        width: usize,
    ) -> Result<Option<RequestId>, SessionError> {
        Ok(self
            .call(|reply| Command::Inspect {
                cell,
                line,
                column,
                width,
                reply,
            })
            .await??)
    }

    pub async fn toggle_inspect(&self, cell: CellId) -> Result<(), SessionError> {
        Ok(self
            .call(|reply| Command::ToggleInspect { cell, reply })
            .await??)
    }

    pub async fn move_selection(
        &self,
        cell: CellId,
        direction: Direction,
    ) -> Result<(), SessionError> {
        Ok(self
            .call(|reply| Command::MoveSelection {
                cell,
                direction,
                reply,
            })
            .await??)
    }

    pub async fn accept_completion(&self, cell: CellId) -> Result<(), SessionError> {
        Ok(self
            .call(|reply| Command::AcceptCompletion { cell, reply })
            .await??)
    }

    pub async fn close_inspect(&self, cell: CellId) -> Result<bool, SessionError> {
        Ok(self
            .call(|reply| Command::CloseInspect { cell, reply })
            .await??)
    }

    pub async fn set_control(
        &self,
        cell: CellId,
        widget: &str,
        index: usize,
        value: Value,
    ) -> Result<(), SessionError> {
        Ok(self
            .call(|reply| Command::SetControl {
                cell,
                widget: widget.to_string(),
                index,
                value,
                reply,
            })
            .await??)
    }

    pub async fn update_interact(&self, cell: CellId, widget: &str) -> Result<RequestId, SessionError> {
        Ok(self
            .call(|reply| Command::UpdateInteract {
                cell,
                widget: widget.to_string(),
                reply,
            })
            .await??)
    }

    /// Skip the reconnect countdown.
    pub async fn try_now(&self) -> Result<(), SessionError> {
        self.tx
            .send(Command::TryNow)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn cell(&self, cell: CellId) -> Result<Option<CellView>, SessionError> {
        self.call(|reply| Command::GetCell { cell, reply }).await
    }

    pub async fn connection_state(&self) -> Result<ConnectionState, SessionError> {
        self.call(|reply| Command::GetConnectionState { reply }).await
    }

    pub async fn snapshot(&self) -> Result<WorksheetSnapshot, SessionError> {
        self.call(|reply| Command::Snapshot { reply }).await
    }

    pub async fn restore(&self, snapshot: WorksheetSnapshot) -> Result<(), SessionError> {
        self.call(|reply| Command::Restore { snapshot, reply }).await
    }

    /// Close the connection and stop the engine task.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}

/// Everything the engine task owns.
pub struct WorksheetSession {
    connection: ConnectionManager,
    requests: WorksheetCorrelator,
    worksheet: Worksheet,
}

/// Start the engine for `settings`, optionally rehydrating a snapshot.
///
/// Returns the command handle, the event stream and the engine task.
pub fn start(
    settings: &ClientSettings,
    snapshot: Option<WorksheetSnapshot>,
) -> (
    WorksheetHandle,
    mpsc::UnboundedReceiver<WorksheetEvent>,
    JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (loop_tx, loop_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let notifier = Notifier::new(event_tx);

    let mut worksheet = Worksheet::new(settings.worksheet_id.as_str(), settings.title.as_str())
        .with_notifier(notifier.clone())
        .with_loop(loop_tx.clone());
    if let Some(snapshot) = snapshot {
        worksheet.restore(snapshot);
    }

    let session = WorksheetSession {
        connection: ConnectionManager::new(
            &settings.endpoint,
            settings.reconnect.clone(),
            loop_tx,
            notifier,
        ),
        requests: WorksheetCorrelator::new(),
        worksheet,
    };

    let task = tokio::spawn(run_event_loop(session, cmd_rx, loop_rx));
    (WorksheetHandle { tx: cmd_tx }, event_rx, task)
}

async fn run_event_loop(
    mut session: WorksheetSession,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut loop_rx: mpsc::UnboundedReceiver<LoopEvent>,
) {
    info!(
        "[session] Starting worksheet '{}' against {}",
        session.worksheet.id(),
        session.connection.url()
    );
    session.connection.connect();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Shutdown { reply }) => {
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => session.handle_command(cmd),
                    None => {
                        info!("[session] Command channel closed (handles dropped)");
                        break;
                    }
                }
            }
            Some(event) = loop_rx.recv() => session.handle_loop_event(event),
        }
        session
            .requests
            .deliver_undelivered(&mut session.worksheet);
    }

    session.connection.close();
    info!("[session] Worksheet '{}' stopped", session.worksheet.id());
}

impl WorksheetSession {
    fn handle_command(&mut self, cmd: Command) {
        let WorksheetSession {
            connection,
            requests,
            worksheet,
        } = self;

        match cmd {
            Command::InsertCell {
                kind,
                before,
                reply,
            } => {
                let _ = reply.send(worksheet.insert_cell(kind, before));
            }
            Command::RemoveCell { cell, reply } => {
                let mut link = Link::new(requests, connection);
                let _ = reply.send(worksheet.remove_cell(&mut link, cell));
            }
            Command::SetInput { cell, input, reply } => {
                let _ = reply.send(worksheet.set_input(cell, input));
            }
            Command::Focus { cell, reply } => {
                let _ = reply.send(worksheet.focus(cell));
            }
            Command::Evaluate { cell, reply } => {
                let mut link = Link::new(requests, connection);
                let _ = reply.send(worksheet.evaluate(&mut link, cell));
            }
            Command::Interrupt { cell, reply } => {
                let mut link = Link::new(requests, connection);
                let _ = reply.send(worksheet.interrupt(&mut link, cell));
            }
            Command::Kill { cell, reply } => {
                let mut link = Link::new(requests, connection);
                let _ = reply.send(worksheet.kill(&mut link, cell));
            }
            Command::SendStdin { text, eof, reply } => {
                let mut link = Link::new(requests, connection);
                let id = if eof {
                    worksheet.send_stdin_eof(&mut link, text)
                } else {
                    worksheet.send_stdin(&mut link, text)
                };
                let _ = reply.send(id);
            }
            Command::Inspect {
                cell,
                line,
                column,
                width,
                reply,
            } => {
                let mut link = Link::new(requests, connection);
                let _ = reply.send(worksheet.inspect(&mut link, cell, line, column, width));
            }
            Command::ToggleInspect { cell, reply } => {
                let mut link = Link::new(requests, connection);
                let _ = reply.send(worksheet.toggle_inspect(&mut link, cell));
            }
            Command::MoveSelection {
                cell,
                direction,
                reply,
            } => {
                let _ = reply.send(worksheet.move_selection(cell, direction));
            }
            Command::AcceptCompletion { cell, reply } => {
                let _ = reply.send(worksheet.accept_completion(cell));
            }
            Command::CloseInspect { cell, reply } => {
                let _ = reply.send(worksheet.close_inspect(cell));
            }
            Command::SetControl {
                cell,
                widget,
                index,
                value,
                reply,
            } => {
                let _ = reply.send(worksheet.set_control(cell, &widget, index, value));
            }
            Command::UpdateInteract {
                cell,
                widget,
                reply,
            } => {
                let mut link = Link::new(requests, connection);
                let _ = reply.send(worksheet.update_interact(&mut link, cell, &widget));
            }
            Command::TryNow => connection.try_now(),
            Command::GetCell { cell, reply } => {
                let view = worksheet.cell(cell).map(|c| CellView {
                    id: c.id,
                    kind: c.kind,
                    state: c.state(),
                    input: c.input.clone(),
                    output: c.output.clone(),
                    interrupt_failed: c.interrupt_failed,
                });
                let _ = reply.send(view);
            }
            Command::GetConnectionState { reply } => {
                let _ = reply.send(connection.state());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(worksheet.snapshot());
            }
            Command::Restore { snapshot, reply } => {
                worksheet.restore(snapshot);
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_loop_event(&mut self, event: LoopEvent) {
        let WorksheetSession {
            connection,
            requests,
            worksheet,
        } = self;

        match event {
            LoopEvent::Transport(TransportEvent::Opened { generation }) => {
                if connection.on_open(generation) {
                    worksheet.on_connected();
                }
            }
            LoopEvent::Transport(TransportEvent::Frame { generation, text }) => {
                if !connection.is_current(generation) {
                    debug!("[session] Dropping frame from attempt {}", generation);
                    return;
                }
                match Frame::parse(&text) {
                    Ok(frame) => requests.dispatch(frame, worksheet),
                    Err(e) => warn!("[session] Discarding malformed frame: {}", e),
                }
            }
            LoopEvent::Transport(TransportEvent::Closed { generation, reason }) => {
                connection.on_close(generation, &reason, || {
                    let notified = requests.disconnect_all(worksheet);
                    worksheet.on_disconnected();
                    info!(
                        "[session] Disconnected, {} pending requests notified",
                        notified
                    );
                });
            }
            LoopEvent::ReconnectTick { generation } => connection.on_tick(generation),
            LoopEvent::InteractExpired {
                cell,
                widget,
                generation,
            } => {
                let mut link = Link::new(requests, connection);
                worksheet.on_interact_expired(&mut link, cell, &widget, generation);
            }
        }
    }
}
