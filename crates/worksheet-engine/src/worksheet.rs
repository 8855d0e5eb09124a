//! The worksheet: owner of cells and driver of their execution.
//!
//! Operations take a [`WorksheetLink`] (correlator + transport) to issue
//! requests. Replies come back through the continuations in this module,
//! which the correlator calls with the worksheet lent mutably.

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::cell::{Cell, CellId, CellKind, ExecState};
use crate::correlator::{Correlator, Flow, Link};
use crate::events::{Notifier, WorksheetEvent};
use crate::inspect::View;
use crate::output::Output;
use crate::protocol::{Frame, Request, RequestId, Tag};
use crate::session::LoopEvent;
use crate::snapshot::{CellSnapshot, WorksheetSnapshot};

/// Who issued a pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestContext {
    Exec { cell: CellId },
    Interrupt { cell: CellId },
    Inspect { cell: CellId, view: View, word: String },
    Interact { cell: CellId, widget: String },
}

impl RequestContext {
    pub fn cell(&self) -> CellId {
        match self {
            RequestContext::Exec { cell }
            | RequestContext::Interrupt { cell }
            | RequestContext::Inspect { cell, .. }
            | RequestContext::Interact { cell, .. } => *cell,
        }
    }
}

pub type WorksheetCorrelator = Correlator<Worksheet, RequestContext>;
pub type WorksheetLink<'a> = Link<'a, Worksheet, RequestContext>;

/// A user action the worksheet refused.
#[derive(Debug, thiserror::Error)]
pub enum WorksheetError {
    #[error("Cell {0} not found")]
    CellNotFound(CellId),

    #[error("Cell {0} is not a code cell")]
    NotACodeCell(CellId),

    #[error("Cell {0} is already computing")]
    AlreadyComputing(CellId),

    #[error("Cell {0} is not computing")]
    NotComputing(CellId),

    #[error("Cell {0} has no introspection session")]
    NoInspectSession(CellId),

    #[error("Cell {0} has no completion selected")]
    NoSelection(CellId),

    #[error("Unknown interact widget: {0}")]
    UnknownWidget(String),

    #[error("Unknown interact control: {0}")]
    UnknownControl(usize),
}

pub struct Worksheet {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) cells: Vec<Cell>,
    pub(crate) last_id: CellId,
    pub(crate) last_focused: Option<CellId>,
    pub(crate) server_available: bool,
    pub(crate) notifier: Notifier,
    pub(crate) loop_tx: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl Worksheet {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            cells: Vec::new(),
            last_id: 0,
            last_focused: None,
            server_available: false,
            notifier: Notifier::detached(),
            loop_tx: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub(crate) fn with_loop(mut self, loop_tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        self.loop_tx = Some(loop_tx);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn last_id(&self) -> CellId {
        self.last_id
    }

    pub fn last_focused(&self) -> Option<CellId> {
        self.last_focused
    }

    pub fn server_available(&self) -> bool {
        self.server_available
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == id)
    }

    pub(crate) fn cell_mut(&mut self, id: CellId) -> Result<&mut Cell, WorksheetError> {
        self.cells
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(WorksheetError::CellNotFound(id))
    }

    /// Create a cell before `before`, or at the end. Ids are never reused.
    pub fn insert_cell(&mut self, kind: CellKind, before: Option<CellId>) -> Result<CellId, WorksheetError> {
        let position = match before {
            Some(before) => self
                .cells
                .iter()
                .position(|c| c.id == before)
                .ok_or(WorksheetError::CellNotFound(before))?,
            None => self.cells.len(),
        };
        self.last_id += 1;
        let id = self.last_id;
        self.cells.insert(position, Cell::new(id, kind));
        debug!("[worksheet] Inserted {:?} cell {} at {}", kind, id, position);
        Ok(id)
    }

    /// Remove a cell, detaching its session, widgets and pending requests so
    /// late replies are dropped.
    pub fn remove_cell(&mut self, link: &mut WorksheetLink, id: CellId) -> Result<(), WorksheetError> {
        let position = self
            .cells
            .iter()
            .position(|c| c.id == id)
            .ok_or(WorksheetError::CellNotFound(id))?;
        let cell = self.cells.remove(position);
        let dropped = link.requests.cancel_where(|context| context.cell() == id);
        for widget in cell.interacts.keys() {
            self.notifier.emit(WorksheetEvent::InteractClosed {
                cell: id,
                widget: widget.clone(),
            });
        }
        if self.last_focused == Some(id) {
            self.last_focused = None;
        }
        debug!(
            "[worksheet] Removed cell {} ({} widgets, {} pending requests)",
            id,
            cell.interacts.len(),
            dropped
        );
        Ok(())
    }

    pub fn set_input(&mut self, id: CellId, input: impl Into<String>) -> Result<(), WorksheetError> {
        self.cell_mut(id)?.input = input.into();
        Ok(())
    }

    /// Track focus; leaving a cell closes its introspection session.
    pub fn focus(&mut self, id: CellId) -> Result<(), WorksheetError> {
        if self.cell(id).is_none() {
            return Err(WorksheetError::CellNotFound(id));
        }
        if let Some(previous) = self.last_focused.filter(|previous| *previous != id) {
            if self.cell(previous).is_some() {
                self.close_inspect(previous)?;
            }
        }
        self.last_focused = Some(id);
        Ok(())
    }

    /// `Idle → Computing`: clear output and send `Exec`.
    pub fn evaluate(&mut self, link: &mut WorksheetLink, id: CellId) -> Result<RequestId, WorksheetError> {
        if self.cell(id).and_then(Cell::inspect_session).is_some() {
            self.close_inspect(id)?;
        }
        let notifier = self.notifier.clone();
        let cell = self.cell_mut(id)?;
        let dropped = cell.begin_compute()?;
        let request = Request::Exec {
            code: cell.input.clone(),
            name: cell.exec_name(),
            except_msg: true,
        };
        notifier.emit(WorksheetEvent::OutputCleared { cell: id });
        for widget in dropped {
            notifier.emit(WorksheetEvent::InteractClosed { cell: id, widget });
        }
        notifier.emit(WorksheetEvent::CellStateChanged {
            cell: id,
            state: cell.state(),
        });

        let request_id = link.send(request, recv_exec, RequestContext::Exec { cell: id });
        info!("[worksheet] Evaluating cell {} as #{}", id, request_id);
        Ok(request_id)
    }

    /// `Computing → Computing + interrupting`.
    pub fn interrupt(&mut self, link: &mut WorksheetLink, id: CellId) -> Result<RequestId, WorksheetError> {
        let notifier = self.notifier.clone();
        let cell = self.cell_mut(id)?;
        cell.begin_interrupt()?;
        notifier.emit(WorksheetEvent::CellStateChanged {
            cell: id,
            state: cell.state(),
        });
        Ok(link.send(Request::Interrupt, recv_interrupt, RequestContext::Interrupt { cell: id }))
    }

    /// `Computing → Computing + killing`. Fire-and-forget: the server drops
    /// the connection and the resulting disconnect returns every computing
    /// cell to `Idle`, not only this one.
    pub fn kill(&mut self, link: &mut WorksheetLink, id: CellId) -> Result<RequestId, WorksheetError> {
        let notifier = self.notifier.clone();
        let cell = self.cell_mut(id)?;
        cell.begin_kill()?;
        notifier.emit(WorksheetEvent::CellStateChanged {
            cell: id,
            state: cell.state(),
        });
        warn!("[worksheet] Killing worker for cell {}", id);
        Ok(link.send_and_forget(Request::Shutdown))
    }

    pub fn send_stdin(&mut self, link: &mut WorksheetLink, text: impl Into<String>) -> RequestId {
        link.send_and_forget(Request::Stdin { text: text.into() })
    }

    /// Send any pending text, then an empty `Stdin` for end-of-file.
    pub fn send_stdin_eof(&mut self, link: &mut WorksheetLink, text: impl Into<String>) -> RequestId {
        let text = text.into();
        if !text.is_empty() {
            self.send_stdin(link, text);
        }
        self.send_stdin(link, String::new())
    }

    pub(crate) fn append_output(&mut self, id: CellId, tag: &str, text: &str) {
        let notifier = self.notifier.clone();
        if let Ok(cell) = self.cell_mut(id) {
            cell.output.append(tag, text);
            notifier.emit(WorksheetEvent::OutputAppended {
                cell: id,
                tag: tag.to_string(),
                text: text.to_string(),
            });
        }
    }

    fn set_idle(&mut self, id: CellId) {
        let notifier = self.notifier.clone();
        if let Ok(cell) = self.cell_mut(id) {
            if cell.finish() {
                notifier.emit(WorksheetEvent::CellStateChanged {
                    cell: id,
                    state: ExecState::Idle,
                });
            }
        }
    }

    pub(crate) fn on_connected(&mut self) {
        self.server_available = true;
        self.notifier
            .emit(WorksheetEvent::ServerAvailability { available: true });
    }

    /// Connection lost. Any cell still computing goes back to `Idle`.
    pub(crate) fn on_disconnected(&mut self) {
        self.server_available = false;
        self.notifier
            .emit(WorksheetEvent::ServerAvailability { available: false });
        let computing: Vec<CellId> = self
            .cells
            .iter()
            .filter(|c| c.is_computing())
            .map(|c| c.id)
            .collect();
        for id in computing {
            self.set_idle(id);
        }
    }

    pub fn snapshot(&self) -> WorksheetSnapshot {
        WorksheetSnapshot {
            id: self.id.clone(),
            last_id: self.last_id,
            title: self.title.clone(),
            cells: self
                .cells
                .iter()
                .map(|cell| CellSnapshot {
                    id: cell.id,
                    kind: cell.kind,
                    input: cell.input.clone(),
                    output: cell.output.to_html(),
                })
                .collect(),
        }
    }

    /// Rebuild cells from a snapshot. Connection state is untouched.
    pub fn restore(&mut self, snapshot: WorksheetSnapshot) {
        self.id = snapshot.id;
        self.title = snapshot.title;
        self.last_focused = None;
        self.cells = snapshot
            .cells
            .into_iter()
            .map(|saved| {
                let mut cell = Cell::new(saved.id, saved.kind);
                cell.input = saved.input;
                cell.output = Output::from_html(&saved.output);
                cell
            })
            .collect();
        let highest = self.cells.iter().map(|c| c.id).max().unwrap_or(0);
        self.last_id = snapshot.last_id.max(highest);
        info!(
            "[worksheet] Restored '{}' with {} cells",
            self.id,
            self.cells.len()
        );
    }
}

/// Continuation for `Exec`.
pub(crate) fn recv_exec(frame: &Frame, context: &RequestContext, worksheet: &mut Worksheet) -> Flow {
    let RequestContext::Exec { cell: id } = *context else {
        return Flow::Done;
    };
    let notifier = worksheet.notifier.clone();
    let Ok(cell) = worksheet.cell_mut(id) else {
        debug!("[worksheet] Cell {} is gone, dropping {}", id, frame.tag);
        return Flow::Done;
    };

    match &frame.tag {
        Tag::Done | Tag::Disconnect => {
            worksheet.set_idle(id);
            return Flow::Done;
        }
        Tag::NeedStdin => {
            if cell.arm_stdin() {
                notifier.emit(WorksheetEvent::CellStateChanged {
                    cell: id,
                    state: cell.state(),
                });
                notifier.emit(WorksheetEvent::StdinRequested { cell: id });
            }
            return Flow::More;
        }
        Tag::Interact => {
            worksheet.open_interact(id, frame);
            return Flow::More;
        }
        Tag::Stdin => {
            if cell.clear_stdin() {
                notifier.emit(WorksheetEvent::CellStateChanged {
                    cell: id,
                    state: cell.state(),
                });
            }
        }
        Tag::Except => {
            if let Some(fields) = &frame.fields {
                debug!("[worksheet] Except info for cell {}: {:?}", id, fields);
            }
        }
        _ => {}
    }
    worksheet.append_output(id, frame.tag.as_str(), frame.text());
    Flow::More
}

/// Continuation for `Interrupt`: any reply but `Yes` means it failed.
pub(crate) fn recv_interrupt(frame: &Frame, context: &RequestContext, worksheet: &mut Worksheet) -> Flow {
    let RequestContext::Interrupt { cell: id } = *context else {
        return Flow::Done;
    };
    let notifier = worksheet.notifier.clone();
    let Ok(cell) = worksheet.cell_mut(id) else {
        return Flow::Done;
    };
    let failed = !matches!(frame.tag, Tag::Yes | Tag::Disconnect);
    if cell.finish_interrupt(failed) {
        notifier.emit(WorksheetEvent::CellStateChanged {
            cell: id,
            state: cell.state(),
        });
        if failed {
            warn!("[worksheet] Interrupt of cell {} failed ({})", id, frame.tag);
            notifier.emit(WorksheetEvent::InterruptFailed { cell: id });
        }
    }
    Flow::Done
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::correlator::Outbox;

    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) connected: bool,
        pub(crate) sent: Vec<Frame>,
    }

    impl Outbox for Recorder {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send_raw(&mut self, raw: String) {
            self.sent.push(Frame::parse(&raw).unwrap());
        }
    }

    /// A worksheet wired to a recording transport and an event sink.
    pub(crate) struct Harness {
        pub(crate) worksheet: Worksheet,
        pub(crate) requests: WorksheetCorrelator,
        pub(crate) outbox: Recorder,
        pub(crate) events: mpsc::UnboundedReceiver<WorksheetEvent>,
        pub(crate) loops: mpsc::UnboundedReceiver<LoopEvent>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            let (tx, events) = mpsc::unbounded_channel();
            let (loop_tx, loops) = mpsc::unbounded_channel();
            Self {
                worksheet: Worksheet::new("w", "Test")
                    .with_notifier(Notifier::new(tx))
                    .with_loop(loop_tx),
                requests: WorksheetCorrelator::new(),
                outbox: Recorder {
                    connected: true,
                    sent: Vec::new(),
                },
                events,
                loops,
            }
        }

        pub(crate) fn code_cell(&mut self, input: &str) -> CellId {
            let id = self.worksheet.insert_cell(CellKind::Code, None).unwrap();
            self.worksheet.set_input(id, input).unwrap();
            id
        }

        pub(crate) fn evaluate(&mut self, id: CellId) -> RequestId {
            let mut link = Link::new(&mut self.requests, &mut self.outbox);
            self.worksheet.evaluate(&mut link, id).unwrap()
        }

        pub(crate) fn interrupt(&mut self, id: CellId) -> Result<RequestId, WorksheetError> {
            let mut link = Link::new(&mut self.requests, &mut self.outbox);
            self.worksheet.interrupt(&mut link, id)
        }

        pub(crate) fn kill(&mut self, id: CellId) -> Result<RequestId, WorksheetError> {
            let mut link = Link::new(&mut self.requests, &mut self.outbox);
            self.worksheet.kill(&mut link, id)
        }

        pub(crate) fn reply(&mut self, id: RequestId, tag: Tag, text: &str) {
            self.dispatch(Frame::new(tag).with_id(id).with_text(text));
        }

        pub(crate) fn dispatch(&mut self, frame: Frame) {
            self.requests.dispatch(frame, &mut self.worksheet);
        }

        /// Frames sent so far with `tag`.
        pub(crate) fn sent(&self, tag: Tag) -> Vec<&Frame> {
            self.outbox.sent.iter().filter(|f| f.tag == tag).collect()
        }

        pub(crate) fn drain(&mut self) -> Vec<WorksheetEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        pub(crate) fn state(&self, id: CellId) -> ExecState {
            self.worksheet.cell(id).unwrap().state()
        }
    }

    #[test]
    fn test_insert_cell_ids_and_order() {
        let mut ws = Worksheet::new("w", "t");
        let a = ws.insert_cell(CellKind::Code, None).unwrap();
        let b = ws.insert_cell(CellKind::Text, None).unwrap();
        let c = ws.insert_cell(CellKind::Code, Some(b)).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        let order: Vec<_> = ws.cells().iter().map(|c| c.id).collect();
        assert_eq!(order, vec![1, 3, 2]);
        assert!(ws.insert_cell(CellKind::Code, Some(99)).is_err());
    }

    #[test]
    fn test_ids_not_reused_after_remove() {
        let mut h = Harness::new();
        let a = h.code_cell("");
        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        h.worksheet.remove_cell(&mut link, a).unwrap();
        assert_eq!(h.worksheet.insert_cell(CellKind::Code, None).unwrap(), 2);
    }

    #[test]
    fn test_evaluate_sends_exec() {
        let mut h = Harness::new();
        let id = h.code_cell("print('hi')");
        let request = h.evaluate(id);

        let frame = &h.outbox.sent[0];
        assert_eq!(frame.id, Some(request));
        assert_eq!(frame.tag, Tag::Exec);
        assert_eq!(frame.text(), "print('hi')");
        let fields = frame.fields.as_ref().unwrap();
        assert_eq!(fields["name"], "__cell_1__");
        assert_eq!(fields["except_msg"], true);
        assert!(h.state(id).is_computing());
    }

    #[test]
    fn test_output_merges_and_done_returns_idle() {
        let mut h = Harness::new();
        let id = h.code_cell("print('Hello World')");
        let request = h.evaluate(id);
        h.reply(request, Tag::Stdout, "Hello");
        h.reply(request, Tag::Stdout, " World");
        h.reply(request, Tag::Done, "");

        let cell = h.worksheet.cell(id).unwrap();
        assert_eq!(cell.output.segments().len(), 1);
        assert_eq!(cell.output.plain_text(), "Hello World");
        assert_eq!(cell.state(), ExecState::Idle);
        assert!(!h.requests.is_pending(request));
    }

    #[test]
    fn test_evaluate_rejected_while_computing() {
        let mut h = Harness::new();
        let id = h.code_cell("x");
        h.evaluate(id);
        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        assert!(matches!(
            h.worksheet.evaluate(&mut link, id),
            Err(WorksheetError::AlreadyComputing(_))
        ));
        assert_eq!(h.outbox.sent.len(), 1);
    }

    #[test]
    fn test_stdin_prompt_arms_once() {
        let mut h = Harness::new();
        let id = h.code_cell("input()");
        let request = h.evaluate(id);
        h.drain();

        h.reply(request, Tag::NeedStdin, "");
        h.reply(request, Tag::NeedStdin, "");
        let prompts = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, WorksheetEvent::StdinRequested { .. }))
            .count();
        assert_eq!(prompts, 1);
        assert!(h.state(id).needs_stdin());

        h.reply(request, Tag::Stdin, "42\n");
        assert!(!h.state(id).needs_stdin());
        assert!(h.state(id).is_computing());
        assert_eq!(h.worksheet.cell(id).unwrap().output.plain_text(), "42\n");

        h.reply(request, Tag::Done, "");
        assert_eq!(h.state(id), ExecState::Idle);
    }

    #[test]
    fn test_interrupt_failure_and_success() {
        let mut h = Harness::new();
        let id = h.code_cell("while True: pass");
        h.evaluate(id);

        let first = h.interrupt(id).unwrap();
        assert!(h.state(id).is_interrupting());
        h.reply(first, Tag::No, "");
        assert!(!h.state(id).is_interrupting());
        assert!(h.state(id).is_computing());
        assert!(h.worksheet.cell(id).unwrap().interrupt_failed);
        assert!(h
            .drain()
            .contains(&WorksheetEvent::InterruptFailed { cell: id }));

        let second = h.interrupt(id).unwrap();
        h.reply(second, Tag::Yes, "");
        assert!(!h.worksheet.cell(id).unwrap().interrupt_failed);
    }

    #[test]
    fn test_interrupt_and_kill_rejected_when_idle() {
        let mut h = Harness::new();
        let id = h.code_cell("x");
        assert!(matches!(h.interrupt(id), Err(WorksheetError::NotComputing(_))));
        assert!(matches!(h.kill(id), Err(WorksheetError::NotComputing(_))));
        assert!(h.outbox.sent.is_empty());
    }

    #[test]
    fn test_kill_is_fire_and_forget() {
        let mut h = Harness::new();
        let id = h.code_cell("x");
        h.evaluate(id);
        let kill = h.kill(id).unwrap();
        assert!(h.state(id).is_killing());
        assert!(!h.requests.is_pending(kill));
        assert_eq!(h.outbox.sent.last().unwrap().tag, Tag::Shutdown);
    }

    #[test]
    fn test_disconnect_resets_every_computing_cell() {
        let mut h = Harness::new();
        let a = h.code_cell("a");
        let b = h.code_cell("b");
        h.evaluate(a);
        h.evaluate(b);
        h.kill(a).unwrap();

        assert_eq!(h.requests.disconnect_all(&mut h.worksheet), 2);
        h.worksheet.on_disconnected();
        assert_eq!(h.state(a), ExecState::Idle);
        assert_eq!(h.state(b), ExecState::Idle);
        assert!(!h.worksheet.server_available());
    }

    #[test]
    fn test_reply_for_removed_cell_is_dropped() {
        let mut h = Harness::new();
        let id = h.code_cell("x");
        let request = h.evaluate(id);
        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        h.worksheet.remove_cell(&mut link, id).unwrap();
        assert!(!h.requests.is_pending(request));
        h.reply(request, Tag::Stdout, "late");
        assert!(h.worksheet.cells().is_empty());
    }

    #[test]
    fn test_text_cell_cannot_be_evaluated() {
        let mut h = Harness::new();
        let id = h.worksheet.insert_cell(CellKind::Text, None).unwrap();
        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        assert!(matches!(
            h.worksheet.evaluate(&mut link, id),
            Err(WorksheetError::NotACodeCell(_))
        ));
    }

    #[test]
    fn test_offline_evaluate_gets_deferred_disconnect() {
        let mut h = Harness::new();
        h.outbox.connected = false;
        let id = h.code_cell("x");
        h.evaluate(id);
        assert!(h.outbox.sent.is_empty());
        assert!(h.state(id).is_computing());

        h.requests.deliver_undelivered(&mut h.worksheet);
        assert_eq!(h.state(id), ExecState::Idle);
    }

    #[test]
    fn test_stdin_eof_sends_text_then_empty() {
        let mut h = Harness::new();
        let mut link = Link::new(&mut h.requests, &mut h.outbox);
        h.worksheet.send_stdin_eof(&mut link, "last line");
        let texts: Vec<_> = h.outbox.sent.iter().map(|f| f.text().to_string()).collect();
        assert_eq!(texts, vec!["last line", ""]);
        assert!(h.outbox.sent.iter().all(|f| f.tag == Tag::Stdin));
    }

    #[test]
    fn test_snapshot_and_restore() {
        let mut h = Harness::new();
        let id = h.code_cell("print(1)");
        let text = h.worksheet.insert_cell(CellKind::Text, None).unwrap();
        h.worksheet.set_input(text, "<h1>Notes</h1>").unwrap();
        let request = h.evaluate(id);
        h.reply(request, Tag::Stdout, "1 < 2\n");
        h.reply(request, Tag::Done, "");

        let snapshot = h.worksheet.snapshot();
        assert_eq!(snapshot.last_id, 2);
        assert_eq!(snapshot.cells[0].output, "<span class=\"Stdout\">1 &lt; 2\n</span>");

        let mut restored = Worksheet::new("other", "x");
        restored.restore(snapshot);
        assert_eq!(restored.id(), "w");
        assert_eq!(restored.cells().len(), 2);
        assert_eq!(restored.cell(id).unwrap().output.plain_text(), "1 < 2\n");
        assert_eq!(restored.cell(text).unwrap().kind, CellKind::Text);
        assert_eq!(restored.insert_cell(CellKind::Code, None).unwrap(), 3);
    }
}
