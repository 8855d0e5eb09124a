//! Introspection: completions, documentation and source lookup.
//!
//! A session is opened from the word before the cursor. A trailing `??`
//! asks for source, a trailing `?` for documentation, anything else for
//! completions. Each view's content is cached on the session so toggling
//! back and forth does not refetch.
//!
//! The session remembers the id of its latest request. Replies carrying any
//! other id are stale (a newer lookup replaced them) and are ignored.

use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};
use serde::Serialize;

use crate::cell::CellId;
use crate::completion_grid::{CompletionGrid, GridView};
use crate::correlator::Flow;
use crate::events::WorksheetEvent;
use crate::protocol::{Frame, Request, RequestId, Tag};
use crate::worksheet::{RequestContext, Worksheet, WorksheetError, WorksheetLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum View {
    Completions,
    Doc,
    Source,
}

impl View {
    pub fn request(self, word: String) -> Request {
        match self {
            View::Completions => Request::GetCompletions { word },
            View::Doc => Request::GetDoc { word },
            View::Source => Request::GetSource { word },
        }
    }

    /// Split trailing lookup markers off `word`.
    pub fn for_word(word: &str) -> (View, &str) {
        if let Some(stripped) = word.strip_suffix("??") {
            (View::Source, stripped)
        } else if let Some(stripped) = word.strip_suffix('?') {
            (View::Doc, stripped)
        } else {
            (View::Completions, word)
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            View::Completions => "Completions",
            View::Doc => "Doc",
            View::Source => "Source",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

/// The word under the cursor and the rest of its line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub line: usize,
    pub before: String,
    pub word: String,
    pub after: String,
}

impl LineInfo {
    /// Extract the lookup word at `(line, column)` of `input`.
    ///
    /// Returns `None` when only whitespace precedes the cursor or the cursor
    /// does not follow a word. `column` counts chars and is clamped to the
    /// line length.
    pub fn at(input: &str, line: usize, column: usize) -> Option<Self> {
        let text = input.split('\n').nth(line)?;
        let split = text
            .char_indices()
            .nth(column)
            .map(|(i, _)| i)
            .unwrap_or(text.len());
        let (before_cursor, after) = text.split_at(split);
        if before_cursor.trim().is_empty() {
            return None;
        }

        let word_start = before_cursor
            .char_indices()
            .rev()
            .take_while(|(_, c)| is_word_char(*c))
            .last()
            .map(|(i, _)| i)?;

        Some(Self {
            line,
            before: before_cursor[..word_start].to_string(),
            word: before_cursor[word_start..].to_string(),
            after: after.to_string(),
        })
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '?' | '(')
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pane {
    Loading,
    /// "Nothing found" style notice.
    Message(String),
    Text(String),
    Completions(CompletionGrid),
}

/// Serializable form of a [`Pane`] for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaneView {
    Loading,
    Message { text: String },
    Text { text: String },
    Completions { grid: GridView },
}

impl From<&Pane> for PaneView {
    fn from(pane: &Pane) -> Self {
        match pane {
            Pane::Loading => PaneView::Loading,
            Pane::Message(text) => PaneView::Message { text: text.clone() },
            Pane::Text(text) => PaneView::Text { text: text.clone() },
            Pane::Completions(grid) => PaneView::Completions { grid: grid.view() },
        }
    }
}

#[derive(Debug, Clone)]
struct CachedPane {
    word: String,
    pane: Pane,
}

#[derive(Debug)]
pub struct InspectSession {
    cell: CellId,
    line_info: LineInfo,
    /// Started as a completion lookup (toggles Completions/Doc) rather than
    /// a doc/source lookup (toggles Doc/Source).
    is_completion: bool,
    /// Word of the initial lookup, markers stripped.
    word: String,
    opened: View,
    cache: HashMap<View, CachedPane>,
    send_id: RequestId,
    loading: bool,
    width: usize,
}

impl InspectSession {
    fn new(cell: CellId, line_info: LineInfo, width: usize) -> Self {
        let (view, word) = View::for_word(&line_info.word);
        let word = word.to_string();
        Self {
            cell,
            is_completion: view == View::Completions,
            word,
            line_info,
            opened: view,
            cache: HashMap::new(),
            send_id: 0,
            loading: false,
            width,
        }
    }

    pub fn cell(&self) -> CellId {
        self.cell
    }

    pub fn line_info(&self) -> &LineInfo {
        &self.line_info
    }

    pub fn opened(&self) -> View {
        self.opened
    }

    pub fn send_id(&self) -> RequestId {
        self.send_id
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_completion(&self) -> bool {
        self.is_completion
    }

    pub fn pane(&self, view: View) -> Option<&Pane> {
        self.cache.get(&view).map(|c| &c.pane)
    }

    pub fn word_for(&self, view: View) -> Option<&str> {
        self.cache.get(&view).map(|c| c.word.as_str())
    }

    pub fn grid(&self) -> Option<&CompletionGrid> {
        match self.pane(View::Completions) {
            Some(Pane::Completions(grid)) => Some(grid),
            _ => None,
        }
    }

    /// Text of the selected completion, with a trailing `(` removed unless
    /// `keep_paren` is set.
    pub fn selected_text(&self, keep_paren: bool) -> Option<&str> {
        let text = self.grid()?.selected()?;
        if keep_paren {
            Some(text)
        } else {
            Some(text.strip_suffix('(').unwrap_or(text))
        }
    }

    fn begin(&mut self, view: View, word: &str) {
        self.cache.insert(
            view,
            CachedPane {
                word: word.to_string(),
                pane: Pane::Loading,
            },
        );
        self.opened = view;
        self.loading = true;
    }

    fn grid_mut(&mut self) -> Option<&mut CompletionGrid> {
        match self.cache.get_mut(&View::Completions) {
            Some(CachedPane {
                pane: Pane::Completions(grid),
                ..
            }) => Some(grid),
            _ => None,
        }
    }

    fn updated_event(&self) -> WorksheetEvent {
        let view = self.opened;
        let (word, pane) = match self.cache.get(&view) {
            Some(cached) => (cached.word.clone(), PaneView::from(&cached.pane)),
            None => (self.word.clone(), PaneView::Loading),
        };
        WorksheetEvent::InspectUpdated {
            cell: self.cell,
            view,
            word,
            pane,
        }
    }
}

/// Replace the lookup word with `text` and return the new input, the new
/// content of the edited line and the cursor column after the insertion.
fn splice_completion(input: &str, info: &LineInfo, text: &str) -> (String, String, usize) {
    let before_cursor = format!("{}{}", info.before, text);
    let cursor = before_cursor.chars().count();
    let content = format!("{}{}", before_cursor, info.after);

    let mut lines: Vec<&str> = input.split('\n').collect();
    if let Some(slot) = lines.get_mut(info.line) {
        *slot = &content;
    }
    let new_input = lines.join("\n");
    (new_input, content, cursor)
}

impl Worksheet {
    /// Open an introspection session at the cursor, replacing any existing
    /// one on the cell. Returns the request id, or `None` when there is no
    /// word before the cursor.
    pub fn inspect(
        &mut self,
        link: &mut WorksheetLink,
        cell: CellId,
        line: usize,
        column: usize,
        width: usize,
    ) -> Result<Option<RequestId>, WorksheetError> {
        let target = self.cell_mut(cell)?;
        let Some(info) = LineInfo::at(&target.input, line, column) else {
            debug!("[inspect] No word at {}:{} in cell {}", line, column, cell);
            return Ok(None);
        };
        let had_session = target.inspect.take().is_some();
        let session = InspectSession::new(cell, info, width);
        let (view, word) = (session.opened, session.word.clone());
        target.inspect = Some(session);
        if had_session {
            self.notifier.emit(WorksheetEvent::InspectClosed { cell });
        }
        self.fetch(link, cell, view, word).map(Some)
    }

    fn fetch(
        &mut self,
        link: &mut WorksheetLink,
        cell: CellId,
        view: View,
        word: String,
    ) -> Result<RequestId, WorksheetError> {
        let notifier = self.notifier.clone();
        let session = self.session_mut(cell)?;
        session.begin(view, &word);
        notifier.emit(session.updated_event());

        debug!("[inspect] Get{} '{}' for cell {}", view, word, cell);
        let context = RequestContext::Inspect {
            cell,
            view,
            word: word.clone(),
        };
        let id = link.send(view.request(word), recv_inspect, context);
        session.send_id = id;
        Ok(id)
    }

    /// Flip between Completions/Doc or Doc/Source, fetching only when the
    /// cached content does not match.
    pub fn toggle_inspect(
        &mut self,
        link: &mut WorksheetLink,
        cell: CellId,
    ) -> Result<(), WorksheetError> {
        let notifier = self.notifier.clone();
        let session = self.session_mut(cell)?;

        let fetch = if session.is_completion {
            match session.opened {
                View::Completions => {
                    let Some(selected) = session.selected_text(false).map(str::to_string) else {
                        return Ok(());
                    };
                    if session.word_for(View::Doc) == Some(selected.as_str()) {
                        session.opened = View::Doc;
                        None
                    } else {
                        Some((View::Doc, selected))
                    }
                }
                _ => {
                    session.opened = View::Completions;
                    None
                }
            }
        } else {
            let other = match session.opened {
                View::Doc => View::Source,
                _ => View::Doc,
            };
            if session.cache.contains_key(&other) {
                session.opened = other;
                None
            } else {
                Some((other, session.word.clone()))
            }
        };

        match fetch {
            Some((view, word)) => {
                self.fetch(link, cell, view, word)?;
            }
            None => notifier.emit(session.updated_event()),
        }
        Ok(())
    }

    pub fn move_selection(&mut self, cell: CellId, direction: Direction) -> Result<(), WorksheetError> {
        let notifier = self.notifier.clone();
        let session = self.session_mut(cell)?;
        if session.opened != View::Completions {
            return Ok(());
        }
        let Some(grid) = session.grid_mut() else {
            return Err(WorksheetError::NoSelection(cell));
        };
        match direction {
            Direction::Left => grid.move_left(),
            Direction::Right => grid.move_right(),
            Direction::Up => grid.move_up(),
            Direction::Down => grid.move_down(),
        }
        notifier.emit(session.updated_event());
        Ok(())
    }

    /// Write the selected completion into the cell and close the session.
    pub fn accept_completion(&mut self, cell: CellId) -> Result<(), WorksheetError> {
        let session = self.session_mut(cell)?;
        let text = session
            .selected_text(true)
            .map(str::to_string)
            .ok_or(WorksheetError::NoSelection(cell))?;
        self.apply_completion(cell, &text)
    }

    fn apply_completion(&mut self, cell: CellId, text: &str) -> Result<(), WorksheetError> {
        let notifier = self.notifier.clone();
        let target = self.cell_mut(cell)?;
        let session = target
            .inspect
            .take()
            .ok_or(WorksheetError::NoInspectSession(cell))?;
        let info = session.line_info;
        let (input, content, cursor) = splice_completion(&target.input, &info, text);
        target.input = input;

        debug!("[inspect] Applied completion '{}' in cell {}", text, cell);
        notifier.emit(WorksheetEvent::CompletionApplied {
            cell,
            line: info.line,
            content,
            cursor,
        });
        notifier.emit(WorksheetEvent::InspectClosed { cell });
        Ok(())
    }

    /// Dismiss the cell's session. Its in-flight reply will be dropped.
    pub fn close_inspect(&mut self, cell: CellId) -> Result<bool, WorksheetError> {
        let closed = self.cell_mut(cell)?.inspect.take().is_some();
        if closed {
            self.notifier.emit(WorksheetEvent::InspectClosed { cell });
        }
        Ok(closed)
    }

    fn session_mut(&mut self, cell: CellId) -> Result<&mut InspectSession, WorksheetError> {
        self.cell_mut(cell)?
            .inspect
            .as_mut()
            .ok_or(WorksheetError::NoInspectSession(cell))
    }
}

/// Continuation for `GetCompletions` / `GetDoc` / `GetSource`.
pub(crate) fn recv_inspect(frame: &Frame, context: &RequestContext, worksheet: &mut Worksheet) -> Flow {
    let RequestContext::Inspect { cell, view, word } = context else {
        return Flow::Done;
    };
    let cell = *cell;
    let notifier = worksheet.notifier.clone();
    let Ok(target) = worksheet.cell_mut(cell) else {
        debug!("[inspect] Reply for removed cell {}", cell);
        return Flow::Done;
    };
    let Some(session) = target.inspect.as_mut() else {
        debug!("[inspect] Reply for closed session on cell {}", cell);
        return Flow::Done;
    };
    if frame.id != Some(session.send_id) {
        debug!("[inspect] Ignoring stale {} reply {:?}", frame.tag, frame.id);
        return Flow::Done;
    }

    let pane = match &frame.tag {
        Tag::Disconnect => {
            target.inspect = None;
            notifier.emit(WorksheetEvent::InspectClosed { cell });
            return Flow::Done;
        }
        Tag::No => Pane::Message(format!("No {} found for '{}'", view, word)),
        Tag::Completions => {
            let items: Vec<String> = match serde_json::from_str(frame.text()) {
                Ok(items) => items,
                Err(e) => {
                    warn!("[inspect] Malformed completion list: {}", e);
                    Vec::new()
                }
            };
            match items.len() {
                0 => Pane::Message(format!("No completions found for '{}'", word)),
                1 => {
                    let only = items.into_iter().next().unwrap_or_default();
                    if let Err(e) = worksheet.apply_completion(cell, &only) {
                        warn!("[inspect] Could not apply completion: {}", e);
                    }
                    return Flow::Done;
                }
                _ => Pane::Completions(CompletionGrid::with_width(items, session.width)),
            }
        }
        _ => Pane::Text(frame.text().to_string()),
    };

    session.cache.insert(
        *view,
        CachedPane {
            word: word.clone(),
            pane,
        },
    );
    session.loading = false;
    notifier.emit(session.updated_event());
    Flow::Done
}
