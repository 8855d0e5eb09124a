//! Request/response correlation by message id.
//!
//! Every outbound request gets the next id from a process-lifetime counter.
//! When the caller supplies a continuation it is stored with an opaque
//! context under that id; inbound frames carrying the id are routed to it
//! until it reports [`Flow::Done`]. Ids are never reused, so replies for
//! finished, cancelled or stale requests find nothing and are dropped.
//!
//! Continuations are plain function pointers over `(frame, context, state)`
//! rather than closures: the state they mutate (the worksheet) is owned by
//! the event loop and lent to them only for the duration of one dispatch.

use std::collections::HashMap;

use log::{debug, error, warn};

use crate::protocol::{Frame, Request, RequestId, Tag};

/// Whether a continuation expects more frames for its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    More,
    Done,
}

pub type Continuation<S, C> = fn(&Frame, &C, &mut S) -> Flow;

struct Pending<S, C> {
    continuation: Continuation<S, C>,
    context: C,
}

/// Where encoded frames go. Implemented by the connection manager.
pub trait Outbox {
    fn is_connected(&self) -> bool;

    /// Write one encoded frame. Silently dropped when not connected.
    fn send_raw(&mut self, raw: String);
}

pub struct Correlator<S, C> {
    last_id: RequestId,
    pending: HashMap<RequestId, Pending<S, C>>,
    /// Requests registered while offline; they are owed a `Disconnect`.
    undelivered: Vec<RequestId>,
}

impl<S, C> Default for Correlator<S, C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, C> Correlator<S, C> {
    pub fn new() -> Self {
        Self {
            last_id: 0,
            pending: HashMap::new(),
            undelivered: Vec::new(),
        }
    }

    /// Assign an id, register the continuation (if any) and transmit.
    ///
    /// While offline nothing is written. A registered continuation is then
    /// owed a synthetic `Disconnect`, delivered by
    /// [`Correlator::deliver_undelivered`] once the caller has released the
    /// state.
    pub fn send_request(
        &mut self,
        outbox: &mut dyn Outbox,
        request: Request,
        reply: Option<(Continuation<S, C>, C)>,
    ) -> RequestId {
        self.last_id += 1;
        let id = self.last_id;
        let tag = request.tag();

        let registered = reply.is_some();
        if let Some((continuation, context)) = reply {
            self.pending.insert(
                id,
                Pending {
                    continuation,
                    context,
                },
            );
        }

        if !outbox.is_connected() {
            debug!("[correlator] Not connected, {} #{} not sent", tag, id);
            if registered {
                self.undelivered.push(id);
            }
            return id;
        }

        match request.into_frame(id).encode() {
            Ok(raw) => {
                debug!("[correlator] -> {} #{}", tag, id);
                outbox.send_raw(raw);
            }
            Err(e) => {
                error!("[correlator] Failed to encode {} #{}: {}", tag, id, e);
                if registered {
                    self.undelivered.push(id);
                }
            }
        }
        id
    }

    /// Route an inbound frame to its continuation.
    pub fn dispatch(&mut self, frame: Frame, state: &mut S) {
        let Some(id) = frame.id else {
            warn!("[correlator] Dropping {} frame without id", frame.tag);
            return;
        };
        let Some(entry) = self.pending.remove(&id) else {
            debug!("[correlator] No pending request #{}, dropping {}", id, frame.tag);
            return;
        };

        let flow = (entry.continuation)(&frame, &entry.context, state);
        if flow == Flow::More && frame.tag != Tag::Disconnect {
            self.pending.insert(id, entry);
        }
    }

    /// Deliver the `Disconnect` owed to requests made while offline.
    pub fn deliver_undelivered(&mut self, state: &mut S) {
        if self.undelivered.is_empty() {
            return;
        }
        for id in std::mem::take(&mut self.undelivered) {
            if let Some(entry) = self.pending.remove(&id) {
                (entry.continuation)(&Frame::disconnect(id), &entry.context, state);
            }
        }
    }

    /// Deliver one synthetic `Disconnect` to every pending request, oldest
    /// first, and empty the table. Returns how many were notified.
    pub fn disconnect_all(&mut self, state: &mut S) -> usize {
        let mut entries: Vec<_> = self.pending.drain().collect();
        entries.sort_by_key(|(id, _)| *id);
        self.undelivered.clear();

        let count = entries.len();
        for (id, entry) in entries {
            (entry.continuation)(&Frame::disconnect(id), &entry.context, state);
        }
        if count > 0 {
            debug!("[correlator] Delivered Disconnect to {} pending requests", count);
        }
        count
    }

    /// Forget a pending request without notifying it.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Forget every pending request whose context matches.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&C) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, entry| !predicate(&entry.context));
        self.undelivered.retain(|id| self.pending.contains_key(id));
        before - self.pending.len()
    }

    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn last_id(&self) -> RequestId {
        self.last_id
    }
}

/// The correlator paired with the transport, lent to worksheet operations
/// so they can issue requests while the worksheet itself is borrowed.
pub struct Link<'a, S, C> {
    pub requests: &'a mut Correlator<S, C>,
    pub outbox: &'a mut dyn Outbox,
}

impl<'a, S, C> Link<'a, S, C> {
    pub fn new(requests: &'a mut Correlator<S, C>, outbox: &'a mut dyn Outbox) -> Self {
        Self { requests, outbox }
    }

    pub fn send(&mut self, request: Request, continuation: Continuation<S, C>, context: C) -> RequestId {
        self.requests
            .send_request(self.outbox, request, Some((continuation, context)))
    }

    /// Send without registering a continuation.
    pub fn send_and_forget(&mut self, request: Request) -> RequestId {
        self.requests.send_request(self.outbox, request, None)
    }

    pub fn is_connected(&self) -> bool {
        self.outbox.is_connected()
    }
}
