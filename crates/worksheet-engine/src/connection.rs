//! Connection manager: one WebSocket to the execution server, recreated
//! wholesale on every attempt.
//!
//! The socket itself lives in a spawned transport task that only posts
//! [`TransportEvent`]s back to the event loop. Each attempt gets a fresh
//! generation number and events from older generations are ignored, so a
//! late close from an abandoned attempt cannot disturb the current one.
//!
//! On the first close of a cycle the `on_disconnected` hook runs and the
//! reconnect countdown starts. Further closes while the countdown exists are
//! failed attempts and only restart it from the current backoff.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::correlator::Outbox;
use crate::events::{Notifier, WorksheetEvent};
use crate::reconnect::{ReconnectPolicy, Reconnector, Tick};
use crate::session::LoopEvent;
use crate::timer::Timer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Posted by the transport task.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    Closed { generation: u64, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// From an older attempt.
    Ignored,
    /// First close of a cycle; the hook ran and the countdown started.
    Lost,
    /// A reconnect attempt failed; the countdown restarted.
    AttemptFailed,
}

/// Turn `host:port` into `ws://host:port/`; full URLs pass through.
pub fn endpoint_url(endpoint: &str) -> String {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.to_string()
    } else {
        format!("ws://{}/", endpoint.trim_end_matches('/'))
    }
}

pub struct ConnectionManager {
    url: String,
    state: ConnectionState,
    generation: u64,
    writer: Option<mpsc::UnboundedSender<String>>,
    transport: Option<JoinHandle<()>>,
    reconnector: Option<Reconnector>,
    ticker: Timer,
    policy: ReconnectPolicy,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
    notifier: Notifier,
}

impl ConnectionManager {
    pub fn new(
        endpoint: &str,
        policy: ReconnectPolicy,
        loop_tx: mpsc::UnboundedSender<LoopEvent>,
        notifier: Notifier,
    ) -> Self {
        Self {
            url: endpoint_url(endpoint),
            state: ConnectionState::Disconnected,
            generation: 0,
            writer: None,
            transport: None,
            reconnector: None,
            ticker: Timer::new(),
            policy,
            loop_tx,
            notifier,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Remaining countdown, while a reconnect cycle is active.
    pub fn seconds_left(&self) -> Option<u64> {
        self.reconnector.as_ref().map(Reconnector::seconds_left)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Start a new attempt, abandoning any previous transport.
    pub fn connect(&mut self) {
        if let Some(task) = self.transport.take() {
            task.abort();
        }
        self.writer = None;
        self.generation += 1;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        self.writer = Some(out_tx);
        self.set_state(ConnectionState::Connecting);
        info!(
            "[connection] Connecting to {} (attempt {})",
            self.url, self.generation
        );
        self.transport = Some(tokio::spawn(run_transport(
            self.url.clone(),
            self.generation,
            out_rx,
            self.loop_tx.clone(),
        )));
    }

    pub fn on_open(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.ticker.cancel();
        self.reconnector = None;
        self.set_state(ConnectionState::Connected);
        info!("[connection] Connected to {}", self.url);
        true
    }

    /// Handle a close. `on_disconnected` runs only for the first close of a
    /// cycle, before the countdown starts.
    pub fn on_close(
        &mut self,
        generation: u64,
        reason: &str,
        on_disconnected: impl FnOnce(),
    ) -> CloseOutcome {
        if !self.is_current(generation) {
            debug!("[connection] Ignoring close of attempt {}", generation);
            return CloseOutcome::Ignored;
        }
        self.writer = None;
        self.transport = None;
        self.set_state(ConnectionState::Disconnected);

        let outcome = match self.reconnector.as_mut() {
            None => {
                warn!("[connection] Lost connection to {}: {}", self.url, reason);
                on_disconnected();
                self.reconnector = Some(Reconnector::new(self.policy.clone()));
                CloseOutcome::Lost
            }
            Some(reconnector) => {
                debug!("[connection] Reconnect failed: {}", reason);
                reconnector.attempt_failed();
                CloseOutcome::AttemptFailed
            }
        };
        self.start_countdown();
        outcome
    }

    pub fn on_tick(&mut self, generation: u64) {
        if !self.ticker.is_current(generation) {
            return;
        }
        let Some(reconnector) = self.reconnector.as_mut() else {
            self.ticker.cancel();
            return;
        };
        match reconnector.tick() {
            Tick::Wait(seconds_left) => self
                .notifier
                .emit(WorksheetEvent::ReconnectCountdown { seconds_left }),
            Tick::Attempt => self.attempt(),
        }
    }

    /// Stop the countdown and reconnect immediately.
    pub fn try_now(&mut self) {
        if self.state == ConnectionState::Connected {
            return;
        }
        self.attempt();
    }

    /// Shut the transport down for good.
    pub fn close(&mut self) {
        self.ticker.cancel();
        self.reconnector = None;
        if let Some(task) = self.transport.take() {
            task.abort();
        }
        self.writer = None;
        self.generation += 1;
        self.set_state(ConnectionState::Disconnected);
    }

    fn attempt(&mut self) {
        self.ticker.cancel();
        self.notifier.emit(WorksheetEvent::Reconnecting);
        self.connect();
    }

    fn start_countdown(&mut self) {
        if let Some(reconnector) = &self.reconnector {
            self.notifier.emit(WorksheetEvent::ReconnectCountdown {
                seconds_left: reconnector.seconds_left(),
            });
        }
        let period = Duration::from_millis(self.policy.tick_ms.max(1));
        self.ticker
            .arm_periodic(period, self.loop_tx.clone(), |generation| {
                LoopEvent::ReconnectTick { generation }
            });
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            self.state = state;
            self.notifier
                .emit(WorksheetEvent::ConnectionChanged { state });
        }
    }
}

impl Outbox for ConnectionManager {
    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.writer.is_some()
    }

    fn send_raw(&mut self, raw: String) {
        if !self.is_connected() {
            debug!("[connection] Not connected, dropping frame");
            return;
        }
        if let Some(writer) = &self.writer {
            if writer.send(raw).is_err() {
                debug!("[connection] Transport gone, dropping frame");
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.transport.take() {
            task.abort();
        }
    }
}

async fn run_transport(
    url: String,
    generation: u64,
    mut out_rx: mpsc::UnboundedReceiver<String>,
    loop_tx: mpsc::UnboundedSender<LoopEvent>,
) {
    let post = |event: TransportEvent| {
        let _ = loop_tx.send(LoopEvent::Transport(event));
    };

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            post(TransportEvent::Closed {
                generation,
                reason: e.to_string(),
            });
            return;
        }
    };
    post(TransportEvent::Opened { generation });

    let (mut sink, mut stream) = ws.split();
    let reason = loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(raw) = outbound else {
                    let _ = sink.close().await;
                    break "closed by client".to_string();
                };
                if let Err(e) = sink.send(Message::Text(raw.into())).await {
                    break e.to_string();
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => post(TransportEvent::Frame {
                        generation,
                        text: text.to_string(),
                    }),
                    Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                }
            }
        }
    };
    post(TransportEvent::Closed { generation, reason });
}
