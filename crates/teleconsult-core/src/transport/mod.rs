//! Live session transport.
//!
//! Socket I/O runs on a background worker thread. The owner talks to it
//! through `std::sync::mpsc` channels and drains its events with
//! [`Transport::poll`], which is also where listeners run, so listeners always
//! execute on the owner's thread.

mod socket;
#[cfg(test)]
pub(crate) mod testing;

pub use socket::{Connector, Socket, SocketRead, TungsteniteConnector, TungsteniteSocket};

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use url::Url;

use crate::annotation::AnnotationEvent;
use crate::config::SessionConfig;
use crate::protocol::{DocumentChange, ErrorPayload, Message, MessageKind, Presence};
use crate::viewport::ViewportState;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid WebSocket URL: {0}")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Socket error: {0}")]
    Socket(#[from] tungstenite::Error),
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Transport is closed")]
    Closed,
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Connection lifecycle changes reported by [`Transport::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// The connection dropped; a reconnection attempt is scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// A reconnection succeeded.
    Reopened,
    /// Reconnection gave up; the transport is closed for good.
    Lost,
}

/// Reconnection and timeout tuning.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for TransportOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_base_delay: config.reconnect_base_delay(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// Delay before reconnection attempt `attempt` (1-based): `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

/// Handle returned by [`Transport::on`], used to remove a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&Message)>;

/// Commands sent to the worker thread.
enum Command {
    Send(String),
    Close,
}

/// Events sent from the worker thread.
enum WorkerEvent {
    Opened,
    Failed(String),
    Message(String),
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    Reopened,
    /// A reopened connection proved usable; the attempt budget is restored.
    Stable,
    GaveUp { attempts: u32 },
}

/// Client end of the session socket.
pub struct Transport<C: Connector = TungsteniteConnector> {
    connector: Option<C>,
    url: Url,
    token: String,
    options: TransportOptions,
    state: ConnectionState,
    listeners: HashMap<MessageKind, Vec<(ListenerId, Listener)>>,
    next_listener_id: u64,
    reconnect_attempts: u32,
    cmd_tx: Option<Sender<Command>>,
    event_rx: Option<Receiver<WorkerEvent>>,
    _worker: Option<JoinHandle<()>>,
}

impl Transport<TungsteniteConnector> {
    /// Transport for `ws://` URLs.
    ///
    /// `tungstenite` is built without TLS; `wss://` is refused.
    pub fn new(url: Url, token: impl Into<String>, options: TransportOptions) -> Result<Self, TransportError> {
        match url.scheme() {
            "ws" => {}
            "wss" => {
                return Err(TransportError::InvalidUrl(format!(
                    "TLS WebSocket URLs are not supported: {}",
                    url
                )));
            }
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "Invalid WebSocket URL scheme: {}",
                    other
                )));
            }
        }
        Ok(Self::with_connector(TungsteniteConnector, url, token, options))
    }
}

impl<C: Connector> Transport<C> {
    pub fn with_connector(connector: C, url: Url, token: impl Into<String>, options: TransportOptions) -> Self {
        Self {
            connector: Some(connector),
            url,
            token: token.into(),
            options,
            state: ConnectionState::Closed,
            listeners: HashMap::new(),
            next_listener_id: 0,
            reconnect_attempts: 0,
            cmd_tx: None,
            event_rx: None,
            _worker: None,
        }
    }

    /// Open the connection and send `authenticate`.
    ///
    /// Returns once the socket is open; authentication failures arrive later
    /// as `error` messages.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.cmd_tx.is_some() {
            return Err(TransportError::AlreadyConnected);
        }
        let connector = self.connector.take().ok_or(TransportError::Closed)?;
        let auth = Message::authenticate(self.token.clone())
            .to_json()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        self.state = ConnectionState::Connecting;

        let (cmd_tx, cmd_rx) = channel::<Command>();
        let (event_tx, event_rx) = channel::<WorkerEvent>();
        let worker = Worker {
            connector,
            url: self.url.clone(),
            auth,
            options: self.options.clone(),
            cmd_rx,
            event_tx,
            attempt: 0,
        };
        let handle = thread::spawn(move || worker.run());

        match event_rx.recv_timeout(self.options.connect_timeout) {
            Ok(WorkerEvent::Opened) => {
                log::info!("Session transport open: {}", self.url);
                self.state = ConnectionState::Open;
                self.cmd_tx = Some(cmd_tx);
                self.event_rx = Some(event_rx);
                self._worker = Some(handle);
                Ok(())
            }
            Ok(WorkerEvent::Failed(message)) => {
                self.state = ConnectionState::Closed;
                Err(TransportError::Connect(message))
            }
            Ok(_) | Err(RecvTimeoutError::Disconnected) => {
                self.state = ConnectionState::Closed;
                Err(TransportError::Closed)
            }
            Err(RecvTimeoutError::Timeout) => {
                let _ = cmd_tx.send(Command::Close);
                self.state = ConnectionState::Closed;
                Err(TransportError::Timeout(self.options.connect_timeout))
            }
        }
    }

    /// Close the connection and drop every listener. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            log::info!("Closing session transport");
            let _ = tx.send(Command::Close);
        }
        self.event_rx = None;
        self._worker = None;
        self.connector = None;
        self.listeners.clear();
        self.state = ConnectionState::Closed;
    }

    /// Send a message. Silently dropped unless the connection is open.
    pub fn send(&self, message: &Message) {
        if self.state != ConnectionState::Open {
            log::debug!("Dropping {} while {:?}", message.kind().wire_name(), self.state);
            return;
        }
        let Some(tx) = &self.cmd_tx else {
            return;
        };
        match message.to_json() {
            Ok(json) => {
                let _ = tx.send(Command::Send(json));
            }
            Err(e) => log::error!("Failed to serialize {}: {}", message.kind().wire_name(), e),
        }
    }

    /// Register a listener for one message kind.
    pub fn on(&mut self, kind: MessageKind, listener: impl FnMut(&Message) + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id);
        self.next_listener_id += 1;
        self.listeners.entry(kind).or_default().push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&mut self, kind: MessageKind, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        before != list.len()
    }

    pub fn on_annotation(&mut self, mut listener: impl FnMut(&AnnotationEvent) + 'static) -> ListenerId {
        self.on(MessageKind::Annotation, move |m| {
            if let Message::Annotation(event) = m {
                listener(event);
            }
        })
    }

    pub fn on_viewport(&mut self, mut listener: impl FnMut(&ViewportState) + 'static) -> ListenerId {
        self.on(MessageKind::Viewport, move |m| {
            if let Message::Viewport(state) = m {
                listener(state);
            }
        })
    }

    pub fn on_document_changed(&mut self, mut listener: impl FnMut(&DocumentChange) + 'static) -> ListenerId {
        self.on(MessageKind::DocumentChanged, move |m| {
            if let Message::DocumentChanged(change) = m {
                listener(change);
            }
        })
    }

    /// Listen for both join and leave notices. The flag is `true` for joins.
    pub fn on_presence(&mut self, listener: impl FnMut(&Presence, bool) + 'static) -> [ListenerId; 2] {
        let listener = std::rc::Rc::new(std::cell::RefCell::new(listener));
        let joined = listener.clone();
        let a = self.on(MessageKind::ParticipantJoined, move |m| {
            if let Message::ParticipantJoined(p) = m {
                (&mut *joined.borrow_mut())(p, true);
            }
        });
        let b = self.on(MessageKind::ParticipantLeft, move |m| {
            if let Message::ParticipantLeft(p) = m {
                (&mut *listener.borrow_mut())(p, false);
            }
        });
        [a, b]
    }

    pub fn on_error(&mut self, mut listener: impl FnMut(&ErrorPayload) + 'static) -> ListenerId {
        self.on(MessageKind::Error, move |m| {
            if let Message::Error(payload) = m {
                listener(payload);
            }
        })
    }

    /// Drain worker events, dispatching messages to listeners.
    pub fn poll(&mut self) -> Vec<TransportStatus> {
        let mut status = Vec::new();
        let mut pending = Vec::new();
        let mut worker_gone = false;

        if let Some(rx) = &self.event_rx {
            loop {
                match rx.try_recv() {
                    Ok(event) => pending.push(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        worker_gone = true;
                        break;
                    }
                }
            }
        }

        for event in pending {
            match event {
                WorkerEvent::Message(text) => match Message::from_json(&text) {
                    Ok(message) => self.dispatch(&message),
                    Err(e) => {
                        let preview: String = text.chars().take(100).collect();
                        log::warn!("Dropping malformed message ({}): {}", e, preview);
                    }
                },
                WorkerEvent::Disconnected => {
                    log::warn!("Session transport disconnected");
                    self.state = ConnectionState::Connecting;
                }
                WorkerEvent::Reconnecting { attempt, delay } => {
                    log::info!("Reconnecting (attempt {}) in {:?}", attempt, delay);
                    self.reconnect_attempts = attempt;
                    status.push(TransportStatus::Reconnecting { attempt, delay });
                }
                WorkerEvent::Reopened => {
                    log::info!("Session transport reopened after {} attempt(s)", self.reconnect_attempts);
                    self.state = ConnectionState::Open;
                    status.push(TransportStatus::Reopened);
                }
                WorkerEvent::Stable => {
                    log::debug!("Reopened connection is healthy");
                    self.reconnect_attempts = 0;
                }
                WorkerEvent::GaveUp { attempts } => {
                    self.give_up(&format!("Connection lost after {} reconnection attempts", attempts));
                    status.push(TransportStatus::Lost);
                    return status;
                }
                WorkerEvent::Opened | WorkerEvent::Failed(_) => {}
            }
        }

        if worker_gone && self.state != ConnectionState::Closed {
            self.give_up("Connection lost");
            status.push(TransportStatus::Lost);
        }
        status
    }

    fn give_up(&mut self, reason: &str) {
        log::error!("{}", reason);
        self.cmd_tx = None;
        self.event_rx = None;
        self._worker = None;
        self.state = ConnectionState::Closed;
        self.dispatch(&Message::error(reason));
    }

    fn dispatch(&mut self, message: &Message) {
        let Some(list) = self.listeners.get_mut(&message.kind()) else {
            return;
        };
        for (id, listener) in list.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                log::error!("Listener {:?} for {} panicked", id, message.kind().wire_name());
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Consecutive reconnection attempts without a healthy connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }
}

impl<C: Connector> Drop for Transport<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// A reopened connection that stays up this long counts as healthy.
const STABLE_AFTER: Duration = Duration::from_secs(5);

/// How a connection's pump loop ended.
enum PumpExit {
    /// Close requested or owner gone.
    Shutdown,
    /// Connection dropped unexpectedly.
    Lost,
}

struct Worker<C: Connector> {
    connector: C,
    url: Url,
    auth: String,
    options: TransportOptions,
    cmd_rx: Receiver<Command>,
    event_tx: Sender<WorkerEvent>,
    /// Reconnection attempts since the last healthy connection.
    attempt: u32,
}

impl<C: Connector> Worker<C> {
    fn run(mut self) {
        let mut socket = match self.open() {
            Ok(socket) => socket,
            Err(e) => {
                log::error!("WebSocket connection failed: {}", e);
                let _ = self.event_tx.send(WorkerEvent::Failed(e.to_string()));
                return;
            }
        };
        let _ = self.event_tx.send(WorkerEvent::Opened);

        loop {
            match self.pump(&mut socket) {
                PumpExit::Shutdown => {
                    socket.close();
                    break;
                }
                PumpExit::Lost => {
                    let _ = self.event_tx.send(WorkerEvent::Disconnected);
                }
            }
            match self.reconnect() {
                Some(reopened) => {
                    socket = reopened;
                    let _ = self.event_tx.send(WorkerEvent::Reopened);
                }
                None => break,
            }
        }
        log::info!("WebSocket thread exiting");
    }

    /// Open a socket and authenticate on it.
    fn open(&mut self) -> Result<C::Socket, TransportError> {
        let mut socket = self.connector.open(&self.url)?;
        socket.send_text(self.auth.clone())?;
        Ok(socket)
    }

    /// Restore the attempt budget once a reopened socket delivered a
    /// non-error frame or stayed up for [`STABLE_AFTER`].
    fn mark_stable(&mut self) {
        if self.attempt > 0 {
            self.attempt = 0;
            let _ = self.event_tx.send(WorkerEvent::Stable);
        }
    }

    fn pump(&mut self, socket: &mut C::Socket) -> PumpExit {
        let opened_at = Instant::now();
        loop {
            if self.attempt > 0 && opened_at.elapsed() >= STABLE_AFTER {
                self.mark_stable();
            }

            match self.cmd_rx.try_recv() {
                Ok(Command::Send(text)) => {
                    if let Err(e) = socket.send_text(text) {
                        log::error!("WebSocket send error: {}", e);
                        return PumpExit::Lost;
                    }
                    continue;
                }
                Ok(Command::Close) | Err(TryRecvError::Disconnected) => return PumpExit::Shutdown,
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(SocketRead::Text(text)) => {
                    if self.attempt > 0 && proves_healthy(&text) {
                        self.mark_stable();
                    }
                    if self.event_tx.send(WorkerEvent::Message(text)).is_err() {
                        return PumpExit::Shutdown;
                    }
                }
                Ok(SocketRead::Idle) => {}
                Ok(SocketRead::Closed) => return PumpExit::Lost,
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    return PumpExit::Lost;
                }
            }
        }
    }

    fn reconnect(&mut self) -> Option<C::Socket> {
        let max = self.options.max_reconnect_attempts;
        while self.attempt < max {
            self.attempt += 1;
            let attempt = self.attempt;
            let delay = backoff_delay(self.options.reconnect_base_delay, attempt);
            let _ = self.event_tx.send(WorkerEvent::Reconnecting { attempt, delay });
            if !self.wait(delay) {
                return None;
            }
            match self.open() {
                Ok(socket) => return Some(socket),
                Err(e) => log::warn!("Reconnection attempt {} failed: {}", attempt, e),
            }
        }
        let _ = self.event_tx.send(WorkerEvent::GaveUp { attempts: max });
        None
    }

    /// Sleep on the command channel. Returns `false` if closing was requested.
    fn wait(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.cmd_rx.recv_timeout(remaining) {
                Ok(Command::Send(_)) => log::debug!("Dropping outgoing message while reconnecting"),
                Ok(Command::Close) | Err(RecvTimeoutError::Disconnected) => return false,
                Err(RecvTimeoutError::Timeout) => return true,
            }
        }
    }
}

/// Whether a frame shows the server accepted us: anything but `error`.
fn proves_healthy(text: &str) -> bool {
    matches!(Message::from_json(text), Ok(message) if message.kind() != MessageKind::Error)
}
