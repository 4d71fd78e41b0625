//! # Backend Session
//!
//! A `BackendSession` is one logical connection to the recognition backend.
//! It is created unstarted, started with `LiveOptions`, fed audio with `send`,
//! and terminated with `finish` (or by being dropped).
//!
//! ## Ownership:
//! A session is exclusively owned by either the connection pool (while idle) or
//! one relay (while active). Moving the value between them is the hand-over, so
//! the type system rules out a connection being pooled and active at once.
//!
//! ## Event Delivery:
//! The socket task publishes into an `EventSlot`. A relay `subscribe`s to get a
//! bounded receiver and `unsubscribe`s before giving the session back, so events
//! produced after release never reach a dead client.

use crate::backend::events::BackendEvent;
use crate::backend::options::LiveOptions;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

/// Size of the silent frame used for liveness probes and keepalives.
pub const PROBE_FRAME_BYTES: usize = 2048;

/// Failures surfaced by a backend session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("failed to connect to recognition backend: {0}")]
    Connect(String),

    #[error("backend session has not been started")]
    NotStarted,

    #[error("backend connection is closed")]
    Closed,

    #[error("backend outbound queue is full")]
    Backpressure,
}

/// Commands consumed by a connection's socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Raw PCM bytes, forwarded verbatim as one binary frame
    Audio(Vec<u8>),
    /// Ask the backend to flush and close the stream
    Close,
}

/// Result of a liveness probe.
///
/// Anything other than `Alive` means the connection must not be handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// The socket task has exited or the session was never started
    Closed,
    /// The socket task is alive but its outbound queue is full
    Backpressured,
}

impl Liveness {
    pub fn is_alive(self) -> bool {
        matches!(self, Liveness::Alive)
    }
}

/// Opens socket tasks for new backend connections.
///
/// The production implementation is `DeepgramConnector`; tests use an in-memory
/// connector so pool and relay logic can run without a network.
pub trait Connector: Send + Sync {
    /// Open a connection with `options`. The returned sender feeds the socket
    /// task; the task publishes decoded events into `events`.
    fn connect(
        &self,
        options: LiveOptions,
        events: EventSlot,
    ) -> BoxFuture<'static, Result<mpsc::Sender<Outbound>, BackendError>>;
}

/// Thread-safe hand-off point between a socket task and the current subscriber.
#[derive(Debug, Clone, Default)]
pub struct EventSlot {
    subscriber: Arc<Mutex<Option<mpsc::Sender<BackendEvent>>>>,
}

impl EventSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<BackendEvent>>> {
        match self.subscriber.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Install a new subscriber, replacing any previous one.
    pub fn attach(&self, capacity: usize) -> mpsc::Receiver<BackendEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.lock() = Some(tx);
        rx
    }

    /// Remove the subscriber; its receiver sees end-of-stream once drained.
    pub fn detach(&self) {
        self.lock().take();
    }

    /// Deliver `event` to the current subscriber, waiting for channel space.
    ///
    /// Returns `false` when nobody is subscribed or the subscriber went away.
    pub async fn publish(&self, event: BackendEvent) -> bool {
        let subscriber = self.lock().clone();
        match subscriber {
            Some(tx) => tx.send(event).await.is_ok(),
            None => {
                debug!("Dropping backend event with no subscriber");
                false
            }
        }
    }
}

struct ActiveLink {
    options: LiveOptions,
    outbound: mpsc::Sender<Outbound>,
}

/// Weak handle used by the keepalive monitor to probe a connection without
/// keeping its socket task alive.
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    outbound: mpsc::WeakSender<Outbound>,
}

impl ProbeHandle {
    pub fn probe(&self) -> Liveness {
        match self.outbound.upgrade() {
            Some(outbound) => probe_sender(&outbound),
            None => Liveness::Closed,
        }
    }
}

/// One logical connection to the streaming recognition backend.
pub struct BackendSession {
    id: Uuid,
    connector: Arc<dyn Connector>,
    events: EventSlot,
    active: Option<ActiveLink>,
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("id", &self.id)
            .field("started", &self.is_started())
            .finish()
    }
}

impl BackendSession {
    /// Create an unstarted session; no socket is opened until `start`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connector,
            events: EventSlot::new(),
            active: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_started(&self) -> bool {
        self.active
            .as_ref()
            .map(|active| !active.outbound.is_closed())
            .unwrap_or(false)
    }

    /// Start the session with `options`.
    ///
    /// A connection that is still open with identical options is reused as is;
    /// otherwise the old socket is closed and a new one opened.
    pub async fn start(&mut self, options: LiveOptions) -> Result<(), BackendError> {
        if let Some(active) = &self.active {
            if active.options == options && !active.outbound.is_closed() {
                debug!(connection = %self.id, "Reusing warm backend connection");
                return Ok(());
            }
        }

        self.close_link();
        let outbound = self
            .connector
            .connect(options.clone(), self.events.clone())
            .await?;
        self.active = Some(ActiveLink { options, outbound });
        debug!(connection = %self.id, "Backend connection started");
        Ok(())
    }

    /// Queue one audio frame for the backend without waiting.
    pub fn send(&self, frame: Vec<u8>) -> Result<(), BackendError> {
        let active = self.active.as_ref().ok_or(BackendError::NotStarted)?;
        forward(&active.outbound, Outbound::Audio(frame))
    }

    /// Send a silent frame and report whether the connection accepted it.
    pub fn probe(&self) -> Liveness {
        match &self.active {
            Some(active) => probe_sender(&active.outbound),
            None => Liveness::Closed,
        }
    }

    pub fn probe_handle(&self) -> Option<ProbeHandle> {
        self.active.as_ref().map(|active| ProbeHandle {
            outbound: active.outbound.downgrade(),
        })
    }

    /// Route this connection's events to a new bounded channel.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<BackendEvent> {
        self.events.attach(capacity)
    }

    pub fn unsubscribe(&self) {
        self.events.detach();
    }

    /// Terminate the connection. Safe to call more than once.
    pub fn finish(&mut self) {
        self.events.detach();
        self.close_link();
    }

    fn close_link(&mut self) {
        if let Some(active) = self.active.take() {
            // Dropping the sender ends the socket task even if Close doesn't fit.
            let _ = active.outbound.try_send(Outbound::Close);
            debug!(connection = %self.id, "Backend connection finished");
        }
    }
}

impl Drop for BackendSession {
    fn drop(&mut self) {
        self.finish();
    }
}

pub fn silent_frame() -> Vec<u8> {
    vec![0u8; PROBE_FRAME_BYTES]
}

fn forward(outbound: &mpsc::Sender<Outbound>, message: Outbound) -> Result<(), BackendError> {
    outbound.try_send(message).map_err(|err| match err {
        TrySendError::Full(_) => BackendError::Backpressure,
        TrySendError::Closed(_) => BackendError::Closed,
    })
}

fn probe_sender(outbound: &mpsc::Sender<Outbound>) -> Liveness {
    match forward(outbound, Outbound::Audio(silent_frame())) {
        Ok(()) => Liveness::Alive,
        Err(BackendError::Backpressure) => Liveness::Backpressured,
        Err(_) => Liveness::Closed,
    }
}
