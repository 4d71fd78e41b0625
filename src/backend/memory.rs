//! In-memory connector for tests: every connection is a pair of channels the
//! test can inspect (frames sent upstream) and drive (events published back).

use crate::backend::events::BackendEvent;
use crate::backend::options::LiveOptions;
use crate::backend::session::{BackendError, Connector, EventSlot, Outbound};
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

const DEFAULT_CAPACITY: usize = 64;

pub struct MemoryConnector {
    links: Mutex<Vec<MemoryLink>>,
    capacity: usize,
    refuse: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            links: Mutex::new(Vec::new()),
            capacity,
            refuse: AtomicBool::new(false),
        })
    }

    /// Make every following `connect` fail.
    pub fn refuse_connections(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn link(&self, index: usize) -> MemoryLink {
        self.links.lock().unwrap()[index].clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        options: LiveOptions,
        events: EventSlot,
    ) -> BoxFuture<'static, Result<mpsc::Sender<Outbound>, BackendError>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Box::pin(async { Err(BackendError::Connect("connection refused".to_string())) });
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        self.links.lock().unwrap().push(MemoryLink {
            inner: Arc::new(LinkInner {
                options,
                events,
                outbound: Mutex::new(Some(rx)),
                received: Mutex::new(Vec::new()),
                disconnected: AtomicBool::new(false),
            }),
        });

        Box::pin(async move { Ok(tx) })
    }
}

struct LinkInner {
    options: LiveOptions,
    events: EventSlot,
    outbound: Mutex<Option<mpsc::Receiver<Outbound>>>,
    received: Mutex<Vec<Outbound>>,
    disconnected: AtomicBool,
}

/// Test-side view of one connection opened by `MemoryConnector`.
#[derive(Clone)]
pub struct MemoryLink {
    inner: Arc<LinkInner>,
}

impl MemoryLink {
    pub fn options(&self) -> LiveOptions {
        self.inner.options.clone()
    }

    fn drain(&self) {
        let mut outbound = self.inner.outbound.lock().unwrap();
        let Some(rx) = outbound.as_mut() else {
            return;
        };
        let mut received = self.inner.received.lock().unwrap();
        loop {
            match rx.try_recv() {
                Ok(message) => received.push(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.inner.disconnected.store(true, Ordering::SeqCst);
                    break;
                }
            }
        }
    }

    /// Everything the session queued so far, in order.
    pub fn received(&self) -> Vec<Outbound> {
        self.drain();
        self.inner.received.lock().unwrap().clone()
    }

    pub fn audio_frames(&self) -> Vec<Vec<u8>> {
        self.received()
            .into_iter()
            .filter_map(|message| match message {
                Outbound::Audio(frame) => Some(frame),
                Outbound::Close => None,
            })
            .collect()
    }

    /// True once the session asked to close or dropped its sender.
    pub fn was_terminated(&self) -> bool {
        let received = self.received();
        received.contains(&Outbound::Close) || self.inner.disconnected.load(Ordering::SeqCst)
    }

    /// Simulate the socket task dying: later sends and probes fail.
    pub fn kill(&self) {
        self.inner.outbound.lock().unwrap().take();
    }

    pub async fn publish(&self, event: BackendEvent) -> bool {
        self.inner.events.publish(event).await
    }
}
