//! # Client Delivery Buffer
//!
//! Best-effort retry for messages the client socket refused. Payloads that
//! could not be written are kept (up to a small fixed capacity) and flushed in
//! order before the next payload goes out. Past capacity, payloads are dropped;
//! there is no acknowledgment protocol.

use crate::relay::payload::Payload;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{error, warn};

/// Default number of undelivered payloads kept per session.
pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("client channel is closed")]
    Closed,

    #[error("client write failed: {0}")]
    Write(String),
}

/// Destination for encoded payloads, normally the client's WebSocket.
pub trait PayloadSink {
    fn deliver(&mut self, message: &str) -> Result<(), DeliveryError>;
}

/// What happened to a payload handed to `DeliveryBuffer::send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Buffered,
    Dropped,
}

/// Bounded FIFO of payloads waiting to be re-sent.
#[derive(Debug)]
pub struct DeliveryBuffer {
    pending: VecDeque<String>,
    capacity: usize,
    dropped: u64,
}

impl DeliveryBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total payloads dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Flush buffered payloads in order, then send `payload`.
    ///
    /// A payload that cannot be encoded is logged and counted as dropped.
    pub fn send<S: PayloadSink>(&mut self, sink: &mut S, payload: &Payload) -> DeliveryOutcome {
        let message = match payload.encode() {
            Ok(message) => message,
            Err(err) => {
                error!("Skipping payload that failed to encode: {}", err);
                self.dropped += 1;
                return DeliveryOutcome::Dropped;
            }
        };

        let result = self.flush(sink).and_then(|()| sink.deliver(&message));
        match result {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(err) => {
                if self.pending.len() < self.capacity {
                    warn!("Buffering payload after delivery failure: {}", err);
                    self.pending.push_back(message);
                    DeliveryOutcome::Buffered
                } else {
                    warn!("Dropping payload, delivery buffer full: {}", err);
                    self.dropped += 1;
                    DeliveryOutcome::Dropped
                }
            }
        }
    }

    fn flush<S: PayloadSink>(&mut self, sink: &mut S) -> Result<(), DeliveryError> {
        while let Some(message) = self.pending.front() {
            sink.deliver(message)?;
            self.pending.pop_front();
        }
        Ok(())
    }
}

impl Default for DeliveryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
