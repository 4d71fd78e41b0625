//! Per-client session state owned by one relay.
//!
//! `SessionState` holds everything a relay needs between client frames and
//! backend events: the acquired connection, the delivery buffer and (in
//! diarized mode) the speaker phrase aggregator. It has no knowledge of the
//! client socket type; payloads go out through a `PayloadSink`.

use crate::backend::events::BackendEvent;
use crate::backend::options::LiveOptions;
use crate::backend::session::{BackendError, BackendSession};
use crate::config::BackendConfig;
use crate::relay::aggregator::TranscriptAggregator;
use crate::relay::delivery::{DeliveryBuffer, DeliveryOutcome, PayloadSink};
use crate::relay::payload::Payload;
use tracing::{debug, warn};
use uuid::Uuid;

/// Audio frame sizes accepted by the plain endpoint.
pub const PLAIN_FRAME_SIZES: [usize; 2] = [2048, 4096];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Final transcripts only
    Plain,
    /// Interim and final per-speaker phrases
    Diarized,
}

impl SessionMode {
    pub fn name(self) -> &'static str {
        match self {
            SessionMode::Plain => "plain",
            SessionMode::Diarized => "diarized",
        }
    }

    pub fn live_options(self, backend: &BackendConfig) -> LiveOptions {
        match self {
            SessionMode::Plain => LiveOptions::plain(&backend.model, &backend.language),
            SessionMode::Diarized => LiveOptions::diarized(&backend.model),
        }
    }

    /// Plain mode only accepts the fixed client chunk sizes; diarized mode
    /// forwards every frame.
    pub fn accepts_frame(self, len: usize) -> bool {
        match self {
            SessionMode::Plain => PLAIN_FRAME_SIZES.contains(&len),
            SessionMode::Diarized => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Forwarded,
    /// Unexpected frame size, dropped without touching the backend
    Dropped,
}

/// Counts of what happened to the payloads produced by one backend event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventReport {
    pub delivered: usize,
    pub buffered: usize,
    pub dropped: usize,
}

impl EventReport {
    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Buffered => self.buffered += 1,
            DeliveryOutcome::Dropped => self.dropped += 1,
        }
    }
}

#[derive(Debug)]
pub struct SessionState {
    id: Uuid,
    mode: SessionMode,
    connection: BackendSession,
    delivery: DeliveryBuffer,
    aggregator: TranscriptAggregator,
}

impl SessionState {
    pub fn new(id: Uuid, mode: SessionMode, connection: BackendSession, delivery_capacity: usize) -> Self {
        Self {
            id,
            mode,
            connection,
            delivery: DeliveryBuffer::new(delivery_capacity),
            aggregator: TranscriptAggregator::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> &BackendSession {
        &self.connection
    }

    pub fn delivery(&self) -> &DeliveryBuffer {
        &self.delivery
    }

    /// Forward one client audio frame verbatim.
    ///
    /// Frames with an unexpected size are dropped; a backend send failure is
    /// returned to the caller, which must end the session.
    pub fn forward_audio(&self, frame: Vec<u8>) -> Result<FrameOutcome, BackendError> {
        if !self.mode.accepts_frame(frame.len()) {
            warn!(session_id = %self.id, "Unexpected chunk size: {}", frame.len());
            return Ok(FrameOutcome::Dropped);
        }

        self.connection.send(frame)?;
        Ok(FrameOutcome::Forwarded)
    }

    /// Turn one backend event into client payloads and deliver them in order.
    ///
    /// `timestamp` is the Unix time stamped on diarized phrases.
    pub fn handle_event<S: PayloadSink>(&mut self, event: BackendEvent, sink: &mut S, timestamp: f64) -> EventReport {
        let payloads = match event {
            BackendEvent::Transcript(result) => match self.mode {
                SessionMode::Plain => {
                    if result.is_final && !result.transcript.trim().is_empty() {
                        vec![Payload::Transcript {
                            text: result.transcript,
                            is_final: true,
                        }]
                    } else {
                        Vec::new()
                    }
                }
                SessionMode::Diarized => {
                    let words = result.words_by_speaker();
                    self.aggregator.fold(result.is_final, words, timestamp)
                }
            },
            BackendEvent::Error(message) => {
                warn!(session_id = %self.id, "Backend reported error: {}", message);
                vec![Payload::Error { message }]
            }
        };

        let mut report = EventReport::default();
        for payload in &payloads {
            report.record(self.delivery.send(sink, payload));
        }

        if report.dropped > 0 {
            debug!(session_id = %self.id, dropped = report.dropped, "Payloads dropped for slow client");
        }
        report
    }

    /// Give back the connection for release or termination.
    pub fn into_connection(self) -> BackendSession {
        self.connection
    }
}
