//! # Streaming Recognition Backend
//!
//! Everything needed to talk to the upstream speech-recognition service over a
//! long-lived WebSocket.
//!
//! ## Key Components:
//! - **options**: Live session options (model, PCM format, diarization flags)
//! - **events**: Typed events decoded from backend messages (results, errors)
//! - **session**: `BackendSession`, one logical connection that can be started,
//!   fed audio, probed for liveness and finished
//! - **deepgram**: The production `Connector` speaking the Deepgram live protocol
//!
//! ## Threading:
//! Socket I/O runs in a tokio task owned by the connection. Results reach the
//! relay through an `EventSlot`: the I/O task publishes into whichever bounded
//! channel is currently subscribed, and the relay consumes that channel on its
//! own actor context.

pub mod deepgram;
pub mod events;
pub mod options;
pub mod session;

#[cfg(test)]
pub mod memory;

pub use deepgram::DeepgramConnector;
pub use events::BackendEvent;
