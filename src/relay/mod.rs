//! # Session Relay Core
//!
//! Connection pooling and per-session processing between client sockets and the
//! recognition backend. The actor that owns a client socket lives in
//! `websocket.rs`; everything here is independent of the web framework.
//!
//! ## Key Components:
//! - **pool**: `ConnectionPool`, bounded reuse of started backend connections
//! - **session**: `SessionState`, the per-client relay state and event routing
//! - **aggregator**: `TranscriptAggregator`, per-speaker phrase consolidation
//! - **delivery**: `DeliveryBuffer`, bounded retry of failed client writes
//! - **keepalive**: `KeepaliveMonitor`, periodic silent probes
//! - **payload**: messages sent to the client

pub mod aggregator;
pub mod delivery;
pub mod keepalive;
pub mod payload;
pub mod pool;
pub mod session;

pub use delivery::{DeliveryError, PayloadSink};
pub use keepalive::KeepaliveMonitor;
pub use payload::Payload;
pub use pool::ConnectionPool;
pub use session::{FrameOutcome, SessionMode, SessionState};
