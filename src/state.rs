//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket relay through
//! `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the validated configuration, read-only after startup
//! - **pool**: the single `ConnectionPool`, created in `main` and drained on
//!   shutdown (there is no process-wide singleton)
//! - **clinical**: the generative service behind the clinical endpoints, as a
//!   trait object so tests can substitute it
//! - **metrics**: counters behind an `Arc<RwLock<_>>`, written by relays and
//!   read by the health endpoints
//!
//! ## Arc<RwLock<T>> Pattern
//! Every HTTP worker thread gets its own clone of `AppState`; the `Arc`s make
//! the clones share the same underlying data. A poisoned metrics lock is
//! recovered, never propagated.

use crate::clinical::{ClinicalGenerator, MedicalInputValidator};
use crate::config::AppConfig;
use crate::relay::ConnectionPool;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pool: Arc<ConnectionPool>,
    pub clinical: Arc<dyn ClinicalGenerator>,
    pub validator: MedicalInputValidator,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Relay counters exposed by `/health` and `/api/v1/metrics`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub active_sessions: u64,
    pub sessions_total: u64,
    /// Sessions ended by a backend transmission failure
    pub sessions_aborted: u64,
    pub frames_forwarded: u64,
    /// Frames rejected for an unexpected size
    pub frames_dropped: u64,
    /// Client payloads dropped because the delivery buffer was full
    pub payloads_dropped: u64,
}

impl AppState {
    pub fn new(config: AppConfig, pool: Arc<ConnectionPool>, clinical: Arc<dyn ClinicalGenerator>) -> Self {
        let validator = MedicalInputValidator::from_config(&config.clinical);
        Self {
            config: Arc::new(config),
            pool,
            clinical,
            validator,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        match self.metrics.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        match self.metrics.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn session_opened(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions += 1;
        metrics.sessions_total += 1;
    }

    pub fn session_closed(&self, aborted: bool) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
        if aborted {
            metrics.sessions_aborted += 1;
        }
    }

    pub fn record_frame(&self, forwarded: bool) {
        let mut metrics = self.write_metrics();
        if forwarded {
            metrics.frames_forwarded += 1;
        } else {
            metrics.frames_dropped += 1;
        }
    }

    pub fn record_payloads_dropped(&self, count: usize) {
        if count > 0 {
            self.write_metrics().payloads_dropped += count as u64;
        }
    }

    pub fn metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
