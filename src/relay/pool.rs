//! # Backend Connection Pool
//!
//! Keeps a bounded set of idle, already-started backend connections so a new
//! client session can skip the upstream handshake.
//!
//! ## Guarantees:
//! - The pool never holds more than `capacity` entries
//! - `acquire` returns either a brand-new connection or one that passed a
//!   liveness probe during that same call
//! - Every connection leaving the pool for any reason other than `acquire`
//!   (overflow on release, sweep, drain, failed probe) is terminated
//!
//! ## Ownership:
//! `BackendSession` is moved into the pool on `release` and moved out on
//! `acquire`, so a connection cannot be idle and active at the same time.

use crate::backend::session::{BackendSession, Connector};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct PoolEntry {
    connection: BackendSession,
    last_used: Instant,
}

/// Snapshot reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub capacity: usize,
}

pub struct ConnectionPool {
    entries: Mutex<VecDeque<PoolEntry>>,
    capacity: usize,
    idle_timeout: Duration,
    connector: Arc<dyn Connector>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, capacity: usize, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            idle_timeout,
            connector,
            sweeper: std::sync::Mutex::new(None),
        })
    }

    /// Start the background sweep, running every `idle_timeout / 2`.
    ///
    /// The task holds only a weak reference and exits once the pool is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let period = (self.idle_timeout / 2).max(Duration::from_millis(1));
        let pool: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let removed = pool.sweep().await;
                if removed > 0 {
                    debug!("Pool sweep evicted {} idle connection(s)", removed);
                }
            }
        });

        if let Some(previous) = self.lock_sweeper().replace(handle) {
            previous.abort();
        }
    }

    /// Hand out a live pooled connection, or a new unstarted one.
    pub async fn acquire(&self) -> BackendSession {
        let mut entries = self.entries.lock().await;

        while let Some(entry) = entries.pop_front() {
            let PoolEntry {
                mut connection,
                last_used,
            } = entry;

            if last_used.elapsed() >= self.idle_timeout {
                debug!(connection = %connection.id(), "Discarding expired pooled connection");
                connection.finish();
                continue;
            }

            let liveness = connection.probe();
            if liveness.is_alive() {
                debug!(connection = %connection.id(), "Reusing pooled connection");
                return connection;
            }

            warn!(connection = %connection.id(), ?liveness, "Pooled connection failed liveness probe");
            connection.finish();
        }
        drop(entries);

        let connection = BackendSession::new(self.connector.clone());
        debug!(connection = %connection.id(), "Created new backend connection");
        connection
    }

    /// Return a connection. It is pooled while there is room, otherwise terminated.
    pub async fn release(&self, mut connection: BackendSession) {
        connection.unsubscribe();

        if !connection.is_started() {
            connection.finish();
            return;
        }

        let mut entries = self.entries.lock().await;
        if entries.len() < self.capacity {
            debug!(connection = %connection.id(), "Returned connection to pool");
            entries.push_back(PoolEntry {
                connection,
                last_used: Instant::now(),
            });
        } else {
            drop(entries);
            debug!(connection = %connection.id(), "Pool full, terminating connection");
            connection.finish();
        }
    }

    /// Evict and terminate entries idle for at least `idle_timeout`.
    ///
    /// Returns the number of connections removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let (fresh, stale): (VecDeque<_>, VecDeque<_>) = entries
            .drain(..)
            .partition(|entry| entry.last_used.elapsed() < self.idle_timeout);
        *entries = fresh;
        drop(entries);

        let removed = stale.len();
        for mut entry in stale {
            entry.connection.finish();
        }
        removed
    }

    /// Stop the sweeper and terminate every idle connection.
    pub async fn drain(&self) -> usize {
        if let Some(sweeper) = self.lock_sweeper().take() {
            sweeper.abort();
        }

        let drained: Vec<PoolEntry> = self.entries.lock().await.drain(..).collect();
        let count = drained.len();
        for mut entry in drained {
            entry.connection.finish();
        }

        info!("Drained {} pooled backend connection(s)", count);
        count
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.entries.lock().await.len(),
            capacity: self.capacity,
        }
    }

    fn lock_sweeper(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.sweeper.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Some(sweeper) = self.lock_sweeper().take() {
            sweeper.abort();
        }
    }
}
