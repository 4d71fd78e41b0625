//! Periodic silent probes that keep an active backend connection from idling
//! out upstream. The monitor never tears the relay down; the next real audio
//! send surfaces the same failure on the relay's own error path.

use crate::backend::session::ProbeHandle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Background task probing one connection every `interval`.
#[derive(Debug)]
pub struct KeepaliveMonitor {
    handle: JoinHandle<()>,
}

impl KeepaliveMonitor {
    pub fn spawn(probe: ProbeHandle, interval: Duration, session_id: Uuid) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            // The first tick completes immediately; the connection was just probed.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let liveness = probe.probe();
                if !liveness.is_alive() {
                    debug!(session_id = %session_id, ?liveness, "Keepalive stopped");
                    break;
                }
            }
        });

        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for KeepaliveMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryConnector;
    use crate::backend::session::{BackendSession, Outbound, PROBE_FRAME_BYTES};
    use crate::backend::options::LiveOptions;

    #[tokio::test]
    async fn test_sends_silent_probes_periodically() {
        let connector = MemoryConnector::new();
        let mut session = BackendSession::new(connector.clone());
        session.start(LiveOptions::plain("nova-3", "")).await.unwrap();

        let monitor = KeepaliveMonitor::spawn(
            session.probe_handle().unwrap(),
            Duration::from_millis(10),
            Uuid::new_v4(),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        monitor.cancel();

        let frames = connector.link(0).audio_frames();
        assert!(frames.len() >= 2);
        assert!(frames.iter().all(|f| f.len() == PROBE_FRAME_BYTES && f.iter().all(|b| *b == 0)));
    }

    #[tokio::test]
    async fn test_ends_silently_when_connection_dies() {
        let connector = MemoryConnector::new();
        let mut session = BackendSession::new(connector.clone());
        session.start(LiveOptions::plain("nova-3", "")).await.unwrap();

        let monitor = KeepaliveMonitor::spawn(
            session.probe_handle().unwrap(),
            Duration::from_millis(5),
            Uuid::new_v4(),
        );
        connector.link(0).kill();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(monitor.is_finished());
    }

    #[tokio::test]
    async fn test_zero_interval_still_probes() {
        let connector = MemoryConnector::new();
        let mut session = BackendSession::new(connector.clone());
        session.start(LiveOptions::plain("nova-3", "")).await.unwrap();

        let monitor = KeepaliveMonitor::spawn(session.probe_handle().unwrap(), Duration::ZERO, Uuid::new_v4());
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!monitor.is_finished());
        monitor.cancel();
        assert!(!connector.link(0).audio_frames().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_probing() {
        let connector = MemoryConnector::new();
        let mut session = BackendSession::new(connector.clone());
        session.start(LiveOptions::plain("nova-3", "")).await.unwrap();

        let monitor = KeepaliveMonitor::spawn(
            session.probe_handle().unwrap(),
            Duration::from_millis(5),
            Uuid::new_v4(),
        );
        monitor.cancel();
        let before = connector.link(0).received().len();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let after = connector.link(0).received();
        assert_eq!(after.len(), before);
        assert!(!after.contains(&Outbound::Close));
    }
}
