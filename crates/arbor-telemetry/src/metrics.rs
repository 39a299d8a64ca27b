use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Bridge-wide counters. Cheap to bump from any task; read via
/// [`BridgeMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
    forwards_in_flight: AtomicI64,
    forwards_timed_out: AtomicU64,
    forwards_completed: AtomicU64,
    tasks_submitted: AtomicU64,
    tasks_completed: AtomicU64,
    frames_dropped: AtomicU64,
    stale_peers_closed: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub forwards_in_flight: i64,
    pub forwards_timed_out: u64,
    pub forwards_completed: u64,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub frames_dropped: u64,
    pub stale_peers_closed: u64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forward_started(&self) {
        self.forwards_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Every forward settles exactly once; timed-out forwards also count
    /// as settled.
    pub fn forward_settled(&self, timed_out: bool) {
        self.forwards_in_flight.fetch_sub(1, Ordering::Relaxed);
        if timed_out {
            self.forwards_timed_out.fetch_add(1, Ordering::Relaxed);
        } else {
            self.forwards_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_peer_closed(&self) {
        self.stale_peers_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            forwards_in_flight: self.forwards_in_flight.load(Ordering::Relaxed),
            forwards_timed_out: self.forwards_timed_out.load(Ordering::Relaxed),
            forwards_completed: self.forwards_completed.load(Ordering::Relaxed),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            stale_peers_closed: self.stale_peers_closed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = BridgeMetrics::new();
        let snap = metrics.snapshot();
        assert_eq!(snap.connections_accepted, 0);
        assert_eq!(snap.forwards_in_flight, 0);
    }

    #[test]
    fn forward_lifecycle_balances() {
        let metrics = BridgeMetrics::new();
        metrics.forward_started();
        metrics.forward_started();
        assert_eq!(metrics.snapshot().forwards_in_flight, 2);

        metrics.forward_settled(false);
        metrics.forward_settled(true);
        let snap = metrics.snapshot();
        assert_eq!(snap.forwards_in_flight, 0);
        assert_eq!(snap.forwards_completed, 1);
        assert_eq!(snap.forwards_timed_out, 1);
    }

    #[test]
    fn snapshot_serializes() {
        let metrics = BridgeMetrics::new();
        metrics.connection_accepted();
        metrics.task_submitted();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["connections_accepted"], 1);
        assert_eq!(json["tasks_submitted"], 1);
    }
}
