//! Shared connection-health tracking.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use sirocco_core::data::HealthStatus;

/// Thread-safe health record shared between an adapter and its reader
/// tasks.
///
/// Readers observe a whole consistent record; writers replace fields under
/// a single short-lived lock.
#[derive(Debug, Clone, Default)]
pub struct HealthTracker {
    inner: Arc<RwLock<HealthStatus>>,
}

impl HealthTracker {
    /// Creates a new tracker in the disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current health record.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        self.inner.read().clone()
    }

    /// Returns whether the session is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.read().connected
    }

    /// Marks the session up or down; going down stamps the reconnect time.
    pub fn set_connected(&self, connected: bool) {
        let mut status = self.inner.write();
        status.connected = connected;
        if !connected {
            status.last_reconnect_at = Some(Utc::now());
        }
    }

    /// Records one received message and refreshes the liveness stamp.
    pub fn record_message(&self) {
        let mut status = self.inner.write();
        status.message_count += 1;
        status.last_ping = Some(Utc::now());
    }

    /// Records one error.
    pub fn record_error(&self) {
        self.inner.write().error_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_disconnected() {
        let health = HealthTracker::new();
        assert!(!health.is_connected());
        assert_eq!(health.status().message_count, 0);
    }

    #[test]
    fn test_counts_accumulate() {
        let health = HealthTracker::new();
        health.record_message();
        health.record_message();
        health.record_error();

        let status = health.status();
        assert_eq!(status.message_count, 2);
        assert_eq!(status.error_count, 1);
        assert!(status.last_ping.is_some());
    }

    #[test]
    fn test_disconnect_stamps_reconnect_time() {
        let health = HealthTracker::new();
        health.set_connected(true);
        assert!(health.status().last_reconnect_at.is_none());

        health.set_connected(false);
        assert!(health.status().last_reconnect_at.is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let health = HealthTracker::new();
        let clone = health.clone();
        clone.record_message();
        assert_eq!(health.status().message_count, 1);
    }
}
