//! Engine status visible to the application.

use std::time::SystemTime;

/// Snapshot of the engine's connection status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// Whether `initialize` has completed and not been undone.
    pub initialized: bool,
    /// Whether the transport is currently open.
    pub connected: bool,
    /// Last time the engine confirmed it was in sync (transport open or
    /// optimistic commit).
    pub last_sync_time: Option<SystemTime>,
    /// Most recent error, cleared when the transport opens.
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// Returns true if events can currently be received.
    pub fn is_live(&self) -> bool {
        self.initialized && self.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_not_live() {
        let status = SyncStatus::default();
        assert!(!status.initialized);
        assert!(!status.connected);
        assert!(!status.is_live());
        assert_eq!(status.last_sync_time, None);
    }
}
