use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::state::ConnectionState;

/// Process wide sync counters. Every increment is logged with its running total.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    connects: AtomicU64,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
    progress_updates: AtomicU64,
    sponsor_skips: AtomicU64,
}

/// Point in time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connects: u64,
    pub disconnects: u64,
    pub reconnects: u64,
    pub progress_updates: u64,
    pub sponsor_skips: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            progress_updates: self.progress_updates.load(Ordering::Relaxed),
            sponsor_skips: self.sponsor_skips.load(Ordering::Relaxed),
        }
    }

    pub fn record_connect(&self, user_id: &str) {
        let total = self.connects.fetch_add(1, Ordering::Relaxed) + 1;
        info!(user_id = %user_id, connect_total = total, "TV sync connected");
    }

    pub fn record_disconnect(&self, user_id: &str, state: ConnectionState, reason: Option<&str>) {
        let total = self.disconnects.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            user_id = %user_id,
            state = %state,
            reason = reason.unwrap_or(""),
            disconnect_total = total,
            "TV sync disconnected"
        );
    }

    pub fn record_reconnect(&self, user_id: &str, reason: &str) {
        let total = self.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            user_id = %user_id,
            reason = %reason,
            reconnect_total = total,
            "TV sync reconnect scheduled"
        );
    }

    pub fn record_progress_update(
        &self,
        user_id: &str,
        video_id: &str,
        incoming: u32,
        resolved: u32,
    ) {
        let total = self.progress_updates.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            user_id = %user_id,
            video_id = %video_id,
            incoming_progress = incoming,
            resolved_progress = resolved,
            progress_updates_total = total,
            "TV sync progress updated"
        );
    }

    pub fn record_sponsor_skip(&self, user_id: &str, video_id: &str, start: f64, end: f64) {
        let total = self.sponsor_skips.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            user_id = %user_id,
            video_id = %video_id,
            segment_start = start,
            segment_end = end,
            sponsor_skips_total = total,
            "TV sync sponsor segment skipped"
        );
    }
}
