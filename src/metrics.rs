//! Rollback metrics
//!
//! Aggregates transport engine events and periodic network statistics into
//! the numbers the overlay polls: how often rollbacks happen, how deep they
//! go, ping, and frame advantage. Counters reset on every peer connect and
//! disconnect so a reconnection never carries stale history.

use crate::engine::{EngineEvent, EngineNetworkStats};

/// Point-in-time metrics snapshot handed to callers
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RollbackMetrics {
    /// Cumulative number of frames rolled back
    pub rollback_frames: u32,
    /// Number of rollback events
    pub total_rollbacks: u32,
    /// Frames that ran on predicted input
    pub predicted_frames: u32,
    /// Deepest single rollback seen
    pub max_rollback_frames: u32,
    /// Exact running mean rollback depth (frames / events)
    pub avg_rollback_frames: f32,
    /// Last observed round-trip time in milliseconds
    pub ping_ms: u32,
    /// Signed frame advantage of the remote peer
    pub remote_frame_advantage: i32,
}

/// Aggregates engine events into [`RollbackMetrics`]
#[derive(Debug, Default)]
pub struct MetricsCollector {
    rollback_frames: u32,
    total_rollbacks: u32,
    predicted_frames: u32,
    max_rollback_frames: u32,
    ping_ms: u32,
    remote_frame_advantage: i32,
    /// Edge-triggered latch, cleared exactly once by
    /// [`MetricsCollector::take_rollback_latch`]
    rollback_latch: bool,
}

impl MetricsCollector {
    /// Create a collector with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one transport engine event into the counters
    pub fn on_event(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Rollback { depth } => {
                self.rollback_frames = self.rollback_frames.saturating_add(*depth);
                self.total_rollbacks = self.total_rollbacks.saturating_add(1);
                self.max_rollback_frames = self.max_rollback_frames.max(*depth);
                self.rollback_latch = true;
                log::debug!(
                    "rollback of {} frames (max {}, events {})",
                    depth,
                    self.max_rollback_frames,
                    self.total_rollbacks
                );
            }
            EngineEvent::TimeSync { frames_ahead } => {
                self.remote_frame_advantage = *frames_ahead;
            }
            EngineEvent::ConnectedToPeer { .. } | EngineEvent::DisconnectedFromPeer { .. } => {
                self.reset();
            }
            EngineEvent::ConnectionInterrupted { .. }
            | EngineEvent::ConnectionResumed { .. }
            | EngineEvent::Desync { .. } => {}
        }
    }

    /// Fold a periodic network statistics sample into the counters
    pub fn on_network_stats(&mut self, stats: &EngineNetworkStats) {
        self.ping_ms = stats.ping_ms;
        self.predicted_frames = stats.remote_frames_behind.max(0) as u32;
    }

    /// Zero every counter and clear the latch
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Current metrics values
    pub fn snapshot(&self) -> RollbackMetrics {
        let avg = if self.total_rollbacks > 0 {
            self.rollback_frames as f32 / self.total_rollbacks as f32
        } else {
            0.0
        };
        RollbackMetrics {
            rollback_frames: self.rollback_frames,
            total_rollbacks: self.total_rollbacks,
            predicted_frames: self.predicted_frames,
            max_rollback_frames: self.max_rollback_frames,
            avg_rollback_frames: avg,
            ping_ms: self.ping_ms,
            remote_frame_advantage: self.remote_frame_advantage,
        }
    }

    /// Read and clear the "rollback just occurred" latch
    ///
    /// Returns true at most once per rollback, independent of poll cadence.
    pub fn take_rollback_latch(&mut self) -> bool {
        std::mem::take(&mut self.rollback_latch)
    }
}
