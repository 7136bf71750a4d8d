//! Visibility Trigger Monitor
//!
//! Gate between the embedder's viewport signals and the fetch coordinator.
//! The embedder owns geometry (it knows when the sentinel scrolled into
//! view); the monitor owns eligibility: it is `armed` only while the
//! instance can still grow, and it drops signal storms that arrive while
//! a fetch is in flight.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fetch::TriggerKind;
use crate::state::LoadPhase;

/// A signal from the embedder's viewport integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewportSignal {
    /// The sentinel element intersected the viewport.
    SentinelVisible,
    /// The user explicitly asked for more content.
    LoadMoreRequested,
}

/// Per-instance arm state. Arming is idempotent, so repeated lifecycle
/// scans never stack observers: one monitor per instance, one armed flag
/// per monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityMonitor {
    armed: bool,
}

impl VisibilityMonitor {
    pub fn armed() -> Self {
        Self { armed: true }
    }

    pub fn disarmed() -> Self {
        Self { armed: false }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Re-observe after a successful fetch replaced the sentinel.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Stop observing: exhaustion, terminal error, or teardown.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Decide whether a signal becomes a trigger. Intersection signals
    /// require an idle instance; the explicit path additionally passes
    /// through a retryable error so the user can recover a failed load.
    pub fn accept(
        &self,
        signal: ViewportSignal,
        phase: LoadPhase,
        retryable: bool,
    ) -> Option<TriggerKind> {
        if !self.armed {
            debug!(?signal, "signal ignored, monitor disarmed");
            return None;
        }
        match signal {
            ViewportSignal::SentinelVisible if phase == LoadPhase::Idle => {
                Some(TriggerKind::SentinelVisible)
            }
            ViewportSignal::LoadMoreRequested
                if phase == LoadPhase::Idle || (phase == LoadPhase::Error && retryable) =>
            {
                Some(TriggerKind::Manual)
            }
            _ => {
                debug!(?signal, ?phase, "signal dropped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disarmed_monitor_drops_everything() {
        let monitor = VisibilityMonitor::disarmed();
        assert!(monitor
            .accept(ViewportSignal::SentinelVisible, LoadPhase::Idle, true)
            .is_none());
        assert!(monitor
            .accept(ViewportSignal::LoadMoreRequested, LoadPhase::Idle, true)
            .is_none());
    }

    #[test]
    fn test_intersection_requires_idle() {
        let monitor = VisibilityMonitor::armed();
        assert_eq!(
            monitor.accept(ViewportSignal::SentinelVisible, LoadPhase::Idle, true),
            Some(TriggerKind::SentinelVisible)
        );
        for phase in [LoadPhase::Fetching, LoadPhase::Error, LoadPhase::Exhausted] {
            assert!(monitor
                .accept(ViewportSignal::SentinelVisible, phase, true)
                .is_none());
        }
    }

    #[test]
    fn test_explicit_request_can_retry_recoverable_error() {
        let monitor = VisibilityMonitor::armed();
        assert_eq!(
            monitor.accept(ViewportSignal::LoadMoreRequested, LoadPhase::Error, true),
            Some(TriggerKind::Manual)
        );
        assert!(monitor
            .accept(ViewportSignal::LoadMoreRequested, LoadPhase::Error, false)
            .is_none());
        assert!(monitor
            .accept(ViewportSignal::LoadMoreRequested, LoadPhase::Fetching, true)
            .is_none());
    }

    #[test]
    fn test_arming_is_idempotent() {
        let mut monitor = VisibilityMonitor::armed();
        monitor.arm();
        monitor.arm();
        assert!(monitor.is_armed());
        monitor.disarm();
        monitor.disarm();
        assert!(!monitor.is_armed());
    }
}
