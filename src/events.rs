//! Loader Event Bus
//!
//! Asynchronous pub/sub stream of loader notifications for external
//! collaborators (lazy-image activation, entrance animations, analytics).
//! One bus per loader; there is no process-wide channel, so independent
//! lists on one page never observe each other's events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum LoaderEvent {
    /// A container was bound and is eligible for progressive loading.
    Bound { container: String },
    /// A container was rebound after a structural replacement.
    Rebound { container: String },
    /// Units were merged into the live list.
    UnitsAppended {
        container: String,
        count: usize,
        /// The locator the next fetch will use, absent when exhausted.
        cursor: Option<String>,
    },
    /// No further locator exists; the instance will not fetch again.
    Exhausted { container: String },
    /// A fetch failed. `notice_ttl_ms` is how long the embedder should
    /// keep the inline message visible before auto-dismissing it.
    LoadFailed {
        container: String,
        message: String,
        retryable: bool,
        notice_ttl_ms: u64,
    },
}

pub struct EventBus {
    tx: broadcast::Sender<LoaderEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish an event to all subscribers. Lagging or absent subscribers
    /// never block the loader.
    pub fn publish(&self, event: LoaderEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
