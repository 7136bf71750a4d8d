//! Progressive Catalog Loader
//!
//! Headless infinite-scroll engine for server-rendered catalog pages:
//! - per-list pagination state with single-flight fetch coordination
//! - topology-tolerant normalization of server response bodies
//! - append-only merging into a live list model
//! - viewport-signal gating and idempotent container lifecycle
//!
//! The embedder owns rendering and geometry; it feeds viewport signals in
//! and consumes the merged unit stream, events, and collaborator hooks.

pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod lifecycle;
pub mod markup;
pub mod merge;
pub mod monitor;
pub mod normalize;
pub mod state;

// Re-exports for convenience
pub use config::LoaderConfig;
pub use error::LoaderError;
pub use events::LoaderEvent;
pub use fetch::{
    FetchCoordinator, FetchedPage, HttpPageFetcher, PageFetcher, SkipReason, TriggerKind,
    TriggerOutcome,
};
pub use lifecycle::{CatalogLoader, ContentObserver};
pub use merge::{ContentUnit, ListContainer, UnitKey};
pub use monitor::ViewportSignal;
pub use normalize::{PageCounters, PageDescriptor};
pub use state::{ListInstance, LoadPhase, PaginationState, Sentinel};
