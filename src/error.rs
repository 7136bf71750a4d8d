//! Loader Error Taxonomy
//!
//! Every failure is caught at the fetch-coordinator boundary and mapped to a
//! state transition; nothing propagates to the embedder as a panic. Empty
//! pages and unparsable counters are deliberately not errors: the first is
//! exhaustion, the second falls back to the last known values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// Network-level failure before a response body was obtained.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("unexpected response status {0}")]
    Status(u16),

    /// The request outlived the configured deadline.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// No location strategy matched a list container in the response body.
    /// A shape mismatch will not resolve itself, so this is terminal for
    /// the instance.
    #[error("list container not found in response")]
    StructureNotFound,

    /// The stored next locator could not be turned into a request URL.
    #[error("invalid next locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// A signal arrived for a container identity that is not bound.
    #[error("no bound instance for container {0:?}")]
    UnknownInstance(String),
}

impl LoaderError {
    /// Terminal errors permanently disarm the trigger for the instance;
    /// every other variant leaves it eligible for a manual retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoaderError::StructureNotFound)
    }
}
