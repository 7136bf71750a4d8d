//! Pagination State
//!
//! Per-instance record of cursor, counters, and lifecycle phase, with
//! guarded transitions. The `Fetching` phase is the single-flight lock:
//! `mark_fetching` is check-then-set and always runs under the instance
//! mutex, so a second trigger observes `Fetching` and backs off.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::merge::ListContainer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Idle,
    Fetching,
    Error,
    Exhausted,
}

/// Next-page descriptor persisted between fetch cycles. Carried by the
/// sentinel element's data attributes in the markup; this is the only
/// state that survives a fetch cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sentinel {
    pub next_locator: String,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationState {
    cursor: Option<String>,
    /// Locators already fetched, in order. Guards cursor monotonicity.
    consumed: Vec<String>,
    pub current_page: Option<u32>,
    pub total_pages: Option<u32>,
    pub total_units: Option<usize>,
    pub loaded_units: usize,
    phase: LoadPhase,
    epoch: u64,
    retryable: bool,
}

impl PaginationState {
    pub fn new(cursor: Option<String>) -> Self {
        Self {
            cursor,
            consumed: Vec::new(),
            current_page: None,
            total_pages: None,
            total_units: None,
            loaded_units: 0,
            phase: LoadPhase::Idle,
            epoch: 0,
            retryable: true,
        }
    }

    /// State for a container whose markup already says there is nothing
    /// left to load.
    pub fn exhausted() -> Self {
        let mut state = Self::new(None);
        state.phase = LoadPhase::Exhausted;
        state
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether a manual retry may re-enter the trigger path after an error.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Check-then-transition into `Fetching`. Returns the epoch token the
    /// in-flight request must present when it settles, or `None` when the
    /// instance is not eligible (wrong phase, or no cursor to fetch).
    pub fn mark_fetching(&mut self) -> Option<u64> {
        if self.phase != LoadPhase::Idle || self.cursor.is_none() {
            return None;
        }
        self.phase = LoadPhase::Fetching;
        Some(self.epoch)
    }

    /// Consume the current cursor and adopt the next locator. Lands in
    /// `Idle` when a fresh locator exists, `Exhausted` when it is absent or
    /// repeats one already consumed.
    pub fn advance(&mut self, next_locator: Option<String>) -> LoadPhase {
        if let Some(prev) = self.cursor.take() {
            self.consumed.push(prev);
        }
        self.phase = match next_locator {
            Some(next) if self.consumed.iter().any(|c| c == &next) => {
                warn!(locator = %next, "next locator repeats a consumed one, treating as exhausted");
                LoadPhase::Exhausted
            }
            Some(next) => {
                self.cursor = Some(next);
                LoadPhase::Idle
            }
            None => LoadPhase::Exhausted,
        };
        self.phase
    }

    /// Transition to `Error`, preserving the last-known-good cursor so a
    /// manual retry resumes from the same point. Terminal errors drop
    /// retry eligibility.
    pub fn mark_error(&mut self, terminal: bool) {
        self.phase = LoadPhase::Error;
        if terminal {
            self.retryable = false;
        }
    }

    /// Re-enter `Idle` from a retryable error for an explicit retry.
    pub fn clear_error(&mut self) -> bool {
        if self.phase == LoadPhase::Error && self.retryable {
            self.phase = LoadPhase::Idle;
            true
        } else {
            false
        }
    }

    pub fn mark_exhausted(&mut self) {
        if let Some(prev) = self.cursor.take() {
            self.consumed.push(prev);
        }
        self.phase = LoadPhase::Exhausted;
    }

    /// Invalidate any in-flight request after a rebind; a response settling
    /// under an older epoch is discarded.
    pub fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    pub fn record_merged(&mut self, count: usize) {
        self.loaded_units += count;
    }

    /// Adopt revised counters from a response. `None` means the value was
    /// missing or unparsable, and the previous value is retained.
    pub fn reconcile_counters(
        &mut self,
        current_page: Option<u32>,
        total_pages: Option<u32>,
        total_units: Option<usize>,
    ) {
        if let Some(current) = current_page {
            self.current_page = Some(current);
        }
        if let Some(total) = total_pages {
            self.total_pages = Some(total);
        }
        if let Some(total) = total_units {
            self.total_units = Some(total);
        }
    }

    /// Whether the known counters already rule out further pages. Unknown
    /// counters are treated as unbounded.
    pub fn counters_exhausted(&self) -> bool {
        match (self.current_page, self.total_pages) {
            (Some(current), Some(total)) => current >= total,
            _ => false,
        }
    }
}

/// One bound list: the live container model, the sentinel that drives the
/// next fetch, and the pagination state. Shared behind a mutex; locks are
/// held only for synchronous transition steps, never across the fetch
/// await.
#[derive(Debug)]
pub struct ListInstance {
    pub container: ListContainer,
    pub sentinel: Option<Sentinel>,
    pub state: PaginationState,
    pub section_id: Option<String>,
}

impl ListInstance {
    pub fn new(
        container: ListContainer,
        sentinel: Option<Sentinel>,
        state: PaginationState,
        section_id: Option<String>,
    ) -> Self {
        Self {
            container,
            sentinel,
            state,
            section_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_cursor(cursor: &str) -> PaginationState {
        PaginationState::new(Some(cursor.to_string()))
    }

    #[test]
    fn test_mark_fetching_is_single_flight() {
        let mut state = state_with_cursor("/all?page=2");
        assert!(state.mark_fetching().is_some());
        assert_eq!(state.phase(), LoadPhase::Fetching);
        assert!(state.mark_fetching().is_none());
    }

    #[test]
    fn test_mark_fetching_requires_cursor() {
        let mut state = PaginationState::new(None);
        assert!(state.mark_fetching().is_none());
        assert_eq!(state.phase(), LoadPhase::Idle);
    }

    #[test]
    fn test_advance_moves_to_next_locator() {
        let mut state = state_with_cursor("/all?page=2");
        state.mark_fetching();
        assert_eq!(
            state.advance(Some("/all?page=3".to_string())),
            LoadPhase::Idle
        );
        assert_eq!(state.cursor(), Some("/all?page=3"));
    }

    #[test]
    fn test_advance_without_locator_exhausts() {
        let mut state = state_with_cursor("/all?page=5");
        state.mark_fetching();
        assert_eq!(state.advance(None), LoadPhase::Exhausted);
        assert!(state.cursor().is_none());
        assert!(state.mark_fetching().is_none());
    }

    #[test]
    fn test_repeated_locator_exhausts() {
        let mut state = state_with_cursor("/all?page=2");
        state.mark_fetching();
        state.advance(Some("/all?page=3".to_string()));
        state.mark_fetching();
        // Server echoes an already-consumed locator.
        assert_eq!(
            state.advance(Some("/all?page=2".to_string())),
            LoadPhase::Exhausted
        );
    }

    #[test]
    fn test_error_preserves_cursor_for_retry() {
        let mut state = state_with_cursor("/all?page=4");
        state.mark_fetching();
        state.mark_error(false);
        assert_eq!(state.phase(), LoadPhase::Error);
        assert_eq!(state.cursor(), Some("/all?page=4"));
        assert!(state.clear_error());
        assert!(state.mark_fetching().is_some());
    }

    #[test]
    fn test_terminal_error_is_not_retryable() {
        let mut state = state_with_cursor("/all?page=4");
        state.mark_fetching();
        state.mark_error(true);
        assert!(!state.clear_error());
        assert_eq!(state.phase(), LoadPhase::Error);
    }

    #[test]
    fn test_epoch_bump_invalidates_token() {
        let mut state = state_with_cursor("/all?page=2");
        let token = state.mark_fetching().unwrap();
        state.bump_epoch();
        assert_ne!(state.epoch(), token);
    }

    #[test]
    fn test_counter_reconciliation_keeps_previous_on_none() {
        let mut state = state_with_cursor("/all?page=2");
        state.reconcile_counters(Some(1), Some(3), Some(48));
        state.reconcile_counters(None, None, None);
        assert_eq!(state.current_page, Some(1));
        assert_eq!(state.total_pages, Some(3));
        assert_eq!(state.total_units, Some(48));
        assert!(!state.counters_exhausted());
        state.reconcile_counters(Some(3), None, None);
        assert!(state.counters_exhausted());
    }
}
