//! Processor state tracking (spec §3/§4.2).
//!
//! Direct port of `original_source/internal/states.go`'s `StateTracker`:
//! a lock-guarded table of `{current, target}` state pairs keyed by
//! processor ID, plus a poll-based wait for convergence. Uses
//! `parking_lot::RwLock` in place of Go's `sync.RWMutex`, matching the lock
//! type `horus_core`'s shared-state types use throughout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::{EdgeError, EdgeResult};
use crate::models::ProcessorState;

/// Default timeout for [`StateTracker::wait_for_target_state`] (spec §4.2).
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Poll interval while waiting for a processor to converge on its target
/// state (spec §4.2). Chosen to match `WaitForProcessorTargetState`'s 1s
/// poll in the original.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct StateEntry {
    current: ProcessorState,
    target: ProcessorState,
}

/// Thread-safe current/target state table for every known processor
/// (one per camera). A processor absent from the table reports
/// [`ProcessorState::NotFound`] from [`StateTracker::get_current_state`] and
/// [`StateTracker::get_target_state`] rather than erroring: the sentinel
/// *is* the not-found signal, matching the original's zero-value behavior.
pub struct StateTracker {
    entries: RwLock<HashMap<u64, StateEntry>>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a processor, defaulting both current and target state to
    /// `Starting`. Idempotent: calling twice for the same ID resets both
    /// fields.
    pub fn register(&self, processor_id: u64) {
        let mut entries = self.entries.write();
        entries.insert(
            processor_id,
            StateEntry {
                current: ProcessorState::Starting,
                target: ProcessorState::Starting,
            },
        );
    }

    pub fn unregister(&self, processor_id: u64) {
        self.entries.write().remove(&processor_id);
    }

    pub fn set_current_state(&self, processor_id: u64, state: ProcessorState) {
        let mut entries = self.entries.write();
        entries
            .entry(processor_id)
            .and_modify(|e| e.current = state)
            .or_insert(StateEntry {
                current: state,
                target: state,
            });
    }

    pub fn set_target_state(&self, processor_id: u64, state: ProcessorState) {
        let mut entries = self.entries.write();
        entries
            .entry(processor_id)
            .and_modify(|e| e.target = state)
            .or_insert(StateEntry {
                current: ProcessorState::Starting,
                target: state,
            });
    }

    pub fn get_current_state(&self, processor_id: u64) -> ProcessorState {
        self.entries
            .read()
            .get(&processor_id)
            .map(|e| e.current)
            .unwrap_or(ProcessorState::NotFound)
    }

    pub fn get_target_state(&self, processor_id: u64) -> ProcessorState {
        self.entries
            .read()
            .get(&processor_id)
            .map(|e| e.target)
            .unwrap_or(ProcessorState::NotFound)
    }

    /// Block, polling every second, until `processor_id`'s current state
    /// equals `target`, or `timeout` elapses. Never holds the internal lock
    /// across the sleep — each poll takes and releases the read lock.
    pub async fn wait_for_target_state(
        &self,
        processor_id: u64,
        target: ProcessorState,
        timeout: Option<Duration>,
    ) -> EdgeResult<()> {
        let timeout = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
        let deadline = Instant::now() + timeout;

        loop {
            if self.get_current_state(processor_id) == target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(EdgeError::Timeout(format!(
                    "processor {processor_id} did not reach state {target} within {timeout:?}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_processor_reports_not_found() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.get_current_state(99), ProcessorState::NotFound);
        assert_eq!(tracker.get_target_state(99), ProcessorState::NotFound);
    }

    #[test]
    fn register_then_transition() {
        let tracker = StateTracker::new();
        tracker.register(1);
        assert_eq!(tracker.get_current_state(1), ProcessorState::Starting);

        tracker.set_current_state(1, ProcessorState::Running);
        assert_eq!(tracker.get_current_state(1), ProcessorState::Running);

        tracker.set_target_state(1, ProcessorState::Stopped);
        assert_eq!(tracker.get_target_state(1), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn wait_for_target_state_resolves_once_current_catches_up() {
        let tracker = std::sync::Arc::new(StateTracker::new());
        tracker.register(1);
        tracker.set_target_state(1, ProcessorState::Stopped);

        let waiter = tracker.clone();
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_target_state(1, ProcessorState::Stopped, Some(Duration::from_secs(5)))
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker.set_current_state(1, ProcessorState::Stopped);

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wait_for_target_state_times_out() {
        let tracker = StateTracker::new();
        tracker.register(1);
        tracker.set_target_state(1, ProcessorState::Stopped);

        let result = tracker
            .wait_for_target_state(1, ProcessorState::Stopped, Some(Duration::from_millis(50)))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().is_timeout());
    }
}
