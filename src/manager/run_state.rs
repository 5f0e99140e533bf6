use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;

/// Lifecycle of a key manager and its refresher.
///
/// Transitions only move forward: `NotStarted` to `Running` to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::NotStarted,
            1 => RunState::Running,
            _ => RunState::Stopped,
        }
    }
}

/// Run state shared between a key manager and its refresher, paired with the
/// cancellation token that wakes the refresher when the state is stopped
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::NotStarted as u8),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Move from `NotStarted` to `Running`. Returns false if the lifecycle
    /// had already left `NotStarted`.
    pub(crate) fn mark_running(&self) -> bool {
        self.state
            .compare_exchange(
                RunState::NotStarted as u8,
                RunState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Stopped` and cancel the refresher; returns the previous state
    pub(crate) fn stop(&self) -> RunState {
        let previous = RunState::from_u8(self.state.swap(RunState::Stopped as u8, Ordering::AcqRel));
        self.cancel.cancel();
        previous
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), RunState::NotStarted);
        assert!(lifecycle.mark_running());
        assert!(lifecycle.is_running());
        assert!(!lifecycle.mark_running());

        assert_eq!(lifecycle.stop(), RunState::Running);
        assert_eq!(lifecycle.state(), RunState::Stopped);
        assert!(lifecycle.cancellation_token().is_cancelled());
    }

    #[test]
    fn test_stopped_never_runs_again() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.stop(), RunState::NotStarted);
        assert!(!lifecycle.mark_running());
        assert_eq!(lifecycle.stop(), RunState::Stopped);
        assert!(!lifecycle.is_running());
    }
}
