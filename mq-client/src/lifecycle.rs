//! Client lifecycle state shared by every client role.
//!
//! The state only moves forward along
//! `Initial -> Starting -> Started -> Stopping -> Stopped`, and every move is
//! a compare-and-set so that concurrent callers race on the transition
//! itself rather than on a separate check.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClientState {
    Initial = 0,
    Starting = 1,
    Started = 2,
    Stopping = 3,
    Stopped = 4,
}

impl From<u8> for ClientState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Initial,
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "INITIAL",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a [`ClientState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ClientState::Initial as u8),
        }
    }

    #[inline]
    pub fn state(&self) -> ClientState {
        ClientState::from(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.state() == ClientState::Started
    }

    /// Move from `expected` to `next`. Returns true only for the caller that
    /// performed the transition. Backward moves are refused outright.
    pub fn compare_and_set(&self, expected: ClientState, next: ClientState) -> bool {
        if next <= expected {
            return false;
        }
        self.state
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_initial_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ClientState::Initial);
        assert!(!lifecycle.is_started());
    }

    #[test]
    fn test_forward_transitions() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.compare_and_set(ClientState::Initial, ClientState::Starting));
        assert!(lifecycle.compare_and_set(ClientState::Starting, ClientState::Started));
        assert!(lifecycle.is_started());
        assert!(lifecycle.compare_and_set(ClientState::Started, ClientState::Stopping));
        assert!(lifecycle.compare_and_set(ClientState::Stopping, ClientState::Stopped));
        assert_eq!(lifecycle.state(), ClientState::Stopped);
    }

    #[test]
    fn test_backward_transition_refused() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.compare_and_set(ClientState::Initial, ClientState::Starting));
        assert!(!lifecycle.compare_and_set(ClientState::Starting, ClientState::Initial));
        assert!(!lifecycle.compare_and_set(ClientState::Starting, ClientState::Starting));
        assert_eq!(lifecycle.state(), ClientState::Starting);
    }

    #[test]
    fn test_mismatched_expectation_refused() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.compare_and_set(ClientState::Started, ClientState::Stopping));
        assert_eq!(lifecycle.state(), ClientState::Initial);
    }

    #[test]
    fn test_concurrent_transition_has_single_winner() {
        let lifecycle = Arc::new(Lifecycle::new());
        assert!(lifecycle.compare_and_set(ClientState::Initial, ClientState::Starting));
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                let winners = winners.clone();
                std::thread::spawn(move || {
                    if lifecycle.compare_and_set(ClientState::Starting, ClientState::Started) {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_started());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ClientState::Stopping.to_string(), "STOPPING");
        assert_eq!(ClientState::from(200), ClientState::Stopped);
    }
}
