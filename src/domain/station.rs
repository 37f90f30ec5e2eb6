//! Station state machine (§4.3): ten states, a closed allowed-transitions
//! graph, and a bounded transition history. Mirrors the teacher's
//! preference for `Result<(), InvalidTransition>` over panics.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidTransition;

const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationState {
    Unknown,
    Disconnected,
    Connecting,
    Connected,
    Registered,
    Available,
    Charging,
    Faulted,
    Unavailable,
    Stopping,
}

impl StationState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Registered => "Registered",
            Self::Available => "Available",
            Self::Charging => "Charging",
            Self::Faulted => "Faulted",
            Self::Unavailable => "Unavailable",
            Self::Stopping => "Stopping",
        }
    }

    fn allowed_targets(self) -> &'static [StationState] {
        use StationState::*;
        match self {
            Unknown => &[Disconnected, Connecting],
            Disconnected => &[Connecting, Faulted],
            Connecting => &[Connected, Disconnected, Faulted],
            Connected => &[Registered, Disconnected, Faulted],
            Registered => &[Available, Disconnected, Faulted],
            Available => &[Charging, Unavailable, Disconnected, Faulted, Stopping],
            Charging => &[Available, Disconnected, Faulted, Stopping],
            Faulted => &[Available, Disconnected, Unavailable],
            Unavailable => &[Available, Disconnected],
            Stopping => &[Disconnected],
        }
    }

    pub fn can_transition(self, to: StationState) -> bool {
        self.allowed_targets().contains(&to)
    }
}

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: StationState,
    pub to: StationState,
    pub at: DateTime<Utc>,
}

/// Owns the current state and its bounded history. Held behind a
/// reader/writer lock on the owning `Station`; callbacks invoked as a
/// result of a transition run without the lock held (§5).
pub struct StationStateMachine {
    state: StationState,
    history: VecDeque<TransitionRecord>,
}

impl StationStateMachine {
    pub fn new() -> Self {
        Self {
            state: StationState::Unknown,
            history: VecDeque::new(),
        }
    }

    /// Constructed directly into `Disconnected`, as happens after load (§3).
    pub fn loaded() -> Self {
        Self {
            state: StationState::Disconnected,
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    pub fn history(&self) -> &VecDeque<TransitionRecord> {
        &self.history
    }

    pub fn transition(&mut self, to: StationState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition(to) {
            return Err(InvalidTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(TransitionRecord {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }
}

impl Default for StationStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_boot_sequence() {
        let mut sm = StationStateMachine::loaded();
        assert!(sm.transition(StationState::Connecting).is_ok());
        assert!(sm.transition(StationState::Connected).is_ok());
        assert!(sm.transition(StationState::Registered).is_ok());
        assert!(sm.transition(StationState::Available).is_ok());
        assert_eq!(sm.state(), StationState::Available);
        assert_eq!(sm.history().len(), 4);
    }

    #[test]
    fn rejects_skipping_states() {
        let mut sm = StationStateMachine::loaded();
        let err = sm.transition(StationState::Registered).unwrap_err();
        assert_eq!(err.from, "Disconnected");
        assert_eq!(err.to, "Registered");
        assert_eq!(sm.state(), StationState::Disconnected);
        assert_eq!(sm.history().len(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let mut sm = StationStateMachine::loaded();
        for _ in 0..150 {
            let _ = sm.transition(StationState::Connecting);
            let _ = sm.transition(StationState::Disconnected);
        }
        assert!(sm.history().len() <= HISTORY_CAP);
    }
}
