//! Connector state machine (§4.4): nine states, the OCPP 1.6
//! availability/charging graph, and a bounded transition history.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidTransition;

const HISTORY_CAP: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorState {
    Available,
    Preparing,
    Charging,
    SuspendedEVSE,
    SuspendedEV,
    Finishing,
    Reserved,
    Unavailable,
    Faulted,
}

impl ConnectorState {
    pub fn as_str(self) -> &'static str {
        use ConnectorState::*;
        match self {
            Available => "Available",
            Preparing => "Preparing",
            Charging => "Charging",
            SuspendedEVSE => "SuspendedEVSE",
            SuspendedEV => "SuspendedEV",
            Finishing => "Finishing",
            Reserved => "Reserved",
            Unavailable => "Unavailable",
            Faulted => "Faulted",
        }
    }

    fn allowed_targets(self) -> &'static [ConnectorState] {
        use ConnectorState::*;
        match self {
            Available => &[Preparing, Reserved, Unavailable, Faulted],
            Preparing => &[Charging, Available, SuspendedEVSE, SuspendedEV, Faulted],
            Charging => &[SuspendedEVSE, SuspendedEV, Finishing, Faulted],
            SuspendedEVSE => &[Charging, Finishing, Faulted],
            SuspendedEV => &[Charging, Finishing, Faulted],
            Finishing => &[Available, Faulted],
            Reserved => &[Available, Preparing, Faulted],
            Unavailable => &[Available, Faulted],
            Faulted => &[Available, Unavailable],
        }
    }

    pub fn can_transition(self, to: ConnectorState) -> bool {
        self.allowed_targets().contains(&to)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectorTransitionRecord {
    pub from: ConnectorState,
    pub to: ConnectorState,
    pub at: DateTime<Utc>,
}

pub struct ConnectorStateMachine {
    state: ConnectorState,
    history: VecDeque<ConnectorTransitionRecord>,
}

impl ConnectorStateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectorState::Available,
            history: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn history(&self) -> &VecDeque<ConnectorTransitionRecord> {
        &self.history
    }

    pub fn transition(&mut self, to: ConnectorState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition(to) {
            return Err(InvalidTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(ConnectorTransitionRecord {
            from: self.state,
            to,
            at: Utc::now(),
        });
        self.state = to;
        Ok(())
    }
}

impl Default for ConnectorStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_charging_cycle() {
        let mut sm = ConnectorStateMachine::new();
        assert!(sm.transition(ConnectorState::Preparing).is_ok());
        assert!(sm.transition(ConnectorState::Charging).is_ok());
        assert!(sm.transition(ConnectorState::Finishing).is_ok());
        assert!(sm.transition(ConnectorState::Available).is_ok());
        assert_eq!(sm.state(), ConnectorState::Available);
    }

    #[test]
    fn rejects_skipping_preparing() {
        let mut sm = ConnectorStateMachine::new();
        let before_len = sm.history().len();
        let err = sm.transition(ConnectorState::Charging).unwrap_err();
        assert_eq!(err.from, "Available");
        assert_eq!(err.to, "Charging");
        assert_eq!(sm.state(), ConnectorState::Available);
        assert_eq!(sm.history().len(), before_len);
    }

    #[test]
    fn faulted_recovers_to_available_or_unavailable() {
        let mut sm = ConnectorStateMachine::new();
        sm.transition(ConnectorState::Preparing).unwrap();
        sm.transition(ConnectorState::Faulted).unwrap();
        assert!(sm.transition(ConnectorState::Unavailable).is_ok());
    }
}
