use serde::Serialize;
use std::sync::{Condvar, Mutex};

use crate::error::{MixerError, MixerResult};

/// Lifecycle of a [`crate::mixer::Mixer`]. States only ever advance along
/// `New → Warmup → Initialized → Started → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MixerState {
    New,
    Warmup,
    Initialized,
    Started,
    Stopping,
    Stopped,
}

impl MixerState {
    /// The only state allowed to move into `self`.
    pub fn predecessor(self) -> Option<MixerState> {
        match self {
            Self::New => None,
            Self::Warmup => Some(Self::New),
            Self::Initialized => Some(Self::Warmup),
            Self::Started => Some(Self::Initialized),
            Self::Stopping => Some(Self::Started),
            Self::Stopped => Some(Self::Stopping),
        }
    }

    pub fn can_advance_to(self, next: MixerState) -> bool {
        next.predecessor() == Some(self)
    }

    /// Scenarios may be submitted in these states.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Initialized | Self::Started)
    }
}

/// Shared state field with change notification.
#[derive(Debug)]
pub(crate) struct StateCell {
    state: Mutex<MixerState>,
    changed: Condvar,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MixerState::New),
            changed: Condvar::new(),
        }
    }

    pub fn get(&self) -> MixerState {
        *self.state.lock().unwrap()
    }

    /// Move to `next` if the transition table allows it.
    pub fn advance(&self, next: MixerState) -> MixerResult<MixerState> {
        let mut state = self.state.lock().unwrap();
        let from = *state;
        if !from.can_advance_to(next) {
            return Err(MixerError::InvalidTransition { from, to: next });
        }
        *state = next;
        self.changed.notify_all();
        Ok(from)
    }

    /// Block while `waiting` holds, returning the first state for which it
    /// does not.
    pub fn wait_while<F>(&self, mut waiting: F) -> MixerState
    where
        F: FnMut(MixerState) -> bool,
    {
        let state = self.state.lock().unwrap();
        let state = self
            .changed
            .wait_while(state, |state| waiting(*state))
            .unwrap();
        *state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn only_the_linear_chain_is_allowed() {
        let chain = [
            MixerState::New,
            MixerState::Warmup,
            MixerState::Initialized,
            MixerState::Started,
            MixerState::Stopping,
            MixerState::Stopped,
        ];
        for from in chain {
            for to in chain {
                let expected = chain
                    .windows(2)
                    .any(|pair| pair[0] == from && pair[1] == to);
                assert_eq!(from.can_advance_to(to), expected, "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn rejected_transitions_leave_the_state_alone() {
        let cell = StateCell::new();
        let err = cell.advance(MixerState::Started).unwrap_err();
        assert!(matches!(
            err,
            MixerError::InvalidTransition {
                from: MixerState::New,
                to: MixerState::Started
            }
        ));
        assert_eq!(cell.get(), MixerState::New);
        assert_eq!(cell.advance(MixerState::Warmup).unwrap(), MixerState::New);
    }

    #[test]
    fn waiters_wake_on_transition() {
        let cell = Arc::new(StateCell::new());
        cell.advance(MixerState::Warmup).unwrap();
        let waiter = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || cell.wait_while(|state| state == MixerState::Warmup))
        };
        cell.advance(MixerState::Initialized).unwrap();
        assert_eq!(waiter.join().unwrap(), MixerState::Initialized);
    }
}
