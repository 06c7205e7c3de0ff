//! One-shot start gate for background tasks

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a lazily started background task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    NotStarted,
    Starting,
    Running,
    Stopped,
}

impl GateState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::NotStarted,
            1 => Self::Starting,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopped => 3,
        }
    }
}

/// `NotStarted -> Starting -> Running -> Stopped`.
///
/// Exactly one caller wins [`StartGate::try_begin`]; everyone else sees
/// `false` and must not start the task.
#[derive(Debug)]
pub struct StartGate {
    state: AtomicU8,
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

impl StartGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(GateState::NotStarted.as_u8()),
        }
    }

    pub fn state(&self) -> GateState {
        GateState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Claim the right to start. True for exactly one caller.
    pub fn try_begin(&self) -> bool {
        self.transition(GateState::NotStarted, GateState::Starting)
    }

    /// Starting -> Running
    pub fn mark_running(&self) -> bool {
        self.transition(GateState::Starting, GateState::Running)
    }

    /// Starting -> NotStarted, so a later caller may retry
    pub fn abort(&self) -> bool {
        self.transition(GateState::Starting, GateState::NotStarted)
    }

    /// Any state -> Stopped. A stopped gate never starts again.
    pub fn stop(&self) -> GateState {
        GateState::from_u8(self.state.swap(GateState::Stopped.as_u8(), Ordering::AcqRel))
    }

    fn transition(&self, from: GateState, to: GateState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
