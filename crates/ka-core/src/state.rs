//! Run states reported by the engine and the scheduler.

use std::fmt;

/// Whether the output engine is streaming.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum EngineState {
    #[default]
    Stopped,
    Playing,
}

/// Whether the pulse timer is armed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SchedulingState {
    #[default]
    Idle,
    Scheduling,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Playing => write!(f, "playing"),
        }
    }
}

impl fmt::Display for SchedulingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingState::Idle => write!(f, "idle"),
            SchedulingState::Scheduling => write!(f, "scheduling"),
        }
    }
}
