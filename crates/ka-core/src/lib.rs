//! Core types for audio-keepalive.
//!
//! Everything here is plain data shared by the signal generator, the output
//! engine and the controller: the one PCM format the system ever plays, the
//! buffers that carry it, and the mode/state enums the controller reasons
//! about.

mod format;
mod frame_buffer;
mod mode;
mod state;

pub use format::AudioFormat;
pub use frame_buffer::{BufferLedger, FrameBuffer};
pub use mode::{ConfigError, IntervalMinutes, PlaybackMode};
pub use state::{EngineState, SchedulingState};
