//! Audio output for audio-keepalive.
//!
//! [`AudioOutputEngine`] keeps two one-second buffers cycling through an
//! output device. Devices come from an [`OutputBackend`]: [`CpalBackend`]
//! talks to the system's default output, [`SimulatedBackend`] stands in for
//! it in tests and dry runs.

mod cpal_backend;
mod engine;
mod sim_backend;
mod traits;

pub use cpal_backend::CpalBackend;
pub use engine::{AudioOutputEngine, CompletionHandle, EngineStats, BUFFER_COUNT};
pub use sim_backend::SimulatedBackend;
pub use traits::{AudioError, EngineEvent, OutputBackend, OutputDevice};
