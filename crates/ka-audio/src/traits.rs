//! Output device traits and error types.

use ka_core::{AudioFormat, FrameBuffer};
use thiserror::Error;

use crate::engine::CompletionHandle;

/// Error type for audio operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    /// No output device available
    #[error("no audio output device available")]
    NoDevice,
    /// Failed to initialize audio device
    #[error("device init error: {0}")]
    DeviceInit(String),
    /// Failed to create audio stream
    #[error("stream create error: {0}")]
    StreamCreate(String),
    /// Playback error
    #[error("playback error: {0}")]
    Playback(String),
    /// Device offers no sample format we can convert to
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    /// Both buffer slots are already queued
    #[error("output queue is full")]
    QueueFull,
}

/// Something the device reports back to the engine from its audio thread.
#[derive(Debug)]
pub enum EngineEvent {
    /// A buffer finished playing and is handed back for refill.
    BufferCompleted(FrameBuffer),
    /// The stream hit an asynchronous error.
    DeviceError(String),
}

/// An opened output queue.
///
/// Buffers are played in the order they were enqueued; each finished buffer
/// is returned through the [`CompletionHandle`] given to
/// [`OutputBackend::open`].
pub trait OutputDevice: Send {
    /// Queue a buffer for playback.
    fn enqueue(&mut self, buffer: FrameBuffer) -> Result<(), AudioError>;

    /// Begin consuming queued buffers.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Halt playback and release the device along with any queued buffers.
    ///
    /// Blocks until the device's audio thread has exited. Once this returns
    /// the device no longer calls into the completion handle and every
    /// buffer it held has been dropped, so the engine's live-buffer count
    /// reads zero right after `AudioOutputEngine::stop`.
    fn stop(self: Box<Self>);
}

/// Factory for output devices.
pub trait OutputBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Acquire an output queue configured for `format`.
    fn open(
        &self,
        format: &AudioFormat,
        completions: CompletionHandle,
    ) -> Result<Box<dyn OutputDevice>, AudioError>;
}
