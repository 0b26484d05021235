//! Double-buffered keepalive output.
//!
//! Two [`FrameBuffer`]s circulate between the engine and the device. When
//! the device finishes one it sends it back as an
//! [`EngineEvent::BufferCompleted`]; the engine refills it and queues it
//! again, so the device always has the next second of signal waiting.
//!
//! One mutex guards the Playing/Stopped transition, the device handle and the
//! session counter. Completions are tagged with the session that produced
//! them, so a buffer returned after `stop()` (or from an earlier run) is
//! dropped instead of being pushed into a device that no longer exists.

use ka_core::{AudioFormat, BufferLedger, EngineState, FrameBuffer};
use ka_signal::PulsePattern;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, warn};

use crate::traits::{AudioError, EngineEvent, OutputBackend, OutputDevice};

/// Buffers in flight per session.
pub const BUFFER_COUNT: usize = 2;

/// Counters for observing the engine from outside.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Successful Stopped → Playing transitions.
    pub sessions_started: u64,
    /// Playing → Stopped transitions.
    pub sessions_stopped: u64,
    /// Buffers the device finished and the engine requeued.
    pub buffers_completed: u64,
}

/// Owns the output device and both frame buffers.
pub struct AudioOutputEngine {
    backend: Box<dyn OutputBackend>,
    shared: Arc<Shared>,
}

struct Shared {
    format: AudioFormat,
    pattern: PulsePattern,
    ledger: BufferLedger,
    inner: Mutex<Inner>,
    sessions_started: AtomicU64,
    sessions_stopped: AtomicU64,
    buffers_completed: AtomicU64,
}

struct Inner {
    state: EngineState,
    session: u64,
    device: Option<Box<dyn OutputDevice>>,
}

/// Route from a device's audio thread back into the engine.
///
/// Holds only a weak reference, so an outstanding handle never keeps a
/// dropped engine alive; events sent after that are discarded.
#[derive(Clone, Debug)]
pub struct CompletionHandle {
    shared: Weak<Shared>,
    session: u64,
}

impl CompletionHandle {
    /// A handle connected to nothing. Every event is dropped.
    pub fn detached() -> Self {
        Self {
            shared: Weak::new(),
            session: 0,
        }
    }

    /// Deliver an event to the engine's state machine.
    pub fn deliver(&self, event: EngineEvent) {
        match self.shared.upgrade() {
            Some(shared) => shared.handle(self.session, event),
            None => drop(event),
        }
    }

    /// Shorthand for [`EngineEvent::BufferCompleted`].
    pub fn buffer_done(&self, buffer: FrameBuffer) {
        self.deliver(EngineEvent::BufferCompleted(buffer));
    }
}

impl AudioOutputEngine {
    /// Create a stopped engine emitting the default pulse pattern.
    pub fn new(backend: Box<dyn OutputBackend>) -> Self {
        Self::with_pattern(backend, PulsePattern::default())
    }

    /// Create a stopped engine with a custom pulse pattern.
    pub fn with_pattern(backend: Box<dyn OutputBackend>, pattern: PulsePattern) -> Self {
        Self {
            backend,
            shared: Arc::new(Shared {
                format: AudioFormat::KEEPALIVE,
                pattern,
                ledger: BufferLedger::new(),
                inner: Mutex::new(Inner {
                    state: EngineState::Stopped,
                    session: 0,
                    device: None,
                }),
                sessions_started: AtomicU64::new(0),
                sessions_stopped: AtomicU64::new(0),
                buffers_completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.shared.format
    }

    pub fn pattern(&self) -> PulsePattern {
        self.shared.pattern
    }

    pub fn state(&self) -> EngineState {
        self.shared.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == EngineState::Playing
    }

    /// Frame buffers currently allocated by this engine.
    pub fn live_buffers(&self) -> usize {
        self.shared.ledger.live()
    }

    /// Buffers completed over the engine's lifetime.
    pub fn buffers_completed(&self) -> u64 {
        self.shared.buffers_completed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            sessions_started: self.shared.sessions_started.load(Ordering::Acquire),
            sessions_stopped: self.shared.sessions_stopped.load(Ordering::Acquire),
            buffers_completed: self.buffers_completed(),
        }
    }

    /// Open the device, queue both buffers and start playback.
    ///
    /// A no-op when already playing. On failure everything acquired so far is
    /// released and the engine stays stopped.
    pub fn start(&self) -> Result<(), AudioError> {
        let mut inner = self.shared.lock();
        if inner.state == EngineState::Playing {
            debug!("start ignored, already playing");
            return Ok(());
        }

        inner.session += 1;
        let completions = CompletionHandle {
            shared: Arc::downgrade(&self.shared),
            session: inner.session,
        };

        let mut device = match self.backend.open(&self.shared.format, completions) {
            Ok(device) => device,
            Err(err) => {
                warn!(backend = self.backend.name(), "failed to open output: {}", err);
                return Err(err);
            }
        };

        if let Err(err) = self.prime(device.as_mut()) {
            // The device may already be calling back into us; release the
            // lock before tearing it down.
            drop(inner);
            device.stop();
            warn!(backend = self.backend.name(), "failed to start output: {}", err);
            return Err(err);
        }

        inner.device = Some(device);
        inner.state = EngineState::Playing;
        self.shared.sessions_started.fetch_add(1, Ordering::AcqRel);
        info!(
            backend = self.backend.name(),
            session = inner.session,
            "keepalive output started"
        );
        Ok(())
    }

    /// Stop playback and release the device and buffers. Idempotent.
    pub fn stop(&self) {
        let device = {
            let mut inner = self.shared.lock();
            if inner.state == EngineState::Stopped {
                return;
            }
            inner.state = EngineState::Stopped;
            inner.device.take()
        };

        // Outside the lock: an in-flight completion needs it to observe
        // Stopped while the device waits for its audio thread to finish.
        if let Some(device) = device {
            device.stop();
        }
        self.shared.sessions_stopped.fetch_add(1, Ordering::AcqRel);
        info!(backend = self.backend.name(), "keepalive output stopped");
    }

    fn prime(&self, device: &mut dyn OutputDevice) -> Result<(), AudioError> {
        let len = self.shared.format.buffer_len();
        let zero = self.shared.format.zero_level();
        for _ in 0..BUFFER_COUNT {
            let mut buffer = FrameBuffer::new(len, zero, &self.shared.ledger);
            self.shared.pattern.fill(&mut buffer);
            device.enqueue(buffer)?;
        }
        device.start()
    }
}

impl Drop for AudioOutputEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self, session: u64, event: EngineEvent) {
        match event {
            EngineEvent::BufferCompleted(mut buffer) => {
                let mut inner = self.lock();
                if inner.state != EngineState::Playing || inner.session != session {
                    debug!(session, "dropping buffer returned after stop");
                    return;
                }
                let Some(device) = inner.device.as_mut() else {
                    return;
                };

                self.pattern.fill(&mut buffer);
                match device.enqueue(buffer) {
                    Ok(()) => {
                        self.buffers_completed.fetch_add(1, Ordering::AcqRel);
                    }
                    Err(err) => warn!(session, "failed to requeue buffer: {}", err),
                }
            }
            EngineEvent::DeviceError(message) => {
                error!(session, "audio device error: {}", message);
            }
        }
    }
}
