//! Simulated output device.
//!
//! Behaves like a platform output queue (two slots, FIFO playback,
//! completions on a separate thread) without touching audio hardware. Used
//! by the test suites and by `keepalive --simulate`.
//!
//! In manual mode nothing plays until the test calls
//! [`SimulatedBackend::complete_next`]. In clocked mode a thread finishes the
//! front buffer every `cycle`, the way a real device would once per second.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use heapless::Deque;
use ka_core::{AudioFormat, FrameBuffer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::debug;

use crate::engine::{CompletionHandle, BUFFER_COUNT};
use crate::traits::{AudioError, OutputBackend, OutputDevice};

/// Backend handing out simulated devices. Clones share state, so a test can
/// keep one clone for inspection while the engine owns another.
#[derive(Clone)]
pub struct SimulatedBackend {
    shared: Arc<SimShared>,
}

struct SimShared {
    cycle: Option<Duration>,
    faults: Mutex<Faults>,
    opened: AtomicUsize,
    live: AtomicUsize,
    current: Mutex<Option<Arc<SimQueue>>>,
}

#[derive(Default)]
struct Faults {
    fail_open: bool,
    fail_enqueue_after: Option<usize>,
}

struct SimQueue {
    slots: Mutex<Deque<FrameBuffer, BUFFER_COUNT>>,
    running: AtomicBool,
    completions: CompletionHandle,
}

struct SimDevice {
    queue: Arc<SimQueue>,
    backend: Arc<SimShared>,
    fail_enqueue_after: Option<usize>,
    enqueued: usize,
    clock: Option<Clock>,
}

struct Clock {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl SimulatedBackend {
    /// Devices only play when [`complete_next`](Self::complete_next) is called.
    pub fn manual() -> Self {
        Self::with_cycle(None)
    }

    /// Devices finish one buffer every `cycle` on their own thread.
    pub fn clocked(cycle: Duration) -> Self {
        Self::with_cycle(Some(cycle))
    }

    fn with_cycle(cycle: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(SimShared {
                cycle,
                faults: Mutex::new(Faults::default()),
                opened: AtomicUsize::new(0),
                live: AtomicUsize::new(0),
                current: Mutex::new(None),
            }),
        }
    }

    /// Make subsequent `open` calls fail with [`AudioError::NoDevice`].
    pub fn fail_open(&self, fail: bool) {
        lock(&self.shared.faults).fail_open = fail;
    }

    /// Make devices opened from now on reject every enqueue after the first
    /// `count`.
    pub fn fail_enqueue_after(&self, count: Option<usize>) {
        lock(&self.shared.faults).fail_enqueue_after = count;
    }

    /// Devices opened over the backend's lifetime.
    pub fn opened_devices(&self) -> usize {
        self.shared.opened.load(Ordering::Acquire)
    }

    /// Devices opened and not yet released.
    pub fn live_devices(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Buffers waiting in the current device's queue.
    pub fn queued(&self) -> usize {
        self.current()
            .map(|queue| lock(&queue.slots).len())
            .unwrap_or(0)
    }

    /// Identity of each queued buffer, front first.
    pub fn queued_ids(&self) -> Vec<usize> {
        self.current()
            .map(|queue| {
                lock(&queue.slots)
                    .iter()
                    .map(|buffer| buffer.as_ptr() as usize)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Copy of the most recently queued buffer.
    pub fn last_queued_samples(&self) -> Option<Vec<u8>> {
        let queue = self.current()?;
        let slots = lock(&queue.slots);
        slots.back().map(|buffer| buffer.to_vec())
    }

    /// Finish playing the front buffer of the running device.
    ///
    /// Returns false when there is no running device or its queue is empty.
    pub fn complete_next(&self) -> bool {
        match self.current() {
            Some(queue) => queue.complete_front(),
            None => false,
        }
    }

    fn current(&self) -> Option<Arc<SimQueue>> {
        lock(&self.shared.current).clone()
    }
}

impl OutputBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn open(
        &self,
        format: &AudioFormat,
        completions: CompletionHandle,
    ) -> Result<Box<dyn OutputDevice>, AudioError> {
        let faults = lock(&self.shared.faults);
        if faults.fail_open {
            return Err(AudioError::NoDevice);
        }

        let queue = Arc::new(SimQueue {
            slots: Mutex::new(Deque::new()),
            running: AtomicBool::new(false),
            completions,
        });
        *lock(&self.shared.current) = Some(queue.clone());
        self.shared.opened.fetch_add(1, Ordering::AcqRel);
        self.shared.live.fetch_add(1, Ordering::AcqRel);
        debug!(rate = format.sample_rate, "simulated device opened");

        Ok(Box::new(SimDevice {
            queue,
            backend: self.shared.clone(),
            fail_enqueue_after: faults.fail_enqueue_after,
            enqueued: 0,
            clock: None,
        }))
    }
}

impl SimQueue {
    fn complete_front(&self) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        // Pop under the lock, deliver without it: the engine requeues from
        // inside the completion.
        let finished = lock(&self.slots).pop_front();
        match finished {
            Some(buffer) => {
                self.completions.buffer_done(buffer);
                true
            }
            None => false,
        }
    }
}

impl OutputDevice for SimDevice {
    fn enqueue(&mut self, buffer: FrameBuffer) -> Result<(), AudioError> {
        if self
            .fail_enqueue_after
            .is_some_and(|limit| self.enqueued >= limit)
        {
            return Err(AudioError::DeviceInit("simulated enqueue failure".into()));
        }
        lock(&self.queue.slots)
            .push_back(buffer)
            .map_err(|_| AudioError::QueueFull)?;
        self.enqueued += 1;
        Ok(())
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.queue.running.store(true, Ordering::Release);
        if let (Some(cycle), None) = (self.backend.cycle, self.clock.as_ref()) {
            let (stop, ticks) = crossbeam_channel::bounded(0);
            let queue = self.queue.clone();
            let thread = std::thread::Builder::new()
                .name("keepalive-sim-output".into())
                .spawn(move || clock_thread(queue, cycle, ticks))
                .map_err(|e| AudioError::Playback(e.to_string()))?;
            self.clock = Some(Clock { stop, thread });
        }
        Ok(())
    }

    fn stop(self: Box<Self>) {
        // Teardown lives in Drop, shared with devices that never started.
        drop(self);
    }
}

impl Drop for SimDevice {
    fn drop(&mut self) {
        self.queue.running.store(false, Ordering::Release);
        if let Some(clock) = self.clock.take() {
            drop(clock.stop);
            let _ = clock.thread.join();
        }
        lock(&self.queue.slots).clear();

        let mut current = lock(&self.backend.current);
        if current
            .as_ref()
            .is_some_and(|queue| Arc::ptr_eq(queue, &self.queue))
        {
            *current = None;
        }
        self.backend.live.fetch_sub(1, Ordering::AcqRel);
    }
}

fn clock_thread(queue: Arc<SimQueue>, cycle: Duration, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(cycle) {
            Err(RecvTimeoutError::Timeout) => {
                queue.complete_front();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ka_core::BufferLedger;

    fn open(backend: &SimulatedBackend) -> Box<dyn OutputDevice> {
        backend
            .open(&AudioFormat::KEEPALIVE, CompletionHandle::detached())
            .unwrap()
    }

    #[test]
    fn queue_holds_two_buffers() {
        let backend = SimulatedBackend::manual();
        let ledger = BufferLedger::new();
        let mut device = open(&backend);

        device.enqueue(FrameBuffer::new(4, 0x80, &ledger)).unwrap();
        device.enqueue(FrameBuffer::new(4, 0x80, &ledger)).unwrap();
        let err = device.enqueue(FrameBuffer::new(4, 0x80, &ledger)).unwrap_err();

        assert_eq!(err, AudioError::QueueFull);
        assert_eq!(backend.queued(), 2);
        assert_eq!(ledger.live(), 2);

        device.stop();
        assert_eq!(ledger.live(), 0);
        assert_eq!(backend.live_devices(), 0);
    }

    #[test]
    fn stop_joins_clock_and_releases_buffers() {
        let backend = SimulatedBackend::clocked(Duration::from_secs(60));
        let ledger = BufferLedger::new();
        let mut device = open(&backend);
        device.enqueue(FrameBuffer::new(4, 0x80, &ledger)).unwrap();
        device.enqueue(FrameBuffer::new(4, 0x80, &ledger)).unwrap();
        device.start().unwrap();

        device.stop();

        assert_eq!(ledger.live(), 0);
        assert_eq!(backend.live_devices(), 0);
        assert!(!backend.complete_next());
    }

    #[test]
    fn nothing_plays_before_start() {
        let backend = SimulatedBackend::manual();
        let ledger = BufferLedger::new();
        let mut device = open(&backend);
        device.enqueue(FrameBuffer::new(4, 0x80, &ledger)).unwrap();

        assert!(!backend.complete_next());
        device.start().unwrap();
        assert!(backend.complete_next());
        // Detached handle drops the returned buffer.
        assert_eq!(ledger.live(), 0);
        assert!(!backend.complete_next());
    }

    #[test]
    fn open_failure_is_reported() {
        let backend = SimulatedBackend::manual();
        backend.fail_open(true);
        let result = backend.open(&AudioFormat::KEEPALIVE, CompletionHandle::detached());
        assert!(matches!(result, Err(AudioError::NoDevice)));
        assert_eq!(backend.opened_devices(), 0);
    }

    #[test]
    fn complete_next_without_device() {
        let backend = SimulatedBackend::manual();
        assert!(!backend.complete_next());
        assert_eq!(backend.queued(), 0);
        assert!(backend.queued_ids().is_empty());
    }
}
