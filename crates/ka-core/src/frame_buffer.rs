//! Owned PCM buffers with leak accounting.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts live [`FrameBuffer`]s allocated against it.
///
/// Cloning shares the counter. The engine hands its ledger to every buffer it
/// allocates, so after a stop the count must be back to zero no matter which
/// thread (or device) dropped the last one.
#[derive(Clone, Debug, Default)]
pub struct BufferLedger {
    live: Arc<AtomicUsize>,
}

impl BufferLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers currently alive.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// One second of PCM, moved between the engine and the output device.
///
/// Deliberately not `Clone`: a buffer is either in the engine's hands or in
/// the device queue, never both.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    ledger: BufferLedger,
}

impl FrameBuffer {
    /// Allocate `len` bytes at `fill` and register with `ledger`.
    pub fn new(len: usize, fill: u8, ledger: &BufferLedger) -> Self {
        ledger.live.fetch_add(1, Ordering::AcqRel);
        Self {
            data: vec![fill; len],
            ledger: ledger.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for FrameBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.ledger.live.fetch_sub(1, Ordering::AcqRel);
    }
}
