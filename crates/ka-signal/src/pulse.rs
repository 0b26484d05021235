//! Sparse pulse pattern for 8-bit unsigned PCM.

/// Zero amplitude for unsigned 8-bit PCM (the mid-point of the range).
pub const U8_ZERO_LEVEL: u8 = 0x80;

/// Largest positive excursion from the zero level.
pub const U8_FULL_SCALE: u8 = 0x7F;

/// Samples between pulses.
pub const DEFAULT_PERIOD: usize = 200;

/// Pulse height as a fraction of full scale.
pub const DEFAULT_AMPLITUDE: f32 = 0.01;

/// A click train: one raised sample every `period` samples, zero elsewhere.
///
/// The period/amplitude pair is a tuning knob. Whether a given receiver
/// stays awake depends on the hardware, so neither value is load-bearing
/// beyond "non-zero and inaudible".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulsePattern {
    period: usize,
    pulse_level: u8,
}

impl PulsePattern {
    /// Build a pattern from a period (in samples) and an amplitude fraction.
    ///
    /// The amplitude is rounded to the nearest 8-bit step but never below one
    /// step, so the pulse is always distinguishable from silence. A zero
    /// period is treated as one (every sample pulses).
    pub fn new(period: usize, amplitude: f32) -> Self {
        let steps = libm::roundf(amplitude.clamp(0.0, 1.0) * U8_FULL_SCALE as f32) as u8;
        Self {
            period: period.max(1),
            pulse_level: U8_ZERO_LEVEL + steps.max(1),
        }
    }

    /// Samples between consecutive pulses.
    pub fn period(&self) -> usize {
        self.period
    }

    /// Raw sample value written at each pulse position.
    pub fn pulse_level(&self) -> u8 {
        self.pulse_level
    }

    /// Whether sample `index` of a buffer carries a pulse.
    #[inline]
    pub fn is_pulse(&self, index: usize) -> bool {
        index % self.period == 0
    }

    /// Number of pulses a buffer of `len` samples will contain.
    pub fn pulses_in(&self, len: usize) -> usize {
        len.div_ceil(self.period)
    }

    /// Overwrite `samples` with the pattern, starting a pulse at index 0.
    ///
    /// Runs on the audio thread during refill; must not allocate.
    pub fn fill(&self, samples: &mut [u8]) {
        samples.fill(U8_ZERO_LEVEL);
        for sample in samples.iter_mut().step_by(self.period) {
            *sample = self.pulse_level;
        }
    }
}

impl Default for PulsePattern {
    fn default() -> Self {
        Self::new(DEFAULT_PERIOD, DEFAULT_AMPLITUDE)
    }
}
