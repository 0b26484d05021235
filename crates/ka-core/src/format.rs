//! The fixed output format.

use std::time::Duration;

/// PCM stream descriptor.
///
/// The keepalive only ever plays [`AudioFormat::KEEPALIVE`]; the struct
/// exists so backends can read the numbers instead of hard-coding them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
}

impl AudioFormat {
    /// 44.1 kHz, 8-bit unsigned, mono, linear PCM.
    pub const KEEPALIVE: AudioFormat = AudioFormat {
        sample_rate: 44100,
        bits_per_sample: 8,
        channels: 1,
    };

    /// Bytes in one frame (one sample per channel).
    pub const fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }

    /// Bytes in one buffer: one second of audio.
    pub const fn buffer_len(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_frame()
    }

    /// Frames (samples per channel) in one buffer.
    pub const fn buffer_frames(&self) -> usize {
        self.sample_rate as usize
    }

    /// Wall-clock length of one buffer.
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_frames() as f64 / self.sample_rate as f64)
    }

    /// Sample value representing zero amplitude.
    ///
    /// 8-bit linear PCM is unsigned with silence at the mid-point; wider
    /// formats are signed with silence at 0.
    pub const fn zero_level(&self) -> u8 {
        if self.bits_per_sample == 8 {
            0x80
        } else {
            0
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::KEEPALIVE
    }
}
