//! Keepalive signal generation.
//!
//! Fills 8-bit unsigned PCM buffers with a sparse click train that sits just
//! above the zero level: quiet enough to be inaudible, loud enough that an
//! optical/HDMI receiver never sees digital silence.

#![cfg_attr(not(feature = "std"), no_std)]

mod pulse;

pub use pulse::{PulsePattern, DEFAULT_AMPLITUDE, DEFAULT_PERIOD, U8_FULL_SCALE, U8_ZERO_LEVEL};
