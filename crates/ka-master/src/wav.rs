//! WAV encoding of the keepalive signal (8-bit unsigned mono PCM).

use ka_core::AudioFormat;
use ka_signal::PulsePattern;
use std::io::Write;

pub fn write_wav(w: &mut impl Write, samples: &[u8], format: &AudioFormat) -> std::io::Result<()> {
    let block_align = format.bytes_per_frame() as u16;
    let data_size = riff_data_size(samples.len())?;

    write_riff_header(w, data_size)?;
    write_fmt_chunk(w, format, block_align)?;
    write_data_chunk(w, samples, data_size)
}

/// Generate `seconds` of back-to-back buffers, as the engine would play them.
pub fn render_signal(pattern: &PulsePattern, format: &AudioFormat, seconds: u32) -> Vec<u8> {
    let len = format.buffer_len();
    let mut samples = vec![format.zero_level(); len * seconds as usize];
    for buffer in samples.chunks_mut(len) {
        pattern.fill(buffer);
    }
    samples
}

pub fn signal_to_wav(pattern: &PulsePattern, seconds: u32) -> Vec<u8> {
    let format = AudioFormat::KEEPALIVE;
    let samples = render_signal(pattern, &format, seconds);
    let mut buf = Vec::with_capacity(44 + samples.len());
    write_wav(&mut buf, &samples, &format).expect("Vec<u8> write cannot fail");
    buf
}

/// RIFF sizes are 32-bit and the header counts 36 bytes on top of the data.
fn riff_data_size(len: usize) -> std::io::Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|size| size.checked_add(36).is_some())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "signal too long for a RIFF file",
            )
        })
}

fn write_riff_header(w: &mut impl Write, data_size: u32) -> std::io::Result<()> {
    w.write_all(b"RIFF")?;
    w.write_all(&(36 + data_size).to_le_bytes())?;
    w.write_all(b"WAVE")
}

fn write_fmt_chunk(w: &mut impl Write, format: &AudioFormat, block_align: u16) -> std::io::Result<()> {
    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?;
    w.write_all(&1u16.to_le_bytes())?;
    w.write_all(&format.channels.to_le_bytes())?;
    w.write_all(&format.sample_rate.to_le_bytes())?;
    let byte_rate = format.sample_rate * block_align as u32;
    w.write_all(&byte_rate.to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&format.bits_per_sample.to_le_bytes())
}

fn write_data_chunk(w: &mut impl Write, samples: &[u8], data_size: u32) -> std::io::Result<()> {
    w.write_all(b"data")?;
    w.write_all(&data_size.to_le_bytes())?;
    w.write_all(samples)
}
