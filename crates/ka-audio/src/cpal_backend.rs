//! CPAL-based audio output backend.
//!
//! A cpal `Stream` cannot leave the thread that built it on every platform,
//! so each device gets a dedicated thread that owns the stream and takes
//! play/shutdown commands over a channel. Buffers reach the audio callback
//! through a two-slot ring buffer; when the callback has played one to the
//! end it hands it back through the [`CompletionHandle`].

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender};
use ka_core::{AudioFormat, FrameBuffer};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::{CompletionHandle, BUFFER_COUNT};
use crate::traits::{AudioError, EngineEvent, OutputBackend, OutputDevice};

/// Plays through the host's default output device.
#[derive(Clone, Debug, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

enum StreamCommand {
    Play,
    Shutdown,
}

struct CpalDevice {
    producer: HeapProd<FrameBuffer>,
    commands: Sender<StreamCommand>,
    replies: Receiver<Result<(), AudioError>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(
        &self,
        format: &AudioFormat,
        completions: CompletionHandle,
    ) -> Result<Box<dyn OutputDevice>, AudioError> {
        let rb = HeapRb::<FrameBuffer>::new(BUFFER_COUNT);
        let (producer, consumer) = rb.split();
        let (commands, command_rx) = crossbeam_channel::unbounded();
        let (reply_tx, replies) = crossbeam_channel::bounded(1);

        let format = *format;
        let thread = std::thread::Builder::new()
            .name("keepalive-output".into())
            .spawn(move || stream_thread(format, consumer, completions, command_rx, reply_tx))
            .map_err(|e| AudioError::DeviceInit(e.to_string()))?;

        let ready = replies
            .recv()
            .unwrap_or_else(|_| Err(AudioError::DeviceInit("output thread exited".into())));
        if let Err(err) = ready {
            if thread.join().is_err() {
                error!("output thread panicked during open");
            }
            return Err(err);
        }

        Ok(Box::new(CpalDevice {
            producer,
            commands,
            replies,
            thread: Some(thread),
        }))
    }
}

impl OutputDevice for CpalDevice {
    fn enqueue(&mut self, buffer: FrameBuffer) -> Result<(), AudioError> {
        self.producer
            .try_push(buffer)
            .map_err(|_| AudioError::QueueFull)
    }

    fn start(&mut self) -> Result<(), AudioError> {
        self.commands
            .send(StreamCommand::Play)
            .map_err(|_| AudioError::Playback("output thread exited".into()))?;
        self.replies
            .recv()
            .unwrap_or_else(|_| Err(AudioError::Playback("output thread exited".into())))
    }

    fn stop(self: Box<Self>) {
        // Teardown lives in Drop so a device dropped before `start` is
        // released the same way.
        drop(self);
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("output thread panicked");
            }
        }
    }
}

/// Owns the cpal stream for the lifetime of one device.
fn stream_thread(
    format: AudioFormat,
    consumer: HeapCons<FrameBuffer>,
    completions: CompletionHandle,
    commands: Receiver<StreamCommand>,
    replies: Sender<Result<(), AudioError>>,
) {
    let reader = BufferReader::new(consumer, completions, format.zero_level());
    let stream = match open_stream(&format, reader) {
        Ok(stream) => {
            let _ = replies.send(Ok(()));
            stream
        }
        Err(err) => {
            let _ = replies.send(Err(err));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Play => {
                let result = stream
                    .play()
                    .map_err(|e| AudioError::Playback(e.to_string()));
                let _ = replies.send(result);
            }
            StreamCommand::Shutdown => break,
        }
    }

    if let Err(e) = stream.pause() {
        debug!("pause before shutdown failed: {}", e);
    }
    // Dropping the stream joins the callback, which drops the reader and any
    // buffer it still holds.
    drop(stream);
}

fn open_stream(format: &AudioFormat, reader: BufferReader) -> Result<Stream, AudioError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (config, sample_format) = preferred_config(&device, format)?;
    info!(
        device = %name,
        rate = config.sample_rate.0,
        channels = config.channels,
        ?sample_format,
        "opening output stream"
    );

    match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, reader),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, reader),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, reader),
        SampleFormat::I32 => build_stream::<i32>(&device, &config, reader),
        SampleFormat::U8 => build_stream::<u8>(&device, &config, reader),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

/// Pick a device configuration that runs at the keepalive rate.
///
/// The 8-bit mono signal is converted per sample and copied to every device
/// channel, so any channel count works. Falls back to the device default
/// (playing slightly off-rate) when nothing supports 44.1 kHz.
fn preferred_config(
    device: &Device,
    format: &AudioFormat,
) -> Result<(StreamConfig, SampleFormat), AudioError> {
    let rate = format.sample_rate;
    let candidates: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::DeviceInit(format!("failed to query configs: {}", e)))?
        .filter(|c| c.min_sample_rate().0 <= rate && c.max_sample_rate().0 >= rate)
        .collect();

    let preferred = candidates
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32)
        .or_else(|| candidates.first());

    if let Some(range) = preferred {
        let supported = range.clone().with_sample_rate(cpal::SampleRate(rate));
        return Ok((supported.config(), supported.sample_format()));
    }

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceInit(format!("failed to get default config: {}", e)))?;
    warn!(
        rate = supported.sample_rate().0,
        "device has no {} Hz configuration, using default", rate
    );
    Ok((supported.config(), supported.sample_format()))
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut reader: BufferReader,
) -> Result<Stream, AudioError>
where
    T: SizedSample + FromSample<u8>,
{
    let channels = config.channels as usize;
    let errors = reader.completions.clone();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value = T::from_sample(reader.next_sample());
                    for sample in frame.iter_mut() {
                        *sample = value;
                    }
                }
            },
            move |err| errors.deliver(EngineEvent::DeviceError(err.to_string())),
            None,
        )
        .map_err(|e| AudioError::StreamCreate(e.to_string()))
}

/// Callback-side view of the device queue.
///
/// Walks the current buffer sample by sample; at the end hands it back to
/// the engine and moves to the next queued one. Emits the zero level while
/// the queue is empty.
struct BufferReader {
    consumer: HeapCons<FrameBuffer>,
    current: Option<FrameBuffer>,
    position: usize,
    completions: CompletionHandle,
    zero: u8,
}

impl BufferReader {
    fn new(consumer: HeapCons<FrameBuffer>, completions: CompletionHandle, zero: u8) -> Self {
        Self {
            consumer,
            current: None,
            position: 0,
            completions,
            zero,
        }
    }

    fn next_sample(&mut self) -> u8 {
        // Bounded so a queue of empty buffers cannot spin the callback.
        for _ in 0..=BUFFER_COUNT {
            if let Some(buffer) = &self.current {
                if let Some(&sample) = buffer.get(self.position) {
                    self.position += 1;
                    return sample;
                }
            }
            if let Some(finished) = self.current.take() {
                self.completions.buffer_done(finished);
            }
            match self.consumer.try_pop() {
                Some(next) => {
                    self.current = Some(next);
                    self.position = 0;
                }
                None => return self.zero,
            }
        }
        self.zero
    }
}
