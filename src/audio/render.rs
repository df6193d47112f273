//! Streaming PCM render sink with drain notification.
//!
//! Buffers are queued in a [`PlaybackTracker`] shared with the device
//! callback. An empty buffer is a drain sentinel: its callback fires once
//! every buffer queued before it has been rendered, or immediately when
//! nothing is outstanding.

use crate::audio::device::pcm_to_samples;
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Fired once when the last outstanding buffer finishes rendering.
pub type DrainCallback = Box<dyn FnOnce() + Send>;

/// Output side of narration playback.
pub trait RenderSink: Send {
    /// Start the output engine. Idempotent.
    fn start(&mut self) -> Result<()>;

    /// Halt immediately, discard queued audio, drop any pending drain callback.
    fn stop(&mut self);

    /// Queue PCM bytes, or register `on_drain` when `bytes` is empty.
    fn schedule_audio(&mut self, bytes: Vec<u8>, on_drain: Option<DrainCallback>);

    /// Buffers queued and not yet fully rendered.
    fn outstanding(&self) -> usize;
}

struct QueuedBuffer {
    samples: Vec<i16>,
    offset: usize,
}

#[derive(Default)]
struct TrackerState {
    running: bool,
    buffers: VecDeque<QueuedBuffer>,
    drain: Option<DrainCallback>,
    rendered_samples: u64,
}

/// Queue of scheduled buffers shared between the scheduler and the renderer.
#[derive(Clone, Default)]
pub struct PlaybackTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl PlaybackTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn start(&self) {
        self.lock().running = true;
    }

    /// Stop and reset so a later `start` begins clean.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.running = false;
        state.buffers.clear();
        state.drain = None;
        state.rendered_samples = 0;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn outstanding(&self) -> usize {
        self.lock().buffers.len()
    }

    /// Samples rendered since the last `start`.
    pub fn rendered_samples(&self) -> u64 {
        self.lock().rendered_samples
    }

    /// Queue bytes or register a drain callback. Ignored while stopped.
    pub fn enqueue(&self, bytes: Vec<u8>, on_drain: Option<DrainCallback>) {
        let fire = {
            let mut state = self.lock();
            if !state.running {
                return;
            }
            if bytes.is_empty() {
                match on_drain {
                    Some(callback) if state.buffers.is_empty() => Some(callback),
                    Some(callback) => {
                        state.drain = Some(callback);
                        None
                    }
                    None => None,
                }
            } else {
                let samples = pcm_to_samples(&bytes);
                if !samples.is_empty() {
                    state.buffers.push_back(QueuedBuffer { samples, offset: 0 });
                }
                None
            }
        };
        if let Some(callback) = fire {
            callback();
        }
    }

    /// Fill `out` from the queue, padding with silence. Returns the number
    /// of queued samples consumed.
    pub fn render(&self, out: &mut [i16]) -> usize {
        let (written, fire) = {
            let mut state = self.lock();
            let mut written = 0;
            while written < out.len() {
                let Some(front) = state.buffers.front_mut() else {
                    break;
                };
                let available = front.samples.len() - front.offset;
                let take = available.min(out.len() - written);
                out[written..written + take]
                    .copy_from_slice(&front.samples[front.offset..front.offset + take]);
                front.offset += take;
                written += take;
                if front.offset == front.samples.len() {
                    state.buffers.pop_front();
                }
            }
            out[written..].fill(0);
            state.rendered_samples += written as u64;

            let fire = if state.buffers.is_empty() {
                state.drain.take()
            } else {
                None
            };
            (written, fire)
        };
        if let Some(callback) = fire {
            callback();
        }
        written
    }

    /// Render everything currently queued.
    pub fn render_all(&self) -> usize {
        let pending: usize = {
            let state = self.lock();
            state
                .buffers
                .iter()
                .map(|b| b.samples.len() - b.offset)
                .sum()
        };
        let mut scratch = vec![0i16; pending];
        self.render(&mut scratch)
    }
}

/// Sink without an output device.
///
/// Instant pacing treats every buffer as played the moment it is queued.
/// Manual pacing leaves rendering to whoever holds [`SilentRenderSink::tracker`].
pub struct SilentRenderSink {
    tracker: PlaybackTracker,
    instant: bool,
}

impl SilentRenderSink {
    pub fn new() -> Self {
        Self {
            tracker: PlaybackTracker::new(),
            instant: true,
        }
    }

    pub fn manual() -> Self {
        Self {
            tracker: PlaybackTracker::new(),
            instant: false,
        }
    }

    pub fn tracker(&self) -> PlaybackTracker {
        self.tracker.clone()
    }
}

impl Default for SilentRenderSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSink for SilentRenderSink {
    fn start(&mut self) -> Result<()> {
        self.tracker.start();
        Ok(())
    }

    fn stop(&mut self) {
        self.tracker.stop();
    }

    fn schedule_audio(&mut self, bytes: Vec<u8>, on_drain: Option<DrainCallback>) {
        let sentinel = bytes.is_empty();
        self.tracker.enqueue(bytes, on_drain);
        if self.instant && !sentinel {
            self.tracker.render_all();
        }
    }

    fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }
}

#[cfg(feature = "cpal-audio")]
pub use cpal_sink::CpalRenderSink;

#[cfg(feature = "cpal-audio")]
mod cpal_sink {
    use super::{DrainCallback, PlaybackTracker, RenderSink};
    use crate::audio::device::{SendableStream, output_device, resample, sample_to_f32};
    use crate::error::{Result, SlowwaveError};
    use cpal::traits::{DeviceTrait, StreamTrait};
    use tracing::{info, warn};

    /// Render sink backed by a cpal output stream.
    ///
    /// Tries i16 mono at the synthesis rate, then f32 mono, then the device's
    /// native config with channel duplication and resampling in software.
    pub struct CpalRenderSink {
        device_name: Option<String>,
        sample_rate: u32,
        tracker: PlaybackTracker,
        stream: Option<SendableStream>,
    }

    impl CpalRenderSink {
        pub fn new(device_name: Option<String>, sample_rate: u32) -> Self {
            Self {
                device_name,
                sample_rate,
                tracker: PlaybackTracker::new(),
                stream: None,
            }
        }

        fn build_stream(&self, device: &cpal::Device) -> Result<cpal::Stream> {
            let preferred = cpal::StreamConfig {
                channels: crate::defaults::CHANNELS,
                sample_rate: self.sample_rate,
                buffer_size: cpal::BufferSize::Default,
            };

            let tracker = self.tracker.clone();
            if let Ok(stream) = device.build_output_stream(
                &preferred,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    tracker.render(data);
                },
                stream_error,
                None,
            ) {
                return Ok(stream);
            }

            let tracker = self.tracker.clone();
            let mut scratch = Vec::new();
            if let Ok(stream) = device.build_output_stream(
                &preferred,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0i16);
                    tracker.render(&mut scratch);
                    for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = sample_to_f32(sample);
                    }
                },
                stream_error,
                None,
            ) {
                return Ok(stream);
            }

            self.build_stream_native(device)
        }

        fn build_stream_native(&self, device: &cpal::Device) -> Result<cpal::Stream> {
            use cpal::SampleFormat;

            let default_config =
                device
                    .default_output_config()
                    .map_err(|e| SlowwaveError::AudioDevice {
                        message: format!("Failed to query default output config: {}", e),
                    })?;
            let native_rate = default_config.sample_rate();
            let channels = default_config.channels().max(1) as usize;
            let source_rate = self.sample_rate;
            let stream_config: cpal::StreamConfig = default_config.config();

            info!(
                channels,
                rate = native_rate,
                format = ?default_config.sample_format(),
                "using native output format, converting in software"
            );

            let mut converter = NativeConverter::new(
                self.tracker.clone(),
                channels,
                source_rate,
                native_rate,
            );

            match default_config.sample_format() {
                SampleFormat::I16 => device
                    .build_output_stream(
                        &stream_config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            converter.fill(data, |s| s);
                        },
                        stream_error,
                        None,
                    )
                    .map_err(|e| SlowwaveError::AudioDevice {
                        message: format!("Failed to build native i16 stream: {}", e),
                    }),
                SampleFormat::F32 => device
                    .build_output_stream(
                        &stream_config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            converter.fill(data, sample_to_f32);
                        },
                        stream_error,
                        None,
                    )
                    .map_err(|e| SlowwaveError::AudioDevice {
                        message: format!("Failed to build native f32 stream: {}", e),
                    }),
                fmt => Err(SlowwaveError::AudioDevice {
                    message: format!(
                        "Unsupported native sample format: {:?}. \
                         Try specifying a device with --device.",
                        fmt
                    ),
                }),
            }
        }
    }

    fn stream_error(err: cpal::StreamError) {
        warn!(error = %err, "audio output stream error");
    }

    /// Pulls mono synthesis-rate samples and writes interleaved native frames.
    struct NativeConverter {
        tracker: PlaybackTracker,
        channels: usize,
        source_rate: u32,
        native_rate: u32,
        scratch: Vec<i16>,
    }

    impl NativeConverter {
        fn new(
            tracker: PlaybackTracker,
            channels: usize,
            source_rate: u32,
            native_rate: u32,
        ) -> Self {
            Self {
                tracker,
                channels,
                source_rate,
                native_rate,
                scratch: Vec::new(),
            }
        }

        fn fill<T: Copy>(&mut self, data: &mut [T], convert: impl Fn(i16) -> T) {
            let frames = data.len() / self.channels;
            let needed = (frames as u64 * self.source_rate as u64)
                .div_ceil(self.native_rate.max(1) as u64) as usize;
            self.scratch.resize(needed, 0);
            self.tracker.render(&mut self.scratch);
            let resampled = resample(&self.scratch, self.source_rate, self.native_rate);

            for (i, frame) in data.chunks_exact_mut(self.channels).enumerate() {
                let sample = convert(resampled.get(i).copied().unwrap_or(0));
                frame.fill(sample);
            }
        }
    }

    impl RenderSink for CpalRenderSink {
        fn start(&mut self) -> Result<()> {
            if self.stream.is_some() {
                return Ok(());
            }

            let device = output_device(self.device_name.as_deref())?;
            self.tracker.start();
            let stream = match self.build_stream(&device) {
                Ok(stream) => stream,
                Err(e) => {
                    self.tracker.stop();
                    return Err(e);
                }
            };
            if let Err(e) = stream.play() {
                self.tracker.stop();
                return Err(SlowwaveError::AudioDevice {
                    message: format!("Failed to start audio output: {}", e),
                });
            }
            self.stream = Some(SendableStream(stream));
            Ok(())
        }

        fn stop(&mut self) {
            self.tracker.stop();
            if let Some(stream) = self.stream.take()
                && let Err(e) = stream.0.pause()
            {
                warn!(error = %e, "failed to pause audio output");
            }
        }

        fn schedule_audio(&mut self, bytes: Vec<u8>, on_drain: Option<DrainCallback>) {
            self.tracker.enqueue(bytes, on_drain);
        }

        fn outstanding(&self) -> usize {
            self.tracker.outstanding()
        }
    }
}
