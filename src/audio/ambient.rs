//! Looped ambient background sound.

use crate::error::Result;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Backend that loops one ambient asset.
pub trait AmbientPlayer: Send {
    /// Start the loop, or adjust the volume of a running one.
    fn play(&mut self, volume: f32) -> Result<()>;

    /// Halt and release playback resources.
    fn stop(&mut self);

    fn is_playing(&self) -> bool;
}

/// Keeps ambient sound at a fixed baseline between narration phases.
pub struct AmbientSoundController {
    player: Box<dyn AmbientPlayer>,
    baseline: f32,
}

impl AmbientSoundController {
    pub fn new(player: Box<dyn AmbientPlayer>, baseline: f32) -> Self {
        Self {
            player,
            baseline: baseline.clamp(0.0, 1.0),
        }
    }

    pub fn baseline(&self) -> f32 {
        self.baseline
    }

    /// (Re)start the loop at the baseline volume. Failures are logged only.
    pub fn resume_baseline(&mut self) {
        self.play(self.baseline);
    }

    pub fn play(&mut self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        match self.player.play(volume) {
            Ok(()) => debug!(volume, "ambient sound playing"),
            Err(e) => warn!(error = %e, "ambient sound unavailable"),
        }
    }

    pub fn stop(&mut self) {
        self.player.stop();
        debug!("ambient sound stopped");
    }

    pub fn is_playing(&self) -> bool {
        self.player.is_playing()
    }
}

/// Record of calls made to a [`SilentAmbient`].
#[derive(Debug, Clone, PartialEq)]
pub enum AmbientCall {
    Play(f32),
    Stop,
}

/// Ambient player without a device. Records every call it receives.
#[derive(Clone, Default)]
pub struct SilentAmbient {
    calls: Arc<Mutex<Vec<AmbientCall>>>,
    playing: bool,
}

impl SilentAmbient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared view of the call history; stays valid after the player is boxed.
    pub fn calls(&self) -> Arc<Mutex<Vec<AmbientCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: AmbientCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

impl AmbientPlayer for SilentAmbient {
    fn play(&mut self, volume: f32) -> Result<()> {
        self.playing = true;
        self.record(AmbientCall::Play(volume));
        Ok(())
    }

    fn stop(&mut self) {
        self.playing = false;
        self.record(AmbientCall::Stop);
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

/// Soft brown noise used when no ambient asset is configured.
pub fn generate_noise(samples: usize, seed: u32) -> Vec<i16> {
    let mut state = seed.max(1);
    let mut level = 0.0f32;
    (0..samples)
        .map(|_| {
            // xorshift32
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let white = (state as f32 / u32::MAX as f32) * 2.0 - 1.0;
            level = (level + white * 0.02).clamp(-1.0, 1.0) * 0.998;
            (level * 0.5 * i16::MAX as f32) as i16
        })
        .collect()
}

#[cfg(feature = "cpal-audio")]
pub use cpal_ambient::CpalAmbientPlayer;

#[cfg(feature = "cpal-audio")]
mod cpal_ambient {
    use super::{AmbientPlayer, generate_noise};
    use crate::audio::device::{SendableStream, output_device, read_wav_mono, sample_to_f32};
    use crate::error::{Result, SlowwaveError};
    use cpal::traits::{DeviceTrait, StreamTrait};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing::{info, warn};

    /// Loops a WAV asset (or generated noise) on the output device.
    pub struct CpalAmbientPlayer {
        device_name: Option<String>,
        asset: Option<PathBuf>,
        volume: Arc<AtomicU32>,
        stream: Option<SendableStream>,
    }

    impl CpalAmbientPlayer {
        pub fn new(device_name: Option<String>, asset: Option<PathBuf>) -> Self {
            Self {
                device_name,
                asset,
                volume: Arc::new(AtomicU32::new(0f32.to_bits())),
                stream: None,
            }
        }

        fn load_loop(&self, rate: u32) -> Result<Vec<i16>> {
            let samples = match &self.asset {
                Some(path) => {
                    let file = std::fs::File::open(path)?;
                    read_wav_mono(std::io::BufReader::new(file), rate)?
                }
                None => generate_noise(rate as usize * 8, 0x5eed),
            };
            if samples.is_empty() {
                return Err(SlowwaveError::AudioDevice {
                    message: "Ambient asset contains no samples".to_string(),
                });
            }
            Ok(samples)
        }

        fn build_stream(&self) -> Result<cpal::Stream> {
            let device = output_device(self.device_name.as_deref())?;
            let config = device
                .default_output_config()
                .map_err(|e| SlowwaveError::AudioDevice {
                    message: format!("Failed to query default output config: {}", e),
                })?;
            let channels = config.channels().max(1) as usize;
            let samples = self.load_loop(config.sample_rate())?;
            info!(
                asset = ?self.asset,
                seconds = samples.len() as f32 / config.sample_rate() as f32,
                "ambient loop loaded"
            );

            let volume = Arc::clone(&self.volume);
            let mut position = 0usize;
            let mut next = move || {
                let gain = f32::from_bits(volume.load(Ordering::Relaxed));
                let sample = sample_to_f32(samples[position]) * gain;
                position = (position + 1) % samples.len();
                sample
            };
            let error = |err: cpal::StreamError| warn!(error = %err, "ambient stream error");

            match config.sample_format() {
                cpal::SampleFormat::F32 => device.build_output_stream(
                    &config.config(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_exact_mut(channels) {
                            frame.fill(next());
                        }
                    },
                    error,
                    None,
                ),
                cpal::SampleFormat::I16 => device.build_output_stream(
                    &config.config(),
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_exact_mut(channels) {
                            frame.fill(crate::audio::device::f32_to_sample(next()));
                        }
                    },
                    error,
                    None,
                ),
                fmt => {
                    return Err(SlowwaveError::AudioDevice {
                        message: format!("Unsupported ambient sample format: {:?}", fmt),
                    });
                }
            }
            .map_err(|e| SlowwaveError::AudioDevice {
                message: format!("Failed to build ambient stream: {}", e),
            })
        }
    }

    impl AmbientPlayer for CpalAmbientPlayer {
        fn play(&mut self, volume: f32) -> Result<()> {
            self.volume.store(volume.to_bits(), Ordering::Relaxed);
            if self.stream.is_some() {
                return Ok(());
            }
            let stream = self.build_stream()?;
            stream.play().map_err(|e| SlowwaveError::AudioDevice {
                message: format!("Failed to start ambient stream: {}", e),
            })?;
            self.stream = Some(SendableStream(stream));
            Ok(())
        }

        fn stop(&mut self) {
            if let Some(stream) = self.stream.take()
                && let Err(e) = stream.0.pause()
            {
                warn!(error = %e, "failed to pause ambient stream");
            }
        }

        fn is_playing(&self) -> bool {
            self.stream.is_some()
        }
    }
}
