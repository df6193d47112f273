//! Output device lookup and sample conversion shared by the render sink
//! and the ambient player.

use crate::defaults;
use crate::error::{Result, SlowwaveError};
use std::io::Read;

/// Decode little-endian 16-bit PCM. A trailing odd byte is dropped.
pub fn pcm_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(defaults::BYTES_PER_FRAME)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn sample_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

pub fn f32_to_sample(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Read a WAV stream as mono samples at `target_rate`.
pub fn read_wav_mono<R: Read>(reader: R, target_rate: u32) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| SlowwaveError::AudioDevice {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    let channels = spec.channels.max(1) as usize;

    let raw: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .map(|s| s.map(f32_to_sample))
            .collect::<std::result::Result<Vec<_>, _>>(),
    }
    .map_err(|e| SlowwaveError::AudioDevice {
        message: format!("Failed to read WAV samples: {}", e),
    })?;

    let mono: Vec<i16> = if channels == 1 {
        raw
    } else {
        raw.chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    Ok(resample(&mono, spec.sample_rate, target_rate))
}

#[cfg(feature = "cpal-audio")]
pub use cpal_device::*;

#[cfg(feature = "cpal-audio")]
mod cpal_device {
    use crate::error::{Result, SlowwaveError};
    use cpal::traits::{DeviceTrait, HostTrait};

    /// Run a closure with stderr temporarily redirected to /dev/null.
    ///
    /// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
    /// when probing audio backends.
    ///
    /// # Safety
    /// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
    /// Safe as long as no other thread is concurrently manipulating fd 2.
    pub fn with_suppressed_stderr<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        unsafe {
            let saved_fd = libc::dup(2);
            let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
            if saved_fd >= 0 && devnull >= 0 {
                libc::dup2(devnull, 2);
                libc::close(devnull);
            }

            let result = f();

            if saved_fd >= 0 {
                libc::dup2(saved_fd, 2);
                libc::close(saved_fd);
            }

            result
        }
    }

    /// Wrapper for cpal::Stream to make it Send.
    ///
    /// SAFETY: the stream is only touched behind the owning sink's `&mut self`,
    /// never from two threads at once.
    pub struct SendableStream(pub cpal::Stream);

    unsafe impl Send for SendableStream {}

    fn device_name(device: &cpal::Device) -> Option<String> {
        device.description().ok().map(|d| d.name().to_string())
    }

    /// Names of all output devices.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let devices = with_suppressed_stderr(|| cpal::default_host().output_devices());
        let devices = devices.map_err(|e| SlowwaveError::AudioDevice {
            message: format!("Failed to enumerate output devices: {}", e),
        })?;
        Ok(devices.filter_map(|d| device_name(&d)).collect())
    }

    /// Find an output device by name, or the system default.
    pub fn output_device(name: Option<&str>) -> Result<cpal::Device> {
        with_suppressed_stderr(|| {
            let host = cpal::default_host();
            match name {
                Some(name) => host
                    .output_devices()
                    .map_err(|e| SlowwaveError::AudioDevice {
                        message: format!("Failed to enumerate output devices: {}", e),
                    })?
                    .find(|d| device_name(d).as_deref() == Some(name))
                    .ok_or_else(|| SlowwaveError::AudioDevice {
                        message: format!("Output device not found: {}", name),
                    }),
                None => host
                    .default_output_device()
                    .ok_or_else(|| SlowwaveError::AudioDevice {
                        message: "No default output device".to_string(),
                    }),
            }
        })
    }
}
