//! Default configuration constants for slowwave.
//!
//! Shared by the config layer, the synthesis client and the audio sinks so
//! every component agrees on the wire and playback formats.

/// Sample rate of synthesized narration audio in Hz.
///
/// The synthesis service is asked for 24kHz PCM and the render sink opens
/// its output stream at the same rate.
pub const SAMPLE_RATE: u32 = 24000;

/// Narration audio is mono.
pub const CHANNELS: u16 = 1;

/// Bytes per rendered frame (mono, 16-bit little-endian).
pub const BYTES_PER_FRAME: usize = CHANNELS as usize * std::mem::size_of::<i16>();

/// Maximum number of characters (code points) in one narration segment.
pub const MAX_SEGMENT_CHARS: usize = 300;

/// Baseline ambient volume restored on every session transition.
pub const AMBIENT_VOLUME: f32 = 0.35;

/// Delay before ambient sound is resumed after the listening engine starts.
pub const AMBIENT_RESTART_DELAY_MS: u64 = 400;

/// Upper bound on each wait in the synthesis session handshake.
pub const STAGE_TIMEOUT_SECS: u64 = 15;

/// Default streaming synthesis endpoint.
pub const TTS_STREAM_ENDPOINT: &str = "wss://openspeech.bytedance.com/api/v3/tts/bidirection";

/// Default synthesis resource identifier.
pub const TTS_RESOURCE_ID: &str = "seed-tts-2.0";

/// Story hint used when the listener has not said anything yet.
pub const FALLBACK_STORY_HINT: &str = "给我一段安静的夜间旅途描述。";
