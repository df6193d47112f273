//! slowwave - Sleep-aid narration companion
//!
//! Streams a generated story through a websocket speech synthesizer, one
//! segment at a time, over looped ambient sound.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod activity;
pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod narration;
pub mod output;
pub mod session;
pub mod story;
pub mod tts;

// Composition root - needs everything
pub mod app;

// Core traits (source → session → sink)
pub use activity::{ActivityEvent, ActivityEventSource};
pub use audio::{AmbientPlayer, RenderSink};
pub use session::RouteController;
pub use story::StoryTextProvider;
pub use tts::SpeechSynthesizer;

// Session
pub use session::{SessionHandle, SessionOptions, SessionParts, SessionStatus, spawn_session};
pub use session::{SleepEvent, SleepState};

// Narration
pub use narration::{NarrationPipeline, NarrationSummary, split_segments};

// Error handling
pub use error::{Result, SlowwaveError};

// Config
pub use config::{Config, SegmentFailurePolicy};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
