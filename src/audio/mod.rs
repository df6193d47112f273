//! Audio output: narration render sink, ambient loop, device helpers.

pub mod ambient;
pub mod device;
pub mod render;

pub use ambient::{AmbientPlayer, AmbientSoundController, SilentAmbient};
pub use render::{DrainCallback, PlaybackTracker, RenderSink, SilentRenderSink};
