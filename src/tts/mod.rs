//! Streaming speech synthesis over the bidirectional websocket protocol.

pub mod client;
pub mod frame;
pub mod payload;
pub mod protocol;
pub mod session;

pub use client::{MockSynthesizer, SpeechSynthesizer, StreamingSynthesisClient};
pub use frame::{Frame, FrameError, MessageType, ServerMessage};
pub use payload::VoiceParams;
pub use session::{AudioCallback, CompletionCallback, StreamCallbacks, SynthesisHandle};
