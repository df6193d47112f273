//! Transport-free driver for one synthesis request.
//!
//! `SessionProtocol` consumes classified server messages and tells the
//! transport what to do next. Keeping it free of I/O lets the handshake
//! ordering be tested without a socket.

use crate::error::{Result, SlowwaveError};
use crate::tts::frame::{Frame, ServerMessage, event};
use crate::tts::payload::{self, VoiceParams};
use tracing::debug;

/// Where the handshake currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// `StartConnection` sent, waiting for event 50.
    AwaitingConnection,
    /// `StartSession` sent, waiting for event 150.
    AwaitingSession,
    /// Text sent and session finish requested, receiving audio until 152.
    Streaming,
    /// Terminal; nothing else is acted upon.
    Finished,
}

impl Stage {
    /// What the client is waiting for in this stage.
    pub fn awaiting(self) -> &'static str {
        match self {
            Stage::AwaitingConnection => "connection ready",
            Stage::AwaitingSession => "session ready",
            Stage::Streaming => "synthesized audio",
            Stage::Finished => "nothing",
        }
    }
}

/// Instruction for the transport.
#[derive(Debug)]
pub enum ProtocolAction {
    Send(Frame),
    Audio(Vec<u8>),
    Complete(Result<()>),
}

/// Handshake state for one request.
#[derive(Debug)]
pub struct SessionProtocol {
    stage: Stage,
    session_id: Option<String>,
    text: String,
    voice: VoiceParams,
    audio_chunks: usize,
}

impl SessionProtocol {
    pub fn new(text: impl Into<String>, voice: VoiceParams) -> Self {
        Self {
            stage: Stage::AwaitingConnection,
            session_id: None,
            text: text.into(),
            voice,
            audio_chunks: 0,
        }
    }

    /// First frame on a fresh connection.
    pub fn open(&self) -> Frame {
        Frame::start_connection()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn audio_chunks(&self) -> usize {
        self.audio_chunks
    }

    /// Advance on one server message.
    pub fn handle(&mut self, message: ServerMessage) -> Vec<ProtocolAction> {
        if self.is_finished() {
            return Vec::new();
        }

        match message {
            ServerMessage::Audio(chunk) => {
                if chunk.is_empty() {
                    return Vec::new();
                }
                self.audio_chunks += 1;
                debug!(bytes = chunk.len(), "synthesis audio chunk");
                vec![ProtocolAction::Audio(chunk)]
            }
            ServerMessage::Event { code, payload } => {
                if payload.is_empty() {
                    debug!(event = code, "synthesis event");
                } else {
                    debug!(event = code, %payload, "synthesis event");
                }
                self.handle_event(code, payload)
            }
            ServerMessage::Error { code, message } => {
                self.fail(format!("code={code} {message}"))
            }
        }
    }

    fn handle_event(&mut self, code: i32, payload: String) -> Vec<ProtocolAction> {
        match code {
            event::CONNECTION_STARTED if self.stage == Stage::AwaitingConnection => {
                let session_id = self
                    .session_id
                    .get_or_insert_with(new_session_id)
                    .clone();
                match payload::start_session(&self.voice) {
                    Ok(body) => {
                        self.stage = Stage::AwaitingSession;
                        vec![ProtocolAction::Send(Frame::start_session(&session_id, body))]
                    }
                    Err(e) => self.terminate(Err(SlowwaveError::Other(format!(
                        "Failed to encode StartSession: {e}"
                    )))),
                }
            }
            event::CONNECTION_FAILED => self.fail(or_default(payload, "connection failed")),
            event::SESSION_STARTED if self.stage == Stage::AwaitingSession => {
                let Some(session_id) = self.session_id.clone() else {
                    return self.fail("session started before a session id was assigned".into());
                };
                match payload::task_request(&self.text) {
                    Ok(body) => {
                        self.stage = Stage::Streaming;
                        vec![
                            ProtocolAction::Send(Frame::task_request(&session_id, body)),
                            ProtocolAction::Send(Frame::finish_session(&session_id)),
                        ]
                    }
                    Err(e) => self.terminate(Err(SlowwaveError::Other(format!(
                        "Failed to encode TaskRequest: {e}"
                    )))),
                }
            }
            event::SESSION_FINISHED => {
                let mut actions = vec![ProtocolAction::Send(Frame::finish_connection())];
                actions.extend(self.terminate(Ok(())));
                actions
            }
            event::SESSION_FAILED => self.fail(or_default(payload, "session failed")),
            _ => Vec::new(),
        }
    }

    fn fail(&mut self, message: String) -> Vec<ProtocolAction> {
        self.terminate(Err(SlowwaveError::Server { message }))
    }

    fn terminate(&mut self, result: Result<()>) -> Vec<ProtocolAction> {
        self.stage = Stage::Finished;
        vec![ProtocolAction::Complete(result)]
    }
}

fn or_default(payload: String, fallback: &str) -> String {
    if payload.is_empty() {
        fallback.to_string()
    } else {
        payload
    }
}

/// Fixed-length (32 hex chars) session identifier.
fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
