//! Streaming synthesis client.
//!
//! Each request opens its own websocket connection, walks the handshake in
//! [`SessionProtocol`], and streams PCM chunks back through the request's
//! callbacks. The transport runs on a spawned tokio task; the caller only
//! holds a [`SynthesisHandle`].

use crate::config::TtsConfig;
use crate::error::{Result, SlowwaveError};
use crate::tts::frame::{Frame, ServerMessage};
use crate::tts::payload::VoiceParams;
use crate::tts::protocol::{ProtocolAction, SessionProtocol};
use crate::tts::session::{AudioCallback, CompletionCallback, StreamCallbacks, SynthesisHandle};
use futures_util::{Sink, SinkExt, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, warn};

/// Capability interface for turning one segment of text into PCM audio.
///
/// `synthesize` returns immediately. Audio chunks arrive in order through
/// `on_audio`; `on_complete` fires at most once. Neither fires after the
/// returned handle is closed.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(
        &self,
        text: String,
        on_audio: AudioCallback,
        on_complete: CompletionCallback,
    ) -> SynthesisHandle;
}

/// Websocket client for the bidirectional synthesis service.
#[derive(Debug, Clone)]
pub struct StreamingSynthesisClient {
    config: Arc<TtsConfig>,
    voice: VoiceParams,
}

impl StreamingSynthesisClient {
    pub fn new(config: TtsConfig) -> Self {
        let voice = VoiceParams::from_config(&config);
        Self {
            config: Arc::new(config),
            voice,
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        self.config.stage_timeout()
    }
}

impl SpeechSynthesizer for StreamingSynthesisClient {
    fn synthesize(
        &self,
        text: String,
        on_audio: AudioCallback,
        on_complete: CompletionCallback,
    ) -> SynthesisHandle {
        let (callbacks, handle) = StreamCallbacks::new(on_audio, on_complete);

        if let Err(e) = self.config.validate() {
            warn!(error = %e, "synthesis skipped");
            callbacks.finish(Err(e));
            return handle;
        }
        if text.trim().is_empty() {
            callbacks.finish(Ok(()));
            return handle;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                callbacks.finish(Err(SlowwaveError::Other(format!(
                    "Synthesis requires a tokio runtime: {e}"
                ))));
                return handle;
            }
        };

        let config = Arc::clone(&self.config);
        let protocol = SessionProtocol::new(text, self.voice.clone());
        runtime.spawn(run_session(config, protocol, callbacks));
        handle
    }
}

async fn run_session(
    config: Arc<TtsConfig>,
    protocol: SessionProtocol,
    mut callbacks: StreamCallbacks,
) {
    let cancel = callbacks.cancellation();
    let result = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("synthesis request closed");
            return;
        }
        result = drive(&config, protocol, &mut callbacks) => result,
    };

    if let Err(e) = &result {
        warn!(error = %e, "synthesis session failed");
    }
    callbacks.finish(result);
}

async fn drive(
    config: &TtsConfig,
    mut protocol: SessionProtocol,
    callbacks: &mut StreamCallbacks,
) -> Result<()> {
    let timeout = config.stage_timeout();
    let request = connection_request(config)?;

    let (ws, _) = time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| SlowwaveError::Timeout {
            stage: "connection".to_string(),
        })?
        .map_err(|e| SlowwaveError::connection(e.to_string()))?;
    debug!(endpoint = %config.endpoint, "synthesis connection open");

    let (mut write, mut read) = ws.split();
    send_frame(&mut write, &protocol.open()).await?;

    loop {
        let stage = protocol.stage();
        let message = match time::timeout(timeout, read.next()).await {
            Err(_) => {
                return Err(SlowwaveError::Timeout {
                    stage: stage.awaiting().to_string(),
                });
            }
            Ok(None) => {
                return Err(SlowwaveError::connection(
                    "connection closed before the session finished",
                ));
            }
            Ok(Some(Err(e))) => return Err(SlowwaveError::connection(e.to_string())),
            Ok(Some(Ok(message))) => message,
        };

        let server_message = match message {
            Message::Binary(data) => match ServerMessage::classify(&data) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    debug!(error = %e, bytes = data.len(), "dropping malformed frame");
                    continue;
                }
            },
            Message::Text(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                return Err(SlowwaveError::server(text));
            }
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "no reason given".to_string());
                return Err(SlowwaveError::connection(format!(
                    "server closed the connection: {reason}"
                )));
            }
            _ => continue,
        };

        for action in protocol.handle(server_message) {
            match action {
                ProtocolAction::Send(frame) => {
                    if let Err(e) = send_frame(&mut write, &frame).await {
                        if !protocol.is_finished() {
                            return Err(e);
                        }
                        debug!(error = %e, "finish-connection frame not delivered");
                    }
                }
                ProtocolAction::Audio(chunk) => {
                    callbacks.audio(chunk);
                }
                ProtocolAction::Complete(result) => {
                    if result.is_ok() {
                        info!(
                            chunks = protocol.audio_chunks(),
                            session_id = protocol.session_id().unwrap_or(""),
                            "synthesis session finished"
                        );
                    }
                    if let Err(e) = write.close().await {
                        debug!(error = %e, "closing synthesis connection");
                    }
                    return result;
                }
            }
        }
    }
}

async fn send_frame<S>(write: &mut S, frame: &Frame) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    write
        .send(Message::Binary(frame.encode()))
        .await
        .map_err(|e| SlowwaveError::connection(e.to_string()))
}

/// Websocket upgrade request carrying the service credentials.
fn connection_request(config: &TtsConfig) -> Result<Request> {
    let mut request = config
        .endpoint
        .as_str()
        .into_client_request()
        .map_err(|e| SlowwaveError::ConfigInvalidValue {
            key: "tts.endpoint".to_string(),
            message: e.to_string(),
        })?;

    let connect_id = uuid::Uuid::new_v4().to_string();
    let headers = request.headers_mut();
    headers.insert("x-api-app-key", header_value("tts.app_id", &config.app_id)?);
    headers.insert(
        "x-api-access-key",
        header_value("tts.access_token", &config.access_token)?,
    );
    headers.insert(
        "x-api-resource-id",
        header_value("tts.resource_id", &config.resource_id)?,
    );
    headers.insert("x-api-connect-id", header_value("connect id", &connect_id)?);
    Ok(request)
}

fn header_value(key: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value.trim()).map_err(|e| SlowwaveError::ConfigInvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Scripted synthesizer for tests.
///
/// Immediate mode emits the configured chunks and completes inside
/// `synthesize`. Deferred mode parks each request until
/// [`MockSynthesizer::complete_next`] is called.
#[derive(Clone, Default)]
pub struct MockSynthesizer {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    requests: Vec<String>,
    chunks: Vec<Vec<u8>>,
    failing: HashSet<usize>,
    deferred: bool,
    pending: VecDeque<StreamCallbacks>,
    handles: Vec<SynthesisHandle>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks delivered for every request.
    pub fn with_chunks(self, chunks: Vec<Vec<u8>>) -> Self {
        self.lock().chunks = chunks;
        self
    }

    /// Make the request with this zero-based index fail.
    pub fn with_failure_at(self, index: usize) -> Self {
        self.lock().failing.insert(index);
        self
    }

    /// Hold requests until `complete_next` is called.
    pub fn deferred(self) -> Self {
        self.lock().deferred = true;
        self
    }

    /// Texts requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of issued requests whose handle has been closed.
    pub fn closed(&self) -> usize {
        self.lock().handles.iter().filter(|h| h.is_closed()).count()
    }

    /// Release the oldest parked request. Returns false when none is parked.
    pub fn complete_next(&self) -> bool {
        let (callbacks, chunks, fail) = {
            let mut state = self.lock();
            let index = state.requests.len() - state.pending.len();
            let Some(callbacks) = state.pending.pop_front() else {
                return false;
            };
            (callbacks, state.chunks.clone(), state.failing.contains(&index))
        };
        deliver(callbacks, chunks, fail);
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn deliver(mut callbacks: StreamCallbacks, chunks: Vec<Vec<u8>>, fail: bool) {
    for chunk in chunks {
        callbacks.audio(chunk);
    }
    if fail {
        callbacks.finish(Err(SlowwaveError::server("scripted failure")));
    } else {
        callbacks.finish(Ok(()));
    }
}

impl SpeechSynthesizer for MockSynthesizer {
    fn synthesize(
        &self,
        text: String,
        on_audio: AudioCallback,
        on_complete: CompletionCallback,
    ) -> SynthesisHandle {
        let (callbacks, handle) = StreamCallbacks::new(on_audio, on_complete);
        let (chunks, fail) = {
            let mut state = self.lock();
            let index = state.requests.len();
            state.requests.push(text);
            state.handles.push(handle.clone());
            if state.deferred {
                state.pending.push_back(callbacks);
                return handle;
            }
            (state.chunks.clone(), state.failing.contains(&index))
        };
        deliver(callbacks, chunks, fail);
        handle
    }
}
