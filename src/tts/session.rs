//! Callback plumbing for one synthesis request.
//!
//! A request has three ways to end: a transport error, the server's success
//! event, or an explicit failure event. Whichever path gets there first fires
//! the completion callback and releases the connection; later attempts are
//! no-ops. Closing the request from outside suppresses every callback.

use crate::error::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Receives each PCM chunk in arrival order.
pub type AudioCallback = Box<dyn FnMut(Vec<u8>) + Send>;

/// Receives the terminal result of a request, at most once.
pub type CompletionCallback = Box<dyn FnOnce(Result<()>) + Send>;

struct Gate {
    closed: bool,
    completion: Option<CompletionCallback>,
}

fn lock(gate: &Mutex<Gate>) -> MutexGuard<'_, Gate> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Caller-side handle to an in-flight request.
#[derive(Clone)]
pub struct SynthesisHandle {
    gate: Arc<Mutex<Gate>>,
    cancel: CancellationToken,
}

impl SynthesisHandle {
    /// Close the request. Idempotent; no callback fires after this returns.
    pub fn close(&self) {
        let mut gate = lock(&self.gate);
        gate.closed = true;
        gate.completion = None;
        drop(gate);
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.gate).closed
    }
}

impl std::fmt::Debug for SynthesisHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Session-side half: owned by whatever drives the transport.
///
/// Callbacks run while the gate is held, so they must not call back into
/// the request's [`SynthesisHandle`].
pub struct StreamCallbacks {
    on_audio: AudioCallback,
    gate: Arc<Mutex<Gate>>,
    cancel: CancellationToken,
}

impl StreamCallbacks {
    pub fn new(
        on_audio: AudioCallback,
        on_complete: CompletionCallback,
    ) -> (Self, SynthesisHandle) {
        let gate = Arc::new(Mutex::new(Gate {
            closed: false,
            completion: Some(on_complete),
        }));
        let cancel = CancellationToken::new();
        let handle = SynthesisHandle {
            gate: Arc::clone(&gate),
            cancel: cancel.clone(),
        };
        (
            Self {
                on_audio,
                gate,
                cancel,
            },
            handle,
        )
    }

    /// Token cancelled when the request is closed or finished.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Forward a chunk unless the request is closed. Returns whether it was delivered.
    pub fn audio(&mut self, chunk: Vec<u8>) -> bool {
        let gate = lock(&self.gate);
        if gate.closed || chunk.is_empty() {
            return false;
        }
        (self.on_audio)(chunk);
        true
    }

    /// Deliver the terminal result if nothing has yet. Returns whether this
    /// call fired the callback. Always releases the connection.
    pub fn finish(&self, result: Result<()>) -> bool {
        let mut gate = lock(&self.gate);
        let fired = match gate.completion.take() {
            Some(callback) if !gate.closed => {
                callback(result);
                true
            }
            _ => false,
        };
        gate.closed = true;
        drop(gate);
        self.cancel.cancel();
        fired
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.gate).closed
    }
}
