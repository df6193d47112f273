//! JSON payloads for the synthesis session handshake.

use crate::config::TtsConfig;
use serde::Serialize;

/// Voice parameters sent with every `StartSession`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceParams {
    pub uid: String,
    pub speaker: String,
    pub sample_rate: u32,
    pub speech_rate: Option<i32>,
    pub loudness_rate: Option<i32>,
    pub emotion: Option<String>,
}

impl VoiceParams {
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            uid: config.uid.clone(),
            speaker: config.voice_type.clone(),
            sample_rate: config.sample_rate,
            speech_rate: config.speech_rate.and_then(rate_percent),
            loudness_rate: config.loudness_rate.and_then(rate_percent),
            emotion: config
                .emotion
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
        }
    }
}

/// Normalise a configured rate to the service's percent range.
///
/// Values within -50..=100 are rounded to an integer percent; anything
/// else is dropped so the service falls back to its default.
pub fn rate_percent(rate: f64) -> Option<i32> {
    if (-50.0..=100.0).contains(&rate) {
        Some(rate.round() as i32)
    } else {
        None
    }
}

#[derive(Serialize)]
struct StartSessionRequest<'a> {
    user: User<'a>,
    req_params: SessionParams<'a>,
}

#[derive(Serialize)]
struct User<'a> {
    uid: &'a str,
}

#[derive(Serialize)]
struct SessionParams<'a> {
    speaker: &'a str,
    audio_params: AudioParams<'a>,
    additions: &'a str,
}

#[derive(Serialize)]
struct AudioParams<'a> {
    format: &'static str,
    sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loudness_rate: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<&'a str>,
}

#[derive(Serialize)]
struct TaskRequest<'a> {
    req_params: TaskParams<'a>,
}

#[derive(Serialize)]
struct TaskParams<'a> {
    text: &'a str,
}

/// Serialize the `StartSession` payload.
pub fn start_session(params: &VoiceParams) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&StartSessionRequest {
        user: User { uid: &params.uid },
        req_params: SessionParams {
            speaker: &params.speaker,
            audio_params: AudioParams {
                format: "pcm",
                sample_rate: params.sample_rate,
                speech_rate: params.speech_rate,
                loudness_rate: params.loudness_rate,
                emotion: params.emotion.as_deref(),
            },
            additions: "",
        },
    })
}

/// Serialize the `TaskRequest` payload carrying one segment of text.
pub fn task_request(text: &str) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&TaskRequest {
        req_params: TaskParams { text },
    })
}
