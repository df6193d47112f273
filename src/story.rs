//! Story text providers.
//!
//! The session asks for one story each time it enters narration, passing
//! whatever the listener last said as a hint.

use crate::error::{Result, SlowwaveError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Produces narration text.
#[async_trait]
pub trait StoryTextProvider: Send + Sync {
    async fn generate(&self, hint: &str) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "你是助眠陪伴者。输出一段中文长篇、舒缓、无冲突、无悬念的叙述。\n\
约 8-12 分钟长度；语气低缓、平稳、温柔；不提问；不分析；不做建议。\n\
以环境描写和旅途感为主，允许少量重复，避免情绪波动。";

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub thinking: Thinking,
    pub messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
pub struct Thinking {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: Cow<'a, str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Chat-completion request for one story.
///
/// An empty hint falls back to `fallback`.
pub fn chat_request<'a>(model: &'a str, hint: &str, fallback: &'a str) -> ChatRequest<'a> {
    let hint = hint.trim();
    let user = if hint.is_empty() {
        Cow::Borrowed(fallback)
    } else {
        Cow::Owned(format!("偏好提示：{hint}"))
    };
    ChatRequest {
        model,
        thinking: Thinking { kind: "disabled" },
        messages: vec![
            ChatMessage {
                role: "system",
                content: Cow::Borrowed(SYSTEM_PROMPT),
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ],
    }
}

/// Extract the trimmed text of the first choice.
pub fn parse_story(body: &str) -> Result<String> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| SlowwaveError::StoryGeneration {
            message: format!("unexpected response: {e}"),
        })?;
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| SlowwaveError::StoryGeneration {
            message: "response has no message content".to_string(),
        })
}

/// Provider returning a fixed text, or a fixed failure.
#[derive(Debug, Clone)]
pub struct FixedStoryProvider {
    outcome: std::result::Result<String, String>,
}

impl FixedStoryProvider {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            outcome: Ok(text.into()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
        }
    }
}

#[async_trait]
impl StoryTextProvider for FixedStoryProvider {
    async fn generate(&self, _hint: &str) -> Result<String> {
        self.outcome
            .clone()
            .map_err(|message| SlowwaveError::StoryGeneration { message })
    }
}

#[cfg(feature = "story-http")]
pub use ark::ArkStoryProvider;

#[cfg(feature = "story-http")]
mod ark {
    use super::{StoryTextProvider, chat_request, parse_story};
    use crate::config::StoryConfig;
    use crate::error::{Result, SlowwaveError};
    use async_trait::async_trait;
    use tracing::{debug, warn};

    /// OpenAI-compatible chat-completion endpoint.
    pub struct ArkStoryProvider {
        client: reqwest::Client,
        config: StoryConfig,
    }

    impl ArkStoryProvider {
        pub fn new(config: StoryConfig) -> Self {
            Self {
                client: reqwest::Client::new(),
                config,
            }
        }
    }

    #[async_trait]
    impl StoryTextProvider for ArkStoryProvider {
        async fn generate(&self, hint: &str) -> Result<String> {
            self.config.validate()?;
            let body = chat_request(&self.config.model, hint, &self.config.fallback_hint);
            debug!(model = %self.config.model, hint, "requesting story");

            let response = self
                .client
                .post(&self.config.base_url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| SlowwaveError::StoryGeneration {
                    message: format!("request failed: {e}"),
                })?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| SlowwaveError::StoryGeneration {
                    message: format!("failed to read response: {e}"),
                })?;
            if !status.is_success() {
                warn!(%status, body = %text, "story endpoint returned an error status");
            }

            let story = parse_story(&text).inspect_err(|_| {
                warn!(body = %text, "story response could not be parsed");
            })?;
            debug!(chars = story.chars().count(), "story received");
            Ok(story)
        }
    }
}
