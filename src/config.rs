use crate::defaults;
use crate::error::{Result, SlowwaveError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub tts: TtsConfig,
    pub story: StoryConfig,
    pub narration: NarrationConfig,
    pub ambient: AmbientConfig,
    pub audio: AudioConfig,
}

/// Streaming synthesis connection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub app_id: String,
    pub access_token: String,
    pub voice_type: String,
    pub resource_id: String,
    pub endpoint: String,
    pub uid: String,
    pub speech_rate: Option<f64>,
    pub loudness_rate: Option<f64>,
    pub emotion: Option<String>,
    pub sample_rate: u32,
    pub stage_timeout_secs: u64,
}

/// Story text provider parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoryConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Request used when no listener hint has been heard.
    pub fallback_hint: String,
}

/// Narration segmentation and sequencing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NarrationConfig {
    pub max_segment_chars: usize,
    pub on_segment_failure: SegmentFailurePolicy,
}

/// What the narration pipeline does when one segment fails to synthesize.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SegmentFailurePolicy {
    /// Log it, leave a silent gap, continue with the next segment.
    #[default]
    Skip,
    /// End the narration at the failed segment.
    Abort,
}

/// Ambient background sound
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AmbientConfig {
    /// WAV file to loop. Generated soft noise when unset.
    pub asset: Option<PathBuf>,
    pub volume: f32,
    pub restart_delay_ms: u64,
}

/// Audio output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            access_token: String::new(),
            voice_type: String::new(),
            resource_id: defaults::TTS_RESOURCE_ID.to_string(),
            endpoint: defaults::TTS_STREAM_ENDPOINT.to_string(),
            uid: String::new(),
            speech_rate: None,
            loudness_rate: None,
            emotion: None,
            sample_rate: defaults::SAMPLE_RATE,
            stage_timeout_secs: defaults::STAGE_TIMEOUT_SECS,
        }
    }
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            fallback_hint: defaults::FALLBACK_STORY_HINT.to_string(),
        }
    }
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            max_segment_chars: defaults::MAX_SEGMENT_CHARS,
            on_segment_failure: SegmentFailurePolicy::Skip,
        }
    }
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            asset: None,
            volume: defaults::AMBIENT_VOLUME,
            restart_delay_ms: defaults::AMBIENT_RESTART_DELAY_MS,
        }
    }
}

impl TtsConfig {
    /// Check required connection parameters before any network activity.
    ///
    /// Every missing field is reported by its environment variable name.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("VOLC_APP_ID", &self.app_id),
            ("VOLC_ACCESS_TOKEN", &self.access_token),
            ("VOLC_TTS_VOICE_TYPE", &self.voice_type),
            ("VOLC_TTS_RESOURCE_ID", &self.resource_id),
            ("VOLC_TTS_STREAM_ENDPOINT", &self.endpoint),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SlowwaveError::missing(missing))
        }
    }

    /// Upper bound on each wait in the synthesis session.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs.max(1))
    }
}

impl StoryConfig {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("ARK_BASE_URL", &self.base_url),
            ("ARK_API_KEY", &self.api_key),
            ("ARK_MODEL", &self.model),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SlowwaveError::missing(missing))
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(SlowwaveError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOLC_APP_ID, VOLC_ACCESS_TOKEN, VOLC_UID → tts credentials
    /// - VOLC_TTS_VOICE_TYPE, VOLC_TTS_RESOURCE_ID, VOLC_TTS_EMOTION → tts voice
    /// - VOLC_TTS_SPEECH_RATE, VOLC_TTS_LOUDNESS_RATE → tts rates
    /// - VOLC_TTS_STREAM_ENDPOINT, or VOLC_TTS_STREAM_SCHEME + _HOST + _PATH → tts.endpoint
    /// - ARK_BASE_URL, or ARK_BASE_SCHEME + _HOST + _PATH → story.base_url
    /// - ARK_API_KEY, ARK_MODEL → story
    /// - SLOWWAVE_AUDIO_DEVICE → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        override_string(&mut self.tts.app_id, "VOLC_APP_ID");
        override_string(&mut self.tts.access_token, "VOLC_ACCESS_TOKEN");
        override_string(&mut self.tts.uid, "VOLC_UID");
        override_string(&mut self.tts.voice_type, "VOLC_TTS_VOICE_TYPE");
        override_string(&mut self.tts.resource_id, "VOLC_TTS_RESOURCE_ID");

        if let Some(emotion) = env_value("VOLC_TTS_EMOTION") {
            self.tts.emotion = Some(emotion);
        }
        if let Some(rate) = env_value("VOLC_TTS_SPEECH_RATE").and_then(|v| v.parse().ok()) {
            self.tts.speech_rate = Some(rate);
        }
        if let Some(rate) = env_value("VOLC_TTS_LOUDNESS_RATE").and_then(|v| v.parse().ok()) {
            self.tts.loudness_rate = Some(rate);
        }
        if let Some(endpoint) = env_url("VOLC_TTS_STREAM_ENDPOINT", "VOLC_TTS_STREAM") {
            self.tts.endpoint = endpoint;
        }

        if let Some(base_url) = env_url("ARK_BASE_URL", "ARK_BASE") {
            self.story.base_url = base_url;
        }
        override_string(&mut self.story.api_key, "ARK_API_KEY");
        override_string(&mut self.story.model, "ARK_MODEL");

        if let Some(device) = env_value("SLOWWAVE_AUDIO_DEVICE") {
            self.audio.device = Some(device);
        }

        self
    }

    /// Fill values that must be stable for the whole run.
    pub fn finalize(mut self) -> Self {
        if self.tts.uid.trim().is_empty() {
            self.tts.uid = uuid::Uuid::new_v4().to_string();
        }
        self
    }

    /// Check values the type system cannot.
    pub fn validate(&self) -> Result<()> {
        if self.narration.max_segment_chars == 0 {
            return Err(SlowwaveError::ConfigInvalidValue {
                key: "narration.max_segment_chars".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.ambient.volume) {
            return Err(SlowwaveError::ConfigInvalidValue {
                key: "ambient.volume".to_string(),
                message: format!("{} is outside 0.0..=1.0", self.ambient.volume),
            });
        }
        if self.tts.sample_rate == 0 {
            return Err(SlowwaveError::ConfigInvalidValue {
                key: "tts.sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        mask(&mut config.tts.access_token);
        mask(&mut config.story.api_key);
        config
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SlowwaveError::Other(format!("Failed to serialize config: {}", e)))
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/slowwave/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("slowwave").join("config.toml"))
    }
}

fn mask(secret: &mut String) {
    if !secret.is_empty() {
        *secret = "***".to_string();
    }
}

/// Trimmed, non-empty environment value.
fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn override_string(target: &mut String, key: &str) {
    if let Some(value) = env_value(key) {
        *target = value;
    }
}

/// Explicit URL variable, or one composed from `<prefix>_SCHEME`, `_HOST`, `_PATH`.
fn env_url(explicit: &str, prefix: &str) -> Option<String> {
    if let Some(url) = env_value(explicit) {
        return Some(url);
    }
    let scheme = env_value(&format!("{prefix}_SCHEME"))?;
    let host = env_value(&format!("{prefix}_HOST"))?;
    let path = env_value(&format!("{prefix}_PATH")).unwrap_or_default();
    Some(compose_url(&scheme, &host, &path))
}

fn compose_url(scheme: &str, host: &str, path: &str) -> String {
    let path = if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("{scheme}://{host}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "VOLC_APP_ID",
        "VOLC_ACCESS_TOKEN",
        "VOLC_UID",
        "VOLC_TTS_VOICE_TYPE",
        "VOLC_TTS_RESOURCE_ID",
        "VOLC_TTS_EMOTION",
        "VOLC_TTS_SPEECH_RATE",
        "VOLC_TTS_LOUDNESS_RATE",
        "VOLC_TTS_STREAM_ENDPOINT",
        "VOLC_TTS_STREAM_SCHEME",
        "VOLC_TTS_STREAM_HOST",
        "VOLC_TTS_STREAM_PATH",
        "ARK_BASE_URL",
        "ARK_BASE_SCHEME",
        "ARK_BASE_HOST",
        "ARK_BASE_PATH",
        "ARK_API_KEY",
        "ARK_MODEL",
        "SLOWWAVE_AUDIO_DEVICE",
    ];

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) }
        }
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.tts.resource_id, "seed-tts-2.0");
        assert_eq!(
            config.tts.endpoint,
            "wss://openspeech.bytedance.com/api/v3/tts/bidirection"
        );
        assert_eq!(config.tts.sample_rate, 24000);
        assert_eq!(config.tts.stage_timeout_secs, 15);
        assert_eq!(config.narration.max_segment_chars, 300);
        assert_eq!(config.narration.on_segment_failure, SegmentFailurePolicy::Skip);
        assert_eq!(config.ambient.volume, 0.35);
        assert_eq!(config.ambient.restart_delay_ms, 400);
        assert_eq!(config.audio.device, None);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [tts]
            app_id = "app"
            access_token = "token"
            voice_type = "zh_female_sleepy"
            speech_rate = -30
            emotion = "calm"

            [narration]
            max_segment_chars = 120
            on_segment_failure = "abort"

            [ambient]
            asset = "/usr/share/slowwave/rain.wav"
            volume = 0.2
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.tts.app_id, "app");
        assert_eq!(config.tts.voice_type, "zh_female_sleepy");
        assert_eq!(config.tts.speech_rate, Some(-30.0));
        assert_eq!(config.tts.emotion.as_deref(), Some("calm"));
        assert_eq!(config.tts.resource_id, "seed-tts-2.0");
        assert_eq!(config.narration.max_segment_chars, 120);
        assert_eq!(config.narration.on_segment_failure, SegmentFailurePolicy::Abort);
        assert_eq!(
            config.ambient.asset,
            Some(PathBuf::from("/usr/share/slowwave/rain.wav"))
        );
        assert_eq!(config.ambient.volume, 0.2);
        assert_eq!(config.ambient.restart_delay_ms, 400);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[tts\napp_id = \"broken").unwrap();

        assert!(matches!(
            Config::load(temp_file.path()),
            Err(SlowwaveError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_slowwave_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_keeps_parse_errors() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"narration = 3").unwrap();
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_tts_validate_reports_every_missing_field() {
        let config = TtsConfig {
            resource_id: String::new(),
            ..TtsConfig::default()
        };
        match config.validate() {
            Err(SlowwaveError::ConfigurationMissing { fields }) => assert_eq!(
                fields,
                vec![
                    "VOLC_APP_ID",
                    "VOLC_ACCESS_TOKEN",
                    "VOLC_TTS_VOICE_TYPE",
                    "VOLC_TTS_RESOURCE_ID"
                ]
            ),
            other => panic!("expected ConfigurationMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_tts_validate_accepts_complete_config() {
        let config = TtsConfig {
            app_id: "a".into(),
            access_token: "t".into(),
            voice_type: "v".into(),
            ..TtsConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_story_validate() {
        assert!(StoryConfig::default().validate().is_err());
        let story = StoryConfig {
            base_url: "https://ark.example/api/v3/chat/completions".into(),
            api_key: "k".into(),
            model: "m".into(),
            ..StoryConfig::default()
        };
        assert!(story.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_segment_cap() {
        let mut config = Config::default();
        config.narration.max_segment_chars = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_loud_ambient() {
        let mut config = Config::default();
        config.ambient.volume = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_finalize_assigns_stable_uid() {
        let config = Config::default().finalize();
        assert!(!config.tts.uid.is_empty());

        let again = config.clone().finalize();
        assert_eq!(again.tts.uid, config.tts.uid);
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = Config::default();
        config.tts.access_token = "secret".into();
        config.story.api_key = "key".into();

        let shown = config.redacted();
        assert_eq!(shown.tts.access_token, "***");
        assert_eq!(shown.story.api_key, "***");
        assert_eq!(Config::default().redacted().tts.access_token, "");
    }

    #[test]
    fn test_to_toml_round_trips() {
        let config = Config::default();
        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_compose_url_normalizes_path() {
        assert_eq!(compose_url("wss", "host", "api/v3"), "wss://host/api/v3");
        assert_eq!(compose_url("wss", "host", "/api"), "wss://host/api");
        assert_eq!(compose_url("https", "host", ""), "https://host");
    }

    #[test]
    fn test_env_override_credentials() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("VOLC_APP_ID", "  app-123 ");
        set_env("VOLC_ACCESS_TOKEN", "tok");
        set_env("VOLC_TTS_VOICE_TYPE", "speaker");
        set_env("VOLC_TTS_SPEECH_RATE", "-25");
        set_env("VOLC_TTS_LOUDNESS_RATE", "not-a-number");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.tts.app_id, "app-123");
        assert_eq!(config.tts.access_token, "tok");
        assert_eq!(config.tts.voice_type, "speaker");
        assert_eq!(config.tts.speech_rate, Some(-25.0));
        assert_eq!(config.tts.loudness_rate, None);

        clear_env();
    }

    #[test]
    fn test_env_override_composed_endpoint() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("VOLC_TTS_STREAM_SCHEME", "ws");
        set_env("VOLC_TTS_STREAM_HOST", "127.0.0.1:9000");
        set_env("VOLC_TTS_STREAM_PATH", "tts");
        set_env("ARK_BASE_URL", "https://ark.example/chat");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.tts.endpoint, "ws://127.0.0.1:9000/tts");
        assert_eq!(config.story.base_url, "https://ark.example/chat");

        clear_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("VOLC_TTS_RESOURCE_ID", "   ");
        set_env("SLOWWAVE_AUDIO_DEVICE", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.tts.resource_id, "seed-tts-2.0");
        assert_eq!(config.audio.device, None);

        clear_env();
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        if let Some(path) = Config::default_path() {
            let path_str = path.to_string_lossy();
            assert!(path_str.contains("slowwave"));
            assert!(path_str.ends_with("config.toml"));
        }
    }
}
