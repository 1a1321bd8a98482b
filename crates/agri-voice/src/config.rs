//! Voice orchestrator configuration.
//!
//! Loaded from an optional TOML file plus environment overrides:
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | AGRI_VOICE_CONFIG | config/voice | Path of the TOML file (extension optional). |
//! | AGRI_VOICE__BACKEND__BASE_URL | http://127.0.0.1:8000 | Voice query API root. |
//! | AGRI_VOICE__BACKEND__API_TOKEN | unset | Bearer token sent with every call. |
//! | AGRI_VOICE__CAPTURE__SILENCE_WINDOW_MS | 1500 | Pause that auto-submits an utterance. |
//! | AGRI_VOICE__POLL__INTERVAL_MS | 1000 | Result poll period. |
//! | AGRI_VOICE__POLL__MAX_ATTEMPTS | 60 | Status calls before giving up (0 = unbounded). |
//! | AGRI_VOICE__POLL__BUDGET_MS | 90000 | Wall-clock poll budget (0 = unbounded). |
//! | AGRI_VOICE__LOCALE | en-IN | Recognition and playback locale. |

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for one voice session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceConfig {
    /// BCP-47 locale used for recognition, queries and playback.
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureConfig {
    #[serde(default = "default_silence_window_ms")]
    pub silence_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    #[serde(default = "default_rate")]
    pub rate: f32,
    #[serde(default = "default_pitch")]
    pub pitch: f32,
    /// Preferred voice name; falls back to locale matching when absent or missing.
    #[serde(default)]
    pub voice_hint: Option<String>,
}

fn default_locale() -> String {
    "en-IN".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_silence_window_ms() -> u64 {
    1_500
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    60
}

fn default_budget_ms() -> u64 {
    90_000
}

fn default_rate() -> f32 {
    1.0
}

fn default_pitch() -> f32 {
    1.0
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            backend: BackendConfig::default(),
            capture: CaptureConfig::default(),
            poll: PollConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence_window_ms: default_silence_window_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            budget_ms: default_budget_ms(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            pitch: default_pitch(),
            voice_hint: None,
        }
    }
}

impl CaptureConfig {
    pub fn silence_window(&self) -> Duration {
        Duration::from_millis(self.silence_window_ms)
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Attempt bound, `None` when unbounded.
    pub fn attempt_limit(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    /// Wall-clock bound, `None` when unbounded.
    pub fn budget(&self) -> Option<Duration> {
        (self.budget_ms > 0).then(|| Duration::from_millis(self.budget_ms))
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl VoiceConfig {
    /// Load from file and environment. Precedence: env > `AGRI_VOICE_CONFIG` file > defaults.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("AGRI_VOICE_CONFIG").unwrap_or_else(|_| "config/voice".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Load using an explicit file path (missing file => defaults + env only).
    pub fn load_from(path: &Path) -> VoiceResult<Self> {
        let builder = config::Config::builder()
            .set_default("locale", default_locale())?
            .set_default("backend.base_url", default_base_url())?
            .set_default("backend.request_timeout_ms", default_request_timeout_ms() as i64)?
            .set_default("capture.silence_window_ms", default_silence_window_ms() as i64)?
            .set_default("poll.interval_ms", default_poll_interval_ms() as i64)?
            .set_default("poll.max_attempts", default_max_attempts() as i64)?
            .set_default("poll.budget_ms", default_budget_ms() as i64)?
            .set_default("playback.rate", default_rate() as f64)?
            .set_default("playback.pitch", default_pitch() as f64)?;

        let builder = builder.add_source(config::File::from(path).required(false));

        let built = builder
            .add_source(config::Environment::with_prefix("AGRI_VOICE").separator("__"))
            .build()?;

        let config: VoiceConfig = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the orchestrator cannot run with.
    pub fn validate(&self) -> VoiceResult<()> {
        if self.locale.trim().is_empty() {
            return Err(VoiceError::Config("locale must not be empty".to_string()));
        }
        if self.backend.base_url.trim().is_empty() {
            return Err(VoiceError::Config("backend.base_url must not be empty".to_string()));
        }
        if self.capture.silence_window_ms == 0 {
            return Err(VoiceError::Config(
                "capture.silence_window_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll.interval_ms == 0 {
            return Err(VoiceError::Config("poll.interval_ms must be greater than zero".to_string()));
        }
        if self.poll.attempt_limit().is_none() && self.poll.budget().is_none() {
            return Err(VoiceError::Config(
                "poll needs max_attempts or budget_ms (or both)".to_string(),
            ));
        }
        if !(0.1..=10.0).contains(&self.playback.rate) {
            return Err(VoiceError::Config(format!(
                "playback.rate {} out of range 0.1..=10",
                self.playback.rate
            )));
        }
        if !(0.0..=2.0).contains(&self.playback.pitch) {
            return Err(VoiceError::Config(format!(
                "playback.pitch {} out of range 0..=2",
                self.playback.pitch
            )));
        }
        Ok(())
    }
}
