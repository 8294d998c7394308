//! Configuration types for the journey engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Throttled text reveal settings.
    pub text: TextConfig,
    /// Speech playback settings.
    pub audio: AudioConfig,
    /// Microphone recording settings.
    pub recording: RecordingConfig,
    /// Transcription polling settings.
    pub transcription: TranscriptionConfig,
    /// Outbound API settings.
    pub api: ApiConfig,
}

/// Throttled text reveal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Reveal rate in words per second.
    pub words_per_second: f64,
    /// Pacing clock granularity in ms. Effective interval is floored at
    /// [`MIN_TICK_INTERVAL_MS`] to limit bursts from timer jitter.
    pub tick_interval_ms: u64,
    /// Delay before a deferred summary renders after the turn unlocks, in ms.
    pub settle_delay_ms: u64,
}

/// Minimum effective pacing interval in milliseconds.
pub const MIN_TICK_INTERVAL_MS: u64 = 100;

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            words_per_second: 3.0,
            tick_interval_ms: 250,
            settle_delay_ms: 700,
        }
    }
}

/// Speech playback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of incoming PCM16 speech chunks in Hz.
    pub sample_rate: u32,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            // The synthesis service streams PCM16 at 24kHz mono.
            sample_rate: 24_000,
            output_device: None,
        }
    }
}

/// Microphone recording configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Hard cap on recording duration in seconds; recording force-stops here.
    pub max_duration_secs: u64,
    /// Sample rate the capture is downsampled to before upload, in Hz.
    pub capture_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 30,
            capture_sample_rate: 16_000,
            input_device: None,
        }
    }
}

/// Transcription polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Fixed interval between poll attempts in ms.
    pub poll_interval_ms: u64,
    /// Maximum number of poll attempts before the session fails.
    pub max_poll_attempts: u32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_poll_attempts: 30,
        }
    }
}

/// Outbound API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the journey service.
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
        }
    }
}

/// Overrides supplied by the hosting page at session start.
///
/// The page can tune the reveal rate and the recording hard-timeout without
/// touching the config file; everything else comes from [`EngineConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PageOverrides {
    /// Reveal rate in words per second, if the page supplies one.
    pub words_per_second: Option<f64>,
    /// Recording hard-timeout in seconds, if the page supplies one.
    pub recording_timeout_secs: Option<u64>,
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::EngineError::Config(e.to_string()))
    }

    /// Apply page-supplied overrides, rejecting non-positive values.
    ///
    /// # Errors
    ///
    /// Returns an error if an override is zero or negative.
    pub fn apply_overrides(&mut self, overrides: &PageOverrides) -> crate::error::Result<()> {
        if let Some(rate) = overrides.words_per_second {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(crate::error::EngineError::Config(format!(
                    "words_per_second override must be positive, got {rate}"
                )));
            }
            self.text.words_per_second = rate;
        }
        if let Some(secs) = overrides.recording_timeout_secs {
            if secs == 0 {
                return Err(crate::error::EngineError::Config(
                    "recording_timeout_secs override must be positive".into(),
                ));
            }
            self.recording.max_duration_secs = secs;
        }
        Ok(())
    }

    /// Effective pacing interval after the jitter floor.
    pub fn effective_tick_interval_ms(&self) -> u64 {
        self.text.tick_interval_ms.max(MIN_TICK_INTERVAL_MS)
    }

    /// Returns the default config file path: `~/.config/wayfarer/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("wayfarer").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("wayfarer")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/wayfarer-config/config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.text.words_per_second > 0.0);
        assert!(config.text.tick_interval_ms >= MIN_TICK_INTERVAL_MS);
        assert!(config.audio.sample_rate > 0);
        assert!(config.recording.max_duration_secs > 0);
        assert!(config.recording.capture_sample_rate > 0);
        assert!(config.transcription.max_poll_attempts > 0);
        assert!(!config.api.base_url.is_empty());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [text]
            words_per_second = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.text.words_per_second, 2.5);
        assert_eq!(config.text.tick_interval_ms, 250);
        assert_eq!(config.audio.sample_rate, 24_000);
    }

    #[test]
    fn overrides_apply() {
        let mut config = EngineConfig::default();
        let overrides = PageOverrides {
            words_per_second: Some(5.0),
            recording_timeout_secs: Some(10),
        };
        config.apply_overrides(&overrides).unwrap();
        assert_eq!(config.text.words_per_second, 5.0);
        assert_eq!(config.recording.max_duration_secs, 10);
    }

    #[test]
    fn overrides_reject_non_positive() {
        let mut config = EngineConfig::default();
        let bad_rate = PageOverrides {
            words_per_second: Some(0.0),
            recording_timeout_secs: None,
        };
        assert!(config.apply_overrides(&bad_rate).is_err());

        let bad_timeout = PageOverrides {
            words_per_second: None,
            recording_timeout_secs: Some(0),
        };
        assert!(config.apply_overrides(&bad_timeout).is_err());
    }

    #[test]
    fn tick_interval_floor_applies() {
        let mut config = EngineConfig::default();
        config.text.tick_interval_ms = 10;
        assert_eq!(config.effective_tick_interval_ms(), MIN_TICK_INTERVAL_MS);
    }

    #[test]
    fn toml_round_trip() {
        let config = EngineConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let loaded: EngineConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(loaded.text.words_per_second, config.text.words_per_second);
        assert_eq!(loaded.audio.sample_rate, config.audio.sample_rate);
    }
}
