//! Application configuration.

use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::audio::level::LevelConfig;
use crate::audio::AudioConfig;

/// Default base URL of the voice-biometrics service.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api/v1/";

/// Voice-biometrics backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the speaker service.
    pub base_url: String,
    /// Request timeout for submissions, in seconds.
    pub request_timeout_secs: u64,
    /// Bearer token; the VOICEBOOTH_TOKEN environment variable wins over this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
            auth_token: None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub level: LevelConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl AppConfig {
    /// Load config from file or create default
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: AppConfig = toml::from_str(&content)?;
            log::info!("Config loaded from: {}", path.display());
            Ok(config)
        } else {
            let config = Self::default();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let toml_str = toml::to_string_pretty(&config)?;
            fs::write(path, toml_str)?;
            log::info!("Default config created at: {}", path.display());
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::level::{ANALYSER_WINDOW, LEVEL_SMOOTHING, SPEECH_THRESHOLD};

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.backend.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.backend.request_timeout_secs, 30);
        assert_eq!(config.level.window_size, ANALYSER_WINDOW);
        assert_eq!(config.level.smoothing, LEVEL_SMOOTHING);
        assert_eq!(config.level.speech_threshold, SPEECH_THRESHOLD);
        assert!(config.audio.device_name.is_none());
    }

    #[test]
    fn test_partial_toml_fills_in_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [backend]
            base_url = "https://assistant.example/api/"
            request_timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.base_url, "https://assistant.example/api/");
        assert_eq!(config.backend.request_timeout_secs, 5);
        assert_eq!(config.level.window_size, ANALYSER_WINDOW);
    }

    #[test]
    fn test_round_trip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.backend.base_url, config.backend.base_url);
        assert_eq!(parsed.level.window_size, config.level.window_size);
    }
}
