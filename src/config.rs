//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Special-case environment variables (HOST, PORT, WHISPER_MODEL)
//! 2. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! `WHISPER_MODEL` sets the default model identifier used when a request
//! does not carry an explicit `model` query parameter.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub audio: AudioConfig,
}

/// Server bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Recognition model settings.
///
/// ## Fields:
/// - `default_model`: model identifier used when a request omits `model`
///   ("tiny", "base", "small", "medium", "large")
/// - `device`: compute device preference ("auto", "cpu", "cuda", "metal")
/// - `preload`: load the default model eagerly at startup; a preload
///   failure aborts startup instead of deferring the error to the first
///   request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub default_model: String,
    pub device: String,
    pub preload: bool,
}

/// Audio intake settings.
///
/// ## Fields:
/// - `ffmpeg_path`: binary invoked to normalize non-WAV uploads to
///   16 kHz mono 16-bit PCM
/// - `max_upload_mb`: multipart upload size limit in megabytes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub ffmpeg_path: String,
    pub max_upload_mb: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                default_model: "base".to_string(), // fast enough for a request/response service
                device: "auto".to_string(),
                preload: false,
            },
            audio: AudioConfig {
                ffmpeg_path: "ffmpeg".to_string(), // resolved via PATH
                max_upload_mb: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: override server host
    /// - `APP_SERVER_PORT=3000`: override server port
    /// - `HOST` / `PORT`: deployment-platform conventions, highest priority
    /// - `WHISPER_MODEL=small`: override the default model identifier
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // The default model identifier is sourced from the environment at
        // startup; requests can still select a different one per call.
        if let Ok(model) = env::var("WHISPER_MODEL") {
            settings = settings.set_override("models.default_model", model)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup prevents runtime failures
    /// and gives a clear message about what is wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.models.default_model.trim().is_empty() {
            return Err(anyhow::anyhow!("Default model identifier cannot be empty"));
        }

        if self.audio.ffmpeg_path.trim().is_empty() {
            return Err(anyhow::anyhow!("ffmpeg path cannot be empty"));
        }

        if self.audio.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON string (runtime config endpoint).
    ///
    /// Only fields present in the JSON are touched; the result is validated
    /// before it is accepted. For example `{"models": {"default_model":
    /// "small"}}` changes only the default model.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(models) = partial_config.get("models") {
            if let Some(model) = models.get("default_model").and_then(|v| v.as_str()) {
                self.models.default_model = model.to_string();
            }
            if let Some(device) = models.get("device").and_then(|v| v.as_str()) {
                self.models.device = device.to_string();
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(path) = audio.get("ffmpeg_path").and_then(|v| v.as_str()) {
                self.audio.ffmpeg_path = path.to_string();
            }
            if let Some(limit) = audio.get("max_upload_mb").and_then(|v| v.as_u64()) {
                self.audio.max_upload_mb = limit as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.models.default_model, "base");
        assert!(!config.models.preload);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.default_model = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.ffmpeg_path = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_partial_update() {
        let mut config = AppConfig::default();
        let json = r#"{"models": {"default_model": "small"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.models.default_model, "small");
        // Untouched fields keep their values
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_config_update_rejects_invalid_result() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"max_upload_mb": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
