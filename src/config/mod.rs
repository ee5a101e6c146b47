//! Gateway configuration.
//!
//! Loaded from environment variables (a `.env` file is read first when
//! present). Required: the AI provider base URL and API key. Everything else
//! has a sensible default; VAD tuning knobs can be overridden per deployment.

use std::time::Duration;

use uuid::Uuid;

use crate::core::vad::VadTuning;
use crate::errors::ConfigError;

/// AI provider connection settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Full server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub provider: ProviderConfig,
    pub vad: VadTuning,
    /// Identity of this worker process in the session registry.
    pub worker_id: String,
    /// Externally reachable address of this worker, if any.
    pub worker_address: Option<String>,
    pub session_ttl: Duration,
}

impl ServerConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = ProviderConfig {
            base_url: require("AI_PROVIDER_BASE_URL")?,
            api_key: require("AI_PROVIDER_API_KEY")?,
        };

        let mut vad = VadTuning::default();
        if let Some(v) = parse_optional("VAD_SPEECH_THRESHOLD")? {
            vad.speech_threshold = v;
        }
        if let Some(v) = parse_optional("VAD_SILENCE_THRESHOLD")? {
            vad.silence_threshold = v;
        }
        if let Some(v) = parse_optional("VAD_SILENCE_FRAME_LIMIT")? {
            vad.silence_frame_limit = v;
        }
        if let Some(v) = parse_optional("VAD_MIN_SPEECH_FRAMES")? {
            vad.min_speech_frames = v;
        }
        if let Some(v) = parse_optional("VAD_MIN_AVERAGE_ENERGY")? {
            vad.min_average_energy = v;
        }
        if let Some(v) = parse_optional("VAD_FORCED_COMMIT_FRAMES")? {
            vad.forced_commit_frames = v;
        }
        vad.validate().map_err(|reason| ConfigError::Invalid {
            key: "VAD_*",
            reason,
        })?;

        let config = Self {
            host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_optional("PORT")?.unwrap_or(8080),
            provider,
            vad,
            worker_id: optional("WORKER_ID")
                .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4())),
            worker_address: optional("WORKER_ADDRESS"),
            session_ttl: Duration::from_secs(
                parse_optional("SESSION_TTL_SECS")?.unwrap_or(6 * 60 * 60),
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                key: "PORT",
                reason: "port must be non-zero".to_string(),
            });
        }
        if self.provider.base_url.is_empty() {
            return Err(ConfigError::Invalid {
                key: "AI_PROVIDER_BASE_URL",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Socket address string to bind.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn optional(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parse_optional<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_formatting() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 9000,
            provider: ProviderConfig {
                base_url: "https://api.example".into(),
                api_key: "k".into(),
            },
            vad: VadTuning::default(),
            worker_id: "worker-test".into(),
            worker_address: None,
            session_ttl: Duration::from_secs(60),
        };
        assert_eq!(config.address(), "127.0.0.1:9000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            provider: ProviderConfig {
                base_url: "https://api.example".into(),
                api_key: "k".into(),
            },
            vad: VadTuning::default(),
            worker_id: "worker-test".into(),
            worker_address: None,
            session_ttl: Duration::from_secs(60),
        };
        assert!(config.validate().is_err());
    }
}
