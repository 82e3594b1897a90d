//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_AGENT_WS_URL, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub audio: AudioConfig,
    pub calls: CallPolicyConfig,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Voice-agent endpoint configuration.
///
/// When `ws_url` or `agent_id` is empty the integration is considered
/// unconfigured and the bridge runs in degraded/demo mode: calls are
/// accepted but no agent leg is opened and caller audio is not echoed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// WebSocket URL of the conversational-AI endpoint
    pub ws_url: String,

    /// Agent identity passed as a query parameter on connect
    pub agent_id: String,

    /// Bearer token; sent only when non-empty
    pub api_key: String,

    /// Voice selection forwarded in the initiation message
    pub voice_id: String,

    /// Model selection forwarded in the initiation message
    pub model: String,

    /// Bound on WebSocket connection establishment
    pub connect_timeout_secs: u64,

    /// Cadence of keepalive pings while a conversation is live
    pub keepalive_interval_secs: u64,
}

impl AgentConfig {
    /// Whether the agent integration has enough settings to open a socket.
    pub fn is_configured(&self) -> bool {
        !self.ws_url.is_empty() && !self.agent_id.is_empty()
    }
}

/// Audio pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// RMS threshold for voice-activity detection (normalized [0,1] scale)
    pub vad_threshold: f64,

    /// Forward non-voice chunks to the agent anyway. Dropping silence saves
    /// agent-endpoint bandwidth at the cost of background cues.
    pub forward_silence: bool,

    /// Sliding window retained per session leg, in milliseconds
    pub buffer_window_ms: u32,
}

/// Call lifetime policy enforced by the stale-session reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallPolicyConfig {
    /// Maximum expected call duration before a session counts as stale
    pub max_duration_secs: u64,

    /// Grace window added on top of the maximum duration
    pub reaper_grace_secs: u64,

    /// How often the reaper sweeps the registry
    pub reaper_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            agent: AgentConfig {
                ws_url: String::new(),
                agent_id: String::new(),
                api_key: String::new(),
                voice_id: "default".to_string(),
                model: "conversational-v1".to_string(),
                connect_timeout_secs: 10,
                keepalive_interval_secs: 30,
            },
            audio: AudioConfig {
                vad_threshold: 0.01,
                forward_silence: false,
                buffer_window_ms: 5000,
            },
            calls: CallPolicyConfig {
                max_duration_secs: 300,
                reaper_grace_secs: 60,
                reaper_interval_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_AGENT_WS_URL=wss://agent.example/convai`: Point at the agent
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(0.0..=1.0).contains(&self.audio.vad_threshold) {
            return Err(anyhow::anyhow!(
                "VAD threshold must be within [0.0, 1.0], got {}",
                self.audio.vad_threshold
            ));
        }

        if self.audio.buffer_window_ms == 0 {
            return Err(anyhow::anyhow!("Audio buffer window must be greater than 0"));
        }

        if self.calls.max_duration_secs == 0 {
            return Err(anyhow::anyhow!("Max call duration must be greater than 0"));
        }

        if self.calls.reaper_interval_secs == 0 {
            return Err(anyhow::anyhow!("Reaper interval must be greater than 0"));
        }

        if self.agent.connect_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Agent connect timeout must be greater than 0"));
        }

        if self.agent.keepalive_interval_secs == 0 {
            return Err(anyhow::anyhow!("Keepalive interval must be greater than 0"));
        }

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
        assert_eq!(config.audio.vad_threshold, 0.01);
        assert!(!config.audio.forward_silence);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_agent_is_unconfigured() {
        let config = AppConfig::default();
        assert!(!config.agent.is_configured());

        let mut config = config;
        config.agent.ws_url = "wss://agent.example/convai".to_string();
        config.agent.agent_id = "agent_123".to_string();
        assert!(config.agent.is_configured());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.vad_threshold = 2.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.calls.max_duration_secs = 0;
        assert!(config.validate().is_err());
    }
}
