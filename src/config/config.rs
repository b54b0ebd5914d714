use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::websocket::backoff::Backoff;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub panel: PanelConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub commands: CommandConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PanelConfig {
    pub url: String,
    pub api_key: String,
    pub server_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_factor: f64,
    /// Fraction of the current delay added or removed at random
    pub reconnect_jitter: f64,
    pub ping_interval_secs: u64,
    pub liveness_window_secs: u64,
    pub auth_timeout_secs: u64,
    pub token_ttl_secs: u64,
    pub token_refresh_margin_secs: u64,
    pub max_auth_rejections: u32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 30_000,
            reconnect_factor: 2.0,
            reconnect_jitter: 0.1,
            ping_interval_secs: 20,
            liveness_window_secs: 60,
            auth_timeout_secs: 10,
            token_ttl_secs: 600,
            token_refresh_margin_secs: 30,
            max_auth_rejections: 5,
        }
    }
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
    pub max_tail: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            max_tail: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandConfig {
    pub response_timeout_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 5_000,
        }
    }
}

impl CommandConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let mut config = Self::from_json(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Secrets usually live in the environment rather than in config.json
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PANEL_URL") {
            self.panel.url = url;
        }
        if let Some(key) = lookup("PANEL_API_KEY") {
            self.panel.api_key = key;
        }
        if let Some(id) = lookup("PANEL_SERVER_ID") {
            self.panel.server_id = id;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.panel.url.trim().is_empty() {
            missing.push("panel.url");
        }
        if self.panel.api_key.trim().is_empty() {
            missing.push("panel.api_key");
        }
        if self.panel.server_id.trim().is_empty() {
            missing.push("panel.server_id");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Invalid(format!("missing {}", missing.join(", "))));
        }

        if !self.panel.url.starts_with("http://") && !self.panel.url.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "panel.url must be an http(s) URL, got {}",
                self.panel.url
            )));
        }

        let ws = &self.websocket;
        if ws.reconnect_base_ms == 0 || ws.reconnect_max_ms < ws.reconnect_base_ms {
            return Err(ConfigError::Invalid(
                "websocket.reconnect_max_ms must be >= reconnect_base_ms > 0".to_string(),
            ));
        }
        if ws.reconnect_factor <= 1.0 {
            return Err(ConfigError::Invalid("websocket.reconnect_factor must be > 1".to_string()));
        }
        let max_jitter = Backoff::max_jitter(ws.reconnect_factor);
        if !(0.0..=max_jitter).contains(&ws.reconnect_jitter) {
            return Err(ConfigError::Invalid(format!(
                "websocket.reconnect_jitter must be in [0, {:.3}] for reconnect_factor {}",
                max_jitter, ws.reconnect_factor
            )));
        }
        for (name, secs) in [
            ("ping_interval_secs", ws.ping_interval_secs),
            ("liveness_window_secs", ws.liveness_window_secs),
            ("auth_timeout_secs", ws.auth_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("websocket.{} must be at least 1", name)));
            }
        }
        // Pongs are the only traffic on a quiet console
        if ws.liveness_window_secs <= ws.ping_interval_secs {
            return Err(ConfigError::Invalid(
                "websocket.liveness_window_secs must be longer than ping_interval_secs".to_string(),
            ));
        }
        if ws.token_ttl_secs <= ws.token_refresh_margin_secs {
            return Err(ConfigError::Invalid(
                "websocket.token_ttl_secs must be longer than token_refresh_margin_secs".to_string(),
            ));
        }
        if ws.max_auth_rejections == 0 {
            return Err(ConfigError::Invalid(
                "websocket.max_auth_rejections must be at least 1".to_string(),
            ));
        }

        if self.buffer.capacity == 0 {
            return Err(ConfigError::Invalid("buffer.capacity must be at least 1".to_string()));
        }
        if self.buffer.max_tail == 0 || self.buffer.max_tail > self.buffer.capacity {
            return Err(ConfigError::Invalid(
                "buffer.max_tail must be between 1 and buffer.capacity".to_string(),
            ));
        }
        Ok(())
    }

    /// Panel URL without a trailing slash, used for API paths and the Origin header
    pub fn panel_base(&self) -> &str {
        self.panel.url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "panel": { "url": "https://panel.example.com/", "api_key": "ptlc_abc", "server_id": "1a2b3c4d" }
    }"#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_json(MINIMAL).unwrap();
        assert_eq!(config.buffer.capacity, 500);
        assert_eq!(config.buffer.max_tail, 20);
        assert_eq!(config.websocket.reconnect_base_ms, 1_000);
        assert_eq!(config.websocket.liveness_window(), Duration::from_secs(60));
        assert_eq!(config.commands.response_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
        assert_eq!(config.panel_base(), "https://panel.example.com");
    }

    #[test]
    fn test_env_overrides_panel_values() {
        let mut config = Config::from_json(MINIMAL).unwrap();
        config.apply_env_overrides(|key| match key {
            "PANEL_API_KEY" => Some("ptlc_from_env".to_string()),
            _ => None,
        });
        assert_eq!(config.panel.api_key, "ptlc_from_env");
        assert_eq!(config.panel.server_id, "1a2b3c4d");
    }

    #[test]
    fn test_reject_missing_credentials() {
        let mut config = Config::from_json(MINIMAL).unwrap();
        config.panel.api_key = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("panel.api_key"));
    }

    #[test]
    fn test_reject_bad_tuning() {
        let mut config = Config::from_json(MINIMAL).unwrap();
        config.buffer.max_tail = 600;
        assert!(config.validate().is_err());

        let mut config = Config::from_json(MINIMAL).unwrap();
        config.websocket.reconnect_jitter = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::from_json(MINIMAL).unwrap();
        config.panel.url = "panel.example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jitter_bound_follows_factor() {
        let mut config = Config::from_json(MINIMAL).unwrap();
        config.websocket.reconnect_jitter = 0.33;
        assert!(config.validate().is_ok());

        config.websocket.reconnect_jitter = 0.34;
        assert!(config.validate().is_err());

        config.websocket.reconnect_factor = 3.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reject_zero_socket_timers() {
        for field in ["ping_interval_secs", "liveness_window_secs", "auth_timeout_secs"] {
            let mut config = Config::from_json(MINIMAL).unwrap();
            match field {
                "ping_interval_secs" => config.websocket.ping_interval_secs = 0,
                "liveness_window_secs" => config.websocket.liveness_window_secs = 0,
                _ => config.websocket.auth_timeout_secs = 0,
            }
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{}: {}", field, err);
        }

        let mut config = Config::from_json(MINIMAL).unwrap();
        config.websocket.ping_interval_secs = 60;
        config.websocket.liveness_window_secs = 60;
        assert!(config.validate().is_err());

        let mut config = Config::from_json(MINIMAL).unwrap();
        config.websocket.token_ttl_secs = 30;
        assert!(config.validate().is_err());
    }
}
