//! Configuration loading for the ERDSYNC client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use crate::session::SessionUser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErdsyncConfig {
    pub api_base_url: String,
    pub ws_endpoint: String,
    pub project_key: i64,
    pub request_timeout_ms: u64,
    pub auth: AuthConfig,
    pub user: UserConfig,
    pub reconnect: ReconnectConfig,
    pub locks: LockConfig,
    pub realtime: RealtimeConfig,
    pub streams: StreamConfig,
    /// Optional: read-only viewer propagation.
    #[serde(default)]
    pub viewer: Option<ViewerConfig>,
    /// Optional: defaults to human-readable output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub email: String,
    pub name: String,
    /// Backend user key, when known. Used to skip our own broadcasts.
    #[serde(default)]
    pub user_key: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    pub heartbeat_interval_ms: u64,
    pub grant_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeConfig {
    pub move_throttle_ms: u64,
    /// STOMP heart-beat interval, both directions.
    pub stomp_heartbeat_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewerConfig {
    pub viewer_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or ERDSYNC_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

impl ErdsyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: ErdsyncConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(invalid("api_base_url", "must not be empty"));
        }
        if self.ws_endpoint.trim().is_empty() {
            return Err(invalid("ws_endpoint", "must not be empty"));
        }
        if !self.ws_endpoint.starts_with("ws://") && !self.ws_endpoint.starts_with("wss://") {
            return Err(invalid("ws_endpoint", "must use ws:// or wss://"));
        }
        if self.project_key <= 0 {
            return Err(invalid("project_key", "must be > 0"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be > 0"));
        }
        if self.auth.access_token.trim().is_empty() {
            return Err(invalid("auth.access_token", "must not be empty"));
        }
        if self.user.email.trim().is_empty() {
            return Err(invalid("user.email", "must not be empty"));
        }
        if self.reconnect.initial_ms == 0 {
            return Err(invalid("reconnect.initial_ms", "must be > 0"));
        }
        if self.reconnect.max_ms < self.reconnect.initial_ms {
            return Err(invalid("reconnect.max_ms", "must be >= initial_ms"));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect.multiplier", "must be >= 1.0"));
        }
        if self.locks.heartbeat_interval_ms == 0 {
            return Err(invalid("locks.heartbeat_interval_ms", "must be > 0"));
        }
        if self.locks.grant_timeout_ms == 0 {
            return Err(invalid("locks.grant_timeout_ms", "must be > 0"));
        }
        if self.streams.reconnect_delay_ms == 0 {
            return Err(invalid("streams.reconnect_delay_ms", "must be > 0"));
        }
        if let Some(viewer) = &self.viewer {
            if viewer.viewer_key.trim().is_empty() {
                return Err(invalid("viewer.viewer_key", "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn session_user(&self) -> SessionUser {
        SessionUser {
            email: self.user.email.clone(),
            name: self.user.name.clone(),
            user_key: self.user.user_key,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.locks.heartbeat_interval_ms)
    }

    pub fn grant_timeout(&self) -> Duration {
        Duration::from_millis(self.locks.grant_timeout_ms)
    }

    pub fn move_throttle(&self) -> Duration {
        Duration::from_millis(self.realtime.move_throttle_ms)
    }

    pub fn stream_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.streams.reconnect_delay_ms)
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("ERDSYNC_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
api_base_url = "https://erd.example.com/"
ws_endpoint = "wss://erd.example.com/ws"
project_key = 7
request_timeout_ms = 5000

[auth]
access_token = "token"

[user]
email = "kim@example.com"
name = "Kim"
user_key = 3

[reconnect]
initial_ms = 250
max_ms = 5000
multiplier = 1.5
jitter_ms = 100

[locks]
heartbeat_interval_ms = 10000
grant_timeout_ms = 5000

[realtime]
move_throttle_ms = 50
stomp_heartbeat_ms = 4000

[streams]
reconnect_delay_ms = 3000
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_sample() {
        let file = write_config(SAMPLE);
        let config = ErdsyncConfig::from_path(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.project_key, 7);
        assert_eq!(config.session_user().user_key, Some(3));
        assert!(config.viewer.is_none());
        assert!(!config.logging.json);
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let file = write_config(&format!("{}\nunexpected = 1\n", SAMPLE));
        let err = ErdsyncConfig::from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_optional_sections() {
        let file = write_config(&format!(
            "{}\n[viewer]\nviewer_key = \"abc\"\n\n[logging]\njson = true\n",
            SAMPLE
        ));
        let config = ErdsyncConfig::from_path(file.path()).unwrap();
        assert_eq!(config.viewer.unwrap().viewer_key, "abc");
        assert!(config.logging.json);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let file = write_config(SAMPLE);
        let base = ErdsyncConfig::from_path(file.path()).unwrap();

        let mut config = base.clone();
        config.auth.access_token = " ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "auth.access_token", .. })
        ));

        let mut config = base.clone();
        config.reconnect.max_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "reconnect.max_ms", .. })
        ));

        let mut config = base.clone();
        config.ws_endpoint = "https://erd.example.com/ws".to_string();
        assert!(config.validate().is_err());

        let mut config = base;
        config.locks.heartbeat_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
