use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub driver: DriverConfig,
}

impl Config {
    /// Load the YAML config file. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    /// Apply environment overrides on top of the file values.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "PORT",
                value: port,
            })?;
        }
        if let Some(flag) = lookup("ENABLE_CORS") {
            self.server.enable_cors = flag.trim().eq_ignore_ascii_case("true");
        }
        if let Some(limit) = lookup("BODY_LIMIT") {
            self.server.body_limit = limit;
        }
        if let Some(client_id) = lookup("SESSION_CLIENT_ID") {
            self.session.client_id = client_id;
        }
        if let Some(ms) = lookup("SEND_TIMEOUT_MS") {
            self.session.send_timeout_ms =
                ms.trim().parse().map_err(|_| ConfigError::Invalid {
                    key: "SEND_TIMEOUT_MS",
                    value: ms,
                })?;
        }
        if let Some(command) = lookup("DRIVER_COMMAND") {
            self.driver.command = command;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        parse_byte_size(&self.server.body_limit)?;
        if self.session.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "session.client_id",
                value: self.session.client_id.clone(),
            });
        }
        if self.session.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "session.send_timeout_ms",
                value: "0".to_string(),
            });
        }
        if self.server.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                key: "server.request_timeout_seconds",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
    /// Maximum request body size, e.g. `100kb` or `1mb`.
    #[serde(default = "default_body_limit")]
    pub body_limit: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            enable_cors: default_enable_cors(),
            body_limit: default_body_limit(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn body_limit_bytes(&self) -> Result<usize, ConfigError> {
        parse_byte_size(&self.body_limit)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_enable_cors() -> bool {
    true
}

fn default_body_limit() -> String {
    "100kb".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

// ============================================================================
// SessionConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Namespace under which the driver persists session credentials.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_client_id() -> String {
    "courier_local".to_string()
}

fn default_send_timeout_ms() -> u64 {
    20_000
}

// ============================================================================
// DriverConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DriverConfig {
    /// Program implementing the driver protocol.
    #[serde(default = "default_driver_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command: default_driver_command(),
            args: Vec::new(),
        }
    }
}

fn default_driver_command() -> String {
    "courier-driver".to_string()
}

// ============================================================================
// Byte sizes
// ============================================================================

/// Parse a human byte size (`512`, `512b`, `100kb`, `1mb`, `1gb`), base 1024.
pub fn parse_byte_size(input: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::Invalid {
        key: "body_limit",
        value: input.to_string(),
    };

    let normalized = input.trim().to_ascii_lowercase();
    let split = normalized
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(normalized.len());
    let (digits, unit) = normalized.split_at(split);
    let value: usize = digits.parse().map_err(|_| invalid())?;

    let multiplier: usize = match unit.trim() {
        "" | "b" => 1,
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };

    value.checked_mul(multiplier).ok_or_else(invalid)
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

// ============================================================================
// Tests
// ============================================================================
