//! Configuration settings for the authwire daemon and client.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::WireError;
use crate::protocol::{FrameLimits, DEFAULT_MAX_FRAME_SIZE};

/// Main configuration structure for the server.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listening address.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host or IP address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port. `0` binds an ephemeral port.
    pub port: u16,
}

/// TLS certificate and private key, both PEM encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Credential configuration.
#[derive(Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// Tokens accepted in addition to those in `token_file`.
    #[serde(default)]
    pub tokens: Vec<String>,
    /// File with one token per line (must be 0600 or 0400).
    #[serde(default)]
    pub token_file: Option<PathBuf>,
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("tokens", &format_args!("<{} redacted>", self.tokens.len()))
            .field("token_file", &self.token_file)
            .finish()
    }
}

/// Connection limits and timeouts.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum frame payload size in bytes.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Close connections that send no complete frame for this long.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    /// Response write timeout in seconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_seconds: u64,
    /// TLS handshake timeout in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long `stop` waits for in-flight connections.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_write_timeout() -> u64 {
    30
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_max_connections() -> usize {
    256
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            idle_timeout_seconds: default_idle_timeout(),
            write_timeout_seconds: default_write_timeout(),
            handshake_timeout_seconds: default_handshake_timeout(),
            max_connections: default_max_connections(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LimitsConfig {
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits::new(self.max_frame_size)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

impl Settings {
    /// Settings for a plain TCP server on `host:port` with default limits.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            server: ServerConfig {
                host: host.into(),
                port,
            },
            tls: None,
            security: SecurityConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WireError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| WireError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        let settings = Self::from_toml(&content).map_err(|e| WireError::Config {
            message: format!("Failed to load config file '{}': {}", path.display(), e),
        })?;

        Ok(settings)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, WireError> {
        let settings: Settings = toml::from_str(content).map_err(|e| WireError::Config {
            message: e.to_string(),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Address string passed to the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Parsed bind address, when `host` is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.bind_address().parse().ok()
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), WireError> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(WireError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        // Validate log format
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(WireError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if self.server.host.is_empty() {
            return Err(WireError::Config {
                message: "server.host must not be empty".to_string(),
            });
        }

        if self.limits.max_frame_size == 0 {
            return Err(WireError::Config {
                message: "limits.max_frame_size must be greater than zero".to_string(),
            });
        }

        if self.limits.max_connections == 0 {
            return Err(WireError::Config {
                message: "limits.max_connections must be greater than zero".to_string(),
            });
        }

        let timeouts = [
            ("idle_timeout_seconds", self.limits.idle_timeout_seconds),
            ("write_timeout_seconds", self.limits.write_timeout_seconds),
            ("handshake_timeout_seconds", self.limits.handshake_timeout_seconds),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(WireError::Config {
                    message: format!("limits.{} must be greater than zero", name),
                });
            }
        }

        if self.security.tokens.iter().any(|t| t.is_empty()) {
            return Err(WireError::Config {
                message: "security.tokens must not contain empty tokens".to_string(),
            });
        }

        Ok(())
    }
}

/// Connection parameters for [`crate::client::Client`].
#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Token sent when a request does not carry its own.
    pub token: String,
    /// Connect over TLS.
    pub use_ssl: bool,
    /// Verify the server certificate. Only consulted when `use_ssl` is set.
    pub validate_cert: bool,
    /// Extra PEM CA bundle trusted in addition to the webpki roots.
    pub ca_file: Option<PathBuf>,
    /// Default deadline for a response.
    pub timeout: Duration,
    /// Deadline for TCP connect plus TLS handshake.
    pub connect_timeout: Duration,
    /// Largest response frame accepted.
    pub max_frame_size: usize,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            use_ssl: false,
            validate_cert: true,
            ca_file: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Enable TLS with certificate validation.
    pub fn with_tls(mut self) -> Self {
        self.use_ssl = true;
        self
    }

    /// Skip certificate validation (self-signed deployments).
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.validate_cert = false;
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"<redacted>")
            .field("use_ssl", &self.use_ssl)
            .field("validate_cert", &self.validate_cert)
            .field("ca_file", &self.ca_file)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_host(), "127.0.0.1");
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_log_format(), "pretty");
        assert_eq!(default_idle_timeout(), 300);
    }

    #[test]
    fn test_minimal_config() {
        let settings = Settings::from_toml("[server]\nport = 7777\n").unwrap();
        assert_eq!(settings.bind_address(), "127.0.0.1:7777");
        assert!(settings.tls.is_none());
        assert_eq!(settings.limits.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(settings.limits.idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_full_config() {
        let settings = Settings::from_toml(
            r#"
            [server]
            host = "0.0.0.0"
            port = 7777

            [tls]
            cert_file = "/etc/authwire/cert.pem"
            key_file = "/etc/authwire/key.pem"

            [security]
            tokens = ["alpha", "beta"]

            [limits]
            max_frame_size = 4096
            idle_timeout_seconds = 5

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(settings.security.tokens.len(), 2);
        assert_eq!(
            settings.tls.unwrap().cert_file,
            PathBuf::from("/etc/authwire/cert.pem")
        );
        assert_eq!(settings.limits.frame_limits().max_frame_size, 4096);
        assert_eq!(settings.limits.write_timeout_seconds, 30);
    }

    #[test]
    fn test_invalid_log_level() {
        let result = Settings::from_toml("[server]\nport = 1\n[logging]\nlevel = \"loud\"\n");
        assert!(matches!(result, Err(WireError::Config { .. })));
    }

    #[test]
    fn test_zero_frame_size_rejected() {
        let result = Settings::from_toml("[server]\nport = 1\n[limits]\nmax_frame_size = 0\n");
        assert!(matches!(result, Err(WireError::Config { .. })));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        for key in [
            "idle_timeout_seconds",
            "write_timeout_seconds",
            "handshake_timeout_seconds",
        ] {
            let toml = format!("[server]\nport = 1\n[limits]\n{} = 0\n", key);
            match Settings::from_toml(&toml) {
                Err(WireError::Config { message }) => assert!(message.contains(key)),
                other => panic!("{} = 0 should be rejected, got {:?}", key, other.is_ok()),
            }
        }
    }

    #[test]
    fn test_zero_drain_timeout_allowed() {
        let settings =
            Settings::from_toml("[server]\nport = 1\n[limits]\ndrain_timeout_seconds = 0\n")
                .unwrap();
        assert_eq!(settings.limits.drain_timeout_seconds, 0);
    }

    #[test]
    fn test_tls_section_requires_both_files() {
        let result = Settings::from_toml("[server]\nport = 1\n[tls]\ncert_file = \"c.pem\"\n");
        assert!(matches!(result, Err(WireError::Config { .. })));
    }

    #[test]
    fn test_debug_output_redacts_tokens() {
        let mut settings = Settings::new("127.0.0.1", 0);
        settings.security.tokens.push("hunter2".to_string());
        assert!(!format!("{:?}", settings).contains("hunter2"));

        let client = ClientConfig::new("localhost", 1, "hunter2");
        assert!(!format!("{:?}", client).contains("hunter2"));
    }
}
