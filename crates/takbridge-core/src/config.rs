//! Configuration management for the takbridge CoT/GraphQL bridge.
//!
//! Configuration is loaded with the `config` crate from a TOML (or YAML) file
//! and then merged with `TAKBRIDGE__*` environment variables, which is how
//! secrets such as the Catalyst token or certificate paths are injected in
//! deployment:
//!
//! ```text
//! TAKBRIDGE__TAK__KEY_FILE=/run/secrets/tak.key
//! TAKBRIDGE__CONSUMER__CATALYST_TOKEN=...
//! ```

use crate::error::{ConfigError, Result};
use crate::types::{ChatRuleSet, RuleSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "TAKBRIDGE";

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use takbridge_core::config::AppConfig;
///
/// let config = AppConfig::from_file("config.toml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Development mode; disables bearer token verification
    #[serde(default)]
    pub dev: bool,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// TAK server connection
    #[serde(default)]
    pub tak: TakConfig,

    /// Catalyst polling role
    #[serde(default)]
    pub consumer: Option<ConsumerConfig>,

    /// CoT persistence and query role
    #[serde(default)]
    pub producer: Option<ProducerConfig>,
}

impl AppConfig {
    /// Loads configuration from a file, format inferred from its extension,
    /// with environment variable overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or cannot be parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration from a TOML string, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .map_err(|e| ConfigError::InvalidFormat {
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Returns the consumer section when present and enabled.
    pub fn consumer(&self) -> Option<&ConsumerConfig> {
        self.consumer.as_ref().filter(|c| c.enabled)
    }

    /// Returns the producer section when present and enabled.
    pub fn producer(&self) -> Option<&ProducerConfig> {
        self.producer.as_ref().filter(|p| p.enabled)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TAK section is incomplete, an enabled role is
    /// missing a required setting, or no role is enabled at all.
    pub fn validate(&self) -> Result<()> {
        self.logging.parse_level()?;
        self.tak.validate()?;

        if let Some(consumer) = self.consumer() {
            consumer.validate()?;
        }

        if let Some(producer) = self.producer() {
            if !self.dev {
                producer.validate_auth()?;
            }
        }

        if self.consumer().is_none() && self.producer().is_none() {
            return Err(ConfigError::NoRoleEnabled.into());
        }

        Ok(())
    }
}

/// TAK server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakConfig {
    /// Identifier announced to the server; contact connections append their callsign
    #[serde(default = "default_connection_id")]
    pub connection_id: String,

    /// `ssl://host:port`, `tls://host:port` or `host:port`
    #[serde(default)]
    pub endpoint: String,

    /// PEM private key for the client certificate
    #[serde(default)]
    pub key_file: PathBuf,

    /// PEM client certificate
    #[serde(default)]
    pub cert_file: PathBuf,

    /// Optional PEM CA bundle for verifying the server
    #[serde(default)]
    pub ca_file: Option<PathBuf>,

    /// Verify the server certificate chain
    #[serde(default = "default_true")]
    pub verify_server: bool,

    /// Callsign of the adapter itself
    #[serde(default = "default_callsign")]
    pub callsign: String,

    /// Adapter position used for heartbeats and chat messages
    #[serde(default = "default_catalyst_lat")]
    pub catalyst_lat: f64,

    #[serde(default = "default_catalyst_lon")]
    pub catalyst_lon: f64,

    #[serde(default = "default_group")]
    pub group: String,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_heartbeat_stale_ms")]
    pub heartbeat_stale_ms: u64,

    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Optional video feed advertised in the heartbeat
    #[serde(default)]
    pub video: VideoConfig,
}

fn default_true() -> bool {
    true
}

fn default_connection_id() -> String {
    "ConnectionID".to_string()
}

fn default_callsign() -> String {
    "CATALYST-TAK-ADAPTER".to_string()
}

fn default_catalyst_lat() -> f64 {
    -64.0107
}

fn default_catalyst_lon() -> f64 {
    -59.452
}

fn default_group() -> String {
    "Cyan".to_string()
}

fn default_role() -> String {
    "Team Member".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_heartbeat_stale_ms() -> u64 {
    5 * 60 * 1000
}

fn default_keepalive_interval_ms() -> u64 {
    15_000
}

fn default_read_timeout_ms() -> u64 {
    120_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

impl Default for TakConfig {
    fn default() -> Self {
        Self {
            connection_id: default_connection_id(),
            endpoint: String::new(),
            key_file: PathBuf::new(),
            cert_file: PathBuf::new(),
            ca_file: None,
            verify_server: true,
            callsign: default_callsign(),
            catalyst_lat: default_catalyst_lat(),
            catalyst_lon: default_catalyst_lon(),
            group: default_group(),
            role: default_role(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_stale_ms: default_heartbeat_stale_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            video: VideoConfig::default(),
        }
    }
}

impl TakConfig {
    /// Splits the endpoint into host and port.
    pub fn endpoint_addr(&self) -> Result<(String, u16)> {
        parse_endpoint(&self.endpoint)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_stale(&self) -> Duration {
        Duration::from_millis(self.heartbeat_stale_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(ConfigError::missing_field("tak.endpoint").into());
        }
        self.endpoint_addr()?;

        if self.key_file.as_os_str().is_empty() {
            return Err(ConfigError::missing_field("tak.key_file").into());
        }
        if self.cert_file.as_os_str().is_empty() {
            return Err(ConfigError::missing_field("tak.cert_file").into());
        }
        if self.callsign.is_empty() {
            return Err(ConfigError::missing_field("tak.callsign").into());
        }
        if self.reconnect_base_ms == 0 || self.reconnect_max_ms < self.reconnect_base_ms {
            return Err(ConfigError::invalid_value(
                "tak.reconnect_max_ms",
                "must be at least reconnect_base_ms, which must be non-zero",
            )
            .into());
        }

        Ok(())
    }
}

/// Parses `ssl://host:port`, `tls://host:port` or `host:port`.
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let invalid = |reason: &str| ConfigError::invalid_value("tak.endpoint", reason);

    let rest = match endpoint.split_once("://") {
        Some(("ssl" | "tls", rest)) => rest,
        Some((scheme, _)) => {
            return Err(invalid(&format!("unsupported scheme '{}'", scheme)).into());
        }
        None => endpoint,
    };
    let rest = rest.trim_end_matches('/');

    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid("host is empty").into());
    }
    let port: u16 = port
        .parse()
        .map_err(|_| invalid(&format!("invalid port '{}'", port)))?;

    Ok((host.to_string(), port))
}

/// Video feed advertised in the adapter heartbeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default)]
    pub rtsp: Option<RtspConfig>,
}

impl VideoConfig {
    /// Returns the RTSP feed when configured and enabled.
    pub fn rtsp(&self) -> Option<&RtspConfig> {
        self.rtsp.as_ref().filter(|r| r.enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtspConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rtsp_server")]
    pub rtsp_server: String,

    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,

    #[serde(default = "default_rtsp_path")]
    pub rtsp_path: String,
}

fn default_rtsp_server() -> String {
    "192.168.1.101".to_string()
}

fn default_rtsp_port() -> u16 {
    7428
}

fn default_rtsp_path() -> String {
    "/stream".to_string()
}

/// Catalyst polling role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_catalyst_endpoint")]
    pub catalyst_endpoint: String,

    /// Bearer token for the Catalyst gateway
    #[serde(default)]
    pub catalyst_token: String,

    #[serde(default)]
    pub catalyst_query: String,

    #[serde(default = "default_query_variables")]
    pub catalyst_query_variables: serde_json::Value,

    #[serde(default = "default_poll_interval_ms")]
    pub catalyst_query_poll_interval_ms: u64,

    /// Directory holding the chat dedup ledger
    #[serde(default = "default_consumer_db_path")]
    pub local_db_path: PathBuf,

    #[serde(default)]
    pub parser: RuleSet,

    #[serde(default)]
    pub chat: ChatRuleSet,
}

fn default_catalyst_endpoint() -> String {
    "https://gateway.catalyst.devintelops.io/graphql".to_string()
}

fn default_query_variables() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_consumer_db_path() -> PathBuf {
    PathBuf::from("./db/consumer")
}

impl ConsumerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.catalyst_query_poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.catalyst_token.is_empty() {
            return Err(ConfigError::missing_field("consumer.catalyst_token").into());
        }
        if self.catalyst_endpoint.is_empty() {
            return Err(ConfigError::missing_field("consumer.catalyst_endpoint").into());
        }
        if self.catalyst_query_poll_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "consumer.catalyst_query_poll_interval_ms",
                "must be greater than zero",
            )
            .into());
        }
        if !self.catalyst_query_variables.is_object() {
            return Err(ConfigError::invalid_value(
                "consumer.catalyst_query_variables",
                "must be a table",
            )
            .into());
        }
        Ok(())
    }
}

/// CoT persistence and query role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub catalyst_jwks_url: Option<String>,

    #[serde(default)]
    pub catalyst_jwt_issuer: Option<String>,

    #[serde(default)]
    pub catalyst_app_id: Option<String>,

    /// Directory holding the CoT store
    #[serde(default = "default_producer_db_path")]
    pub local_db_path: PathBuf,

    /// Directory receiving file-share artifacts
    #[serde(default = "default_download_path")]
    pub local_download_path: PathBuf,

    #[serde(default = "default_graphql_host")]
    pub graphql_host: String,

    #[serde(default = "default_graphql_port")]
    pub graphql_port: u16,

    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,

    #[serde(default = "default_stale_grace_ms")]
    pub stale_grace_ms: u64,
}

fn default_producer_db_path() -> PathBuf {
    PathBuf::from("./db/producer")
}

fn default_download_path() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_graphql_host() -> String {
    "0.0.0.0".to_string()
}

fn default_graphql_port() -> u16 {
    4000
}

fn default_eviction_interval_ms() -> u64 {
    60_000
}

fn default_stale_grace_ms() -> u64 {
    60_000
}

impl ProducerConfig {
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_millis(self.stale_grace_ms)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.graphql_host, self.graphql_port)
    }

    fn validate_auth(&self) -> Result<()> {
        let required = [
            ("producer.catalyst_jwks_url", &self.catalyst_jwks_url),
            ("producer.catalyst_jwt_issuer", &self.catalyst_jwt_issuer),
            ("producer.catalyst_app_id", &self.catalyst_app_id),
        ];
        for (field, value) in required {
            if value.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::missing_field(field).into());
            }
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use std::io::Write;

    const FULL: &str = r#"
dev = false

[logging]
level = "debug"
format = "json"

[tak]
connection_id = "bridge-1"
endpoint = "ssl://tak.example.com:8089"
key_file = "certs/client.key"
cert_file = "certs/client.pem"
callsign = "ADAPTER"

[tak.video.rtsp]
rtsp_server = "10.0.0.5"

[consumer]
catalyst_token = "secret"
catalyst_query = "query { planes { id lat lon } }"
catalyst_query_poll_interval_ms = 5000

[consumer.catalyst_query_variables]
limit = 10

[consumer.parser.planes]
transform = { uid = "id", lat = "lat", lon = "lon", callsign = "tail" }
overwrite = { type = "a-n-A" }

[consumer.chat.alerts]
message_id = "alert.id"
message_template = "{kind} at {place}"
message_vars = { kind = "alert.kind", place = "alert.place" }

[producer]
catalyst_jwks_url = "https://auth.example.com/.well-known/jwks.json"
catalyst_jwt_issuer = "https://auth.example.com"
catalyst_app_id = "app-123"
graphql_port = 4100
"#;

    fn minimal_tak() -> &'static str {
        r#"
[tak]
endpoint = "ssl://tak.example.com:8089"
key_file = "client.key"
cert_file = "client.pem"
"#
    }

    #[test]
    fn test_full_config_from_toml() {
        let config = AppConfig::from_toml_str(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.tak.connection_id, "bridge-1");
        assert_eq!(
            config.tak.endpoint_addr().unwrap(),
            ("tak.example.com".to_string(), 8089)
        );

        let rtsp = config.tak.video.rtsp().unwrap();
        assert_eq!(rtsp.rtsp_server, "10.0.0.5");
        assert_eq!(rtsp.rtsp_port, 7428);
        assert_eq!(rtsp.rtsp_path, "/stream");

        let consumer = config.consumer().unwrap();
        assert_eq!(consumer.poll_interval(), Duration::from_secs(5));
        assert_eq!(consumer.catalyst_query_variables["limit"], 10);
        let planes = &consumer.parser["planes"];
        assert_eq!(planes.transform.callsign.as_deref(), Some("tail"));
        assert_eq!(
            planes.overwrite.as_ref().unwrap().cot_type.as_deref(),
            Some("a-n-A")
        );
        assert_eq!(consumer.chat["alerts"].recipient, "All Chat Rooms");

        let producer = config.producer().unwrap();
        assert_eq!(producer.bind_addr(), "0.0.0.0:4100");
        assert_eq!(producer.stale_grace(), Duration::from_secs(60));
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str(minimal_tak()).unwrap();
        assert!(!config.dev);
        assert_eq!(config.tak.connection_id, "ConnectionID");
        assert_eq!(config.tak.callsign, "CATALYST-TAK-ADAPTER");
        assert_eq!(config.tak.catalyst_lat, -64.0107);
        assert_eq!(config.tak.catalyst_lon, -59.452);
        assert_eq!(config.tak.group, "Cyan");
        assert_eq!(config.tak.role, "Team Member");
        assert_eq!(config.tak.reconnect_base(), Duration::from_secs(1));
        assert_eq!(config.tak.reconnect_max(), Duration::from_secs(30));
        assert!(config.tak.video.rtsp().is_none());
    }

    #[test]
    fn test_no_role_enabled_is_rejected() {
        let config = AppConfig::from_toml_str(minimal_tak()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Config(ConfigError::NoRoleEnabled)
        ));

        let disabled = format!("{}\n[consumer]\nenabled = false\ncatalyst_token = \"t\"\n", minimal_tak());
        let config = AppConfig::from_toml_str(&disabled).unwrap();
        assert!(config.consumer().is_none());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_producer_requires_jwks_unless_dev() {
        let toml = format!("{}\n[producer]\nenabled = true\n", minimal_tak());
        let config = AppConfig::from_toml_str(&toml).unwrap();
        assert!(config.validate().is_err());

        let toml = format!("dev = true\n{}\n[producer]\nenabled = true\n", minimal_tak());
        let config = AppConfig::from_toml_str(&toml).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_consumer_requires_token() {
        let toml = format!("{}\n[consumer]\ncatalyst_query = \"q\"\n", minimal_tak());
        let config = AppConfig::from_toml_str(&toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("consumer.catalyst_token"));
    }

    #[test]
    fn test_parse_endpoint() {
        assert_eq!(
            parse_endpoint("ssl://tak.example.com:8089").unwrap(),
            ("tak.example.com".to_string(), 8089)
        );
        assert_eq!(
            parse_endpoint("tls://10.0.0.1:8089/").unwrap(),
            ("10.0.0.1".to_string(), 8089)
        );
        assert_eq!(
            parse_endpoint("[::1]:8089").unwrap(),
            ("::1".to_string(), 8089)
        );
        assert!(parse_endpoint("http://tak.example.com:8089").is_err());
        assert!(parse_endpoint("tak.example.com").is_err());
        assert!(parse_endpoint("ssl://:8089").is_err());
        assert!(parse_endpoint("ssl://host:notaport").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tak.callsign, "ADAPTER");

        let err = AppConfig::from_file("/nonexistent/takbridge.toml").unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_log_level() {
        let toml = format!("[logging]\nlevel = \"loud\"\n{}", minimal_tak());
        let config = AppConfig::from_toml_str(&toml).unwrap();
        assert!(config.validate().is_err());
    }
}
