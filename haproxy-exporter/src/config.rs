//! Configuration for the HAProxy exporter.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::collector::Exporter;
use crate::fields::FieldRegistry;
use crate::parser::CsvLayout;
use crate::transport::ScrapeTarget;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Routes the HTTP server always serves.
const RESERVED_PATHS: &[&str] = &["/", "/health", "/ready"];

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Metrics endpoint settings.
    #[serde(default)]
    pub web: WebConfig,

    /// Scrape target settings.
    #[serde(default)]
    pub haproxy: HaproxyConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metrics HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Address to listen on (default: "0.0.0.0:9101").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9101".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl WebConfig {
    /// Socket address to bind. A bare `:<port>` listens on every interface.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let listen = match self.listen.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.listen.clone(),
        };
        listen.parse().map_err(|_| {
            ConfigError::Validation(format!("Invalid listen address: {}", self.listen))
        })
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// HAProxy scrape configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaproxyConfig {
    /// URI of the CSV stats: `http(s)://`, `file://` or `unix:`.
    #[serde(default = "default_scrape_uri")]
    pub scrape_uri: String,

    /// Verify the server certificate for `https://` targets.
    #[serde(default = "default_ssl_verify")]
    pub ssl_verify: bool,

    /// Deadline for one fetch, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Comma separated server columns to export (default: all of them).
    #[serde(default)]
    pub server_metric_fields: Option<String>,

    /// Metric name prefix (default: "haproxy").
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Column positions of the stats rows.
    #[serde(default)]
    pub layout: CsvLayout,
}

fn default_scrape_uri() -> String {
    "http://localhost/;csv".to_string()
}

fn default_ssl_verify() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_namespace() -> String {
    "haproxy".to_string()
}

impl Default for HaproxyConfig {
    fn default() -> Self {
        Self {
            scrape_uri: default_scrape_uri(),
            ssl_verify: default_ssl_verify(),
            timeout_ms: default_timeout_ms(),
            server_metric_fields: None,
            namespace: default_namespace(),
            layout: CsvLayout::default(),
        }
    }
}

impl HaproxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the exporter described by this section.
    ///
    /// Fails on an unsupported scrape URI or a malformed field list.
    pub fn build_exporter(&self) -> crate::Result<Exporter> {
        let fields = Arc::new(FieldRegistry::new(self.namespace.clone()));
        let server_metrics = match &self.server_metric_fields {
            Some(filter) => fields.select_server_metrics(filter)?,
            None => fields.all_server_metrics(),
        };
        let target = ScrapeTarget::new(self.scrape_uri.clone(), self.ssl_verify, self.timeout())?;

        Ok(Exporter::new(target, fields, server_metrics)?.with_layout(self.layout))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.web.listen_addr()?;

        if !self.web.path.starts_with('/') {
            return Err(ConfigError::Validation("Metrics path must start with /".to_string()));
        }

        if RESERVED_PATHS.contains(&self.web.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is already served",
                self.web.path
            )));
        }

        if self.haproxy.timeout_ms == 0 {
            return Err(ConfigError::Validation("timeout_ms must be > 0".to_string()));
        }

        if !is_valid_namespace(&self.haproxy.namespace) {
            return Err(ConfigError::Validation(format!(
                "Invalid metric namespace: {:?}",
                self.haproxy.namespace
            )));
        }

        let layout = &self.haproxy.layout;
        let max_column = layout
            .pxname_field
            .max(layout.svname_field)
            .max(layout.type_field);
        if max_column >= layout.min_field_count {
            return Err(ConfigError::Validation(format!(
                "min_field_count ({}) must exceed every identifying column (max {})",
                layout.min_field_count, max_column
            )));
        }

        Ok(())
    }
}

/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn is_valid_namespace(namespace: &str) -> bool {
    let mut chars = namespace.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Parse a timeout such as `500ms`, `5s` or `1m`. A bare number is seconds.
pub fn parse_timeout(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else {
        (s, "s")
    };

    let num: u64 = num_str.trim().parse().ok()?;
    let duration = match unit {
        "ms" => Duration::from_millis(num),
        "m" => Duration::from_secs(num.checked_mul(60)?),
        _ => Duration::from_secs(num),
    };

    (!duration.is_zero()).then_some(duration)
}
