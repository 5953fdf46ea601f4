//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the application server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Process-wide settings (staging directories, shutdown).
    pub server: GeneralConfig,

    /// Log Sink and console logging settings.
    pub logging: LoggingConfig,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// Virtual hosts served by this process.
    pub sites: Vec<SiteConfig>,
}

/// Process-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory where multipart uploads are staged while they stream in.
    pub temp_dir: PathBuf,

    /// Time allowed for in-flight requests when shutting down.
    pub shutdown_grace_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("jscp"),
            shutdown_grace_secs: 10,
        }
    }
}

/// Log Sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level for the console subscriber (trace, debug, info, warn, error).
    pub level: String,

    /// Echo log messages to the console.
    pub console: bool,

    /// Server-wide log directory.
    pub directory: Option<PathBuf>,

    /// Size in bytes after which the current hour's file rolls to the next suffix.
    /// Zero disables size rotation.
    pub rotate_bytes: u64,

    /// Highest numeric suffix probed before giving up on a directory.
    pub max_suffix: u32,

    /// Maximum number of queued log messages.
    pub queue_capacity: usize,

    /// Minimum interval between two queue overflow warnings.
    pub overflow_warning_secs: u64,

    /// Simultaneous compression jobs per directory.
    pub compression_concurrency: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            directory: None,
            rotate_bytes: 10 * 1024 * 1024,
            max_suffix: 10,
            queue_capacity: 100_000,
            overflow_warning_secs: 5,
            compression_concurrency: 4,
        }
    }
}

/// Metrics exporter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus endpoint.
    pub enabled: bool,

    /// Metrics endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Whether handler URLs carry the `.jscp` extension.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionPolicy {
    /// Handler URLs must not name the extension.
    Never,
    /// Either form is accepted.
    #[default]
    Optional,
    /// Every URL must carry an explicit extension.
    Always,
}

/// One virtual host.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Site identifier for logging/metrics.
    pub name: String,

    /// Host header to match (case-insensitive, port stripped).
    pub host: String,

    /// Listening port, possibly shared with other sites.
    pub port: u16,

    /// Document root holding handlers and static files.
    pub root: PathBuf,

    pub extension_policy: ExtensionPolicy,

    /// Request timeout in seconds; zero disables it.
    pub timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_bytes: u64,

    /// Advertise the server name in a response header.
    pub server_header: bool,

    /// Site-specific log directory.
    pub log_directory: Option<PathBuf>,

    /// Static files up to this size are kept in memory.
    pub static_cache_bytes: u64,

    /// Optional TLS configuration for this site's port.
    pub tls: Option<TlsConfig>,

    pub uploads: UploadConfig,

    pub error_pages: ErrorPagesConfig,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "localhost".to_string(),
            port: 8080,
            root: PathBuf::from("."),
            extension_policy: ExtensionPolicy::Optional,
            timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            server_header: true,
            log_directory: None,
            static_cache_bytes: 256 * 1024,
            tls: None,
            uploads: UploadConfig::default(),
            error_pages: ErrorPagesConfig::default(),
        }
    }
}

/// TLS configuration for a listening port.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Multipart upload policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Accept multipart bodies at all.
    pub enabled: bool,

    /// Maximum size of a single uploaded file.
    pub max_file_bytes: u64,

    /// Site temp-work directory that accepted uploads are moved into.
    pub work_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_file_bytes: 10 * 1024 * 1024,
            work_dir: None,
        }
    }
}

/// Custom error pages, as site-relative URL paths.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ErrorPagesConfig {
    /// Page rendered for 4xx responses.
    pub client: Option<String>,

    /// Page rendered for 5xx responses.
    pub server: Option<String>,
}

impl SiteConfig {
    /// Timeout as a duration, `None` when disabled.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_secs > 0).then(|| std::time::Duration::from_secs(self.timeout_secs))
    }

    /// Directory accepted uploads are relocated into.
    pub fn upload_work_dir(&self) -> PathBuf {
        self.uploads
            .work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("jscp").join(&self.name))
    }
}
