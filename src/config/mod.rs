//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, duplicate keys rejected by toml)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → SiteConfig handed to each Site at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ErrorPagesConfig, ExtensionPolicy, GeneralConfig, LoggingConfig, MetricsConfig, ServerConfig,
    SiteConfig, TlsConfig, UploadConfig,
};
pub use validation::ValidationError;
