//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that sites do not collide on (host, port)
//! - Validate value ranges (ports, queue sizes, suffix limits)
//! - Detect ports where plain and TLS sites are mixed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no sites configured")]
    NoSites,

    #[error("site #{index}: {field} must not be empty")]
    EmptyField { index: usize, field: &'static str },

    #[error("site '{site}': port must be non-zero")]
    ZeroPort { site: String },

    #[error("site name '{0}' is used more than once")]
    DuplicateName(String),

    #[error("host '{host}' is configured twice on port {port}")]
    DuplicateHost { host: String, port: u16 },

    #[error("port {0} mixes TLS and plain sites")]
    MixedTls(u16),

    #[error("site '{site}': error page '{path}' must start with '/'")]
    ErrorPagePath { site: String, path: String },

    #[error("logging.{field} must be at least 1")]
    LoggingRange { field: &'static str },
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.logging.max_suffix < 1 {
        errors.push(ValidationError::LoggingRange { field: "max_suffix" });
    }
    if config.logging.queue_capacity < 1 {
        errors.push(ValidationError::LoggingRange { field: "queue_capacity" });
    }
    if config.logging.compression_concurrency < 1 {
        errors.push(ValidationError::LoggingRange { field: "compression_concurrency" });
    }

    if config.sites.is_empty() {
        errors.push(ValidationError::NoSites);
    }

    let mut names = HashSet::new();
    let mut hosts = HashSet::new();
    let mut tls_by_port: HashMap<u16, bool> = HashMap::new();

    for (index, site) in config.sites.iter().enumerate() {
        if site.name.trim().is_empty() {
            errors.push(ValidationError::EmptyField { index, field: "name" });
        } else if !names.insert(site.name.clone()) {
            errors.push(ValidationError::DuplicateName(site.name.clone()));
        }
        if site.host.trim().is_empty() {
            errors.push(ValidationError::EmptyField { index, field: "host" });
        }
        if site.root.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyField { index, field: "root" });
        }
        if site.port == 0 {
            errors.push(ValidationError::ZeroPort { site: site.name.clone() });
        }

        let host = site.host.to_lowercase();
        if !hosts.insert((host.clone(), site.port)) {
            errors.push(ValidationError::DuplicateHost { host, port: site.port });
        }

        let secure = site.tls.is_some();
        match tls_by_port.get(&site.port) {
            Some(existing) if *existing != secure => {
                errors.push(ValidationError::MixedTls(site.port));
            }
            Some(_) => {}
            None => {
                tls_by_port.insert(site.port, secure);
            }
        }

        for path in [&site.error_pages.client, &site.error_pages.server].into_iter().flatten() {
            if !path.starts_with('/') {
                errors.push(ValidationError::ErrorPagePath {
                    site: site.name.clone(),
                    path: path.clone(),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{SiteConfig, TlsConfig};

    fn site(name: &str, host: &str, port: u16) -> SiteConfig {
        SiteConfig {
            name: name.into(),
            host: host.into(),
            port,
            ..SiteConfig::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let mut config = ServerConfig::default();
        config.sites.push(site("a", "a.test", 8080));
        config.sites.push(site("b", "b.test", 8080));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_reports_all_errors() {
        let mut config = ServerConfig::default();
        config.logging.max_suffix = 0;
        config.sites.push(site("a", "Shared.test", 8080));
        config.sites.push(site("a", "shared.test", 8080));
        let mut secure = site("c", "c.test", 8080);
        secure.tls = Some(TlsConfig {
            cert_path: "cert.pem".into(),
            key_path: "key.pem".into(),
        });
        secure.error_pages.client = Some("errors/4xx.jscp".into());
        config.sites.push(secure);

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::LoggingRange { field: "max_suffix" }));
        assert!(errors.contains(&ValidationError::DuplicateName("a".into())));
        assert!(errors.contains(&ValidationError::DuplicateHost {
            host: "shared.test".into(),
            port: 8080
        }));
        assert!(errors.contains(&ValidationError::MixedTls(8080)));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn test_no_sites() {
        let errors = validate_config(&ServerConfig::default()).unwrap_err();
        assert_eq!(errors, vec![ValidationError::NoSites]);
    }
}
