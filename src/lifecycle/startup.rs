//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the Log Sink and the server-wide logger
//! - Load every configured site; a failing site is logged and skipped
//! - Start the metrics exporter when enabled
//! - Serve until a shutdown signal, then terminate the Log Sink
//!
//! # Design Decisions
//! - Config and tracing are initialised by the caller, before this runs
//! - Zero loaded sites is fatal; one broken site is not
//! - Listeners start last (traffic only when ready)

use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigError, LoggingConfig, ServerConfig};
use crate::http::{HttpServer, ServeError};
use crate::lifecycle::signals::spawn_signal_listener;
use crate::lifecycle::Shutdown;
use crate::logging::{LogSink, LogTargets, Logger, SinkConfig};
use crate::observability::metrics;
use crate::site::{Site, SiteRegistry};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no site could be started")]
    NoSites,

    #[error("{failed} of {total} sites failed to load")]
    SitesFailed { failed: usize, total: usize },

    #[error("site loading task failed: {0}")]
    Loader(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Serve(#[from] ServeError),
}

/// Logger writing to the server-wide log directory.
pub fn server_logger(sink: &LogSink, logging: &LoggingConfig) -> Logger {
    Logger::new(
        sink.clone(),
        LogTargets {
            console: logging.console,
            server_dir: logging.directory.clone(),
            site_dir: None,
            rotate_bytes: logging.rotate_bytes,
        },
    )
}

/// Load every site, skipping those that fail. Returns the registry and
/// the number of failures.
pub fn load_sites(
    config: &ServerConfig,
    sink: Option<&LogSink>,
    server_log: Option<&Logger>,
) -> (SiteRegistry, usize) {
    let mut registry = SiteRegistry::new();
    let mut failed = 0;
    for site_config in &config.sites {
        let name = site_config.name.clone();
        match Site::load(site_config.clone(), sink, &config.logging) {
            Ok(site) => registry.insert(site),
            Err(e) => {
                failed += 1;
                tracing::error!(site = %name, error = %e, "Site failed to start");
                if let Some(logger) = server_log {
                    logger.error(format!("site '{name}' failed to start"), Some(&e));
                }
            }
        }
    }
    (registry, failed)
}

/// [`load_sites`] on the blocking pool, so directory walks and handler
/// compiles stay off the async workers.
pub async fn load_sites_blocking(
    config: &ServerConfig,
    sink: &LogSink,
    server_log: &Logger,
) -> Result<(SiteRegistry, usize), StartupError> {
    let config = config.clone();
    let sink = sink.clone();
    let server_log = server_log.clone();
    let loaded =
        tokio::task::spawn_blocking(move || load_sites(&config, Some(&sink), Some(&server_log)))
            .await?;
    Ok(loaded)
}

/// Load and compile every site without serving. Used by `--check`.
pub fn check(config: &ServerConfig) -> Result<usize, StartupError> {
    let (registry, failed) = load_sites(config, None, None);
    if failed > 0 {
        return Err(StartupError::SitesFailed {
            failed,
            total: config.sites.len(),
        });
    }
    Ok(registry.site_count())
}

/// Run the server until SIGINT/SIGTERM.
pub async fn run(config: ServerConfig) -> Result<(), StartupError> {
    let sink = LogSink::start(SinkConfig::from(&config.logging));
    let server_log = server_logger(&sink, &config.logging);
    server_log.info(format!("jscp v{} starting", env!("CARGO_PKG_VERSION")));

    let (registry, failed) = match load_sites_blocking(&config, &sink, &server_log).await {
        Ok(loaded) => loaded,
        Err(e) => {
            server_log.error("site loading aborted", Some(&e));
            sink.terminate().await;
            return Err(e);
        }
    };
    if registry.is_empty() {
        server_log.error("no site could be started", None);
        sink.terminate().await;
        return Err(StartupError::NoSites);
    }
    tracing::info!(
        sites = registry.site_count(),
        failed,
        ports = registry.ports().count(),
        "Sites loaded"
    );

    if config.metrics.enabled {
        match config.metrics.address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.metrics.address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let signals = spawn_signal_listener(shutdown.clone());
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let server = HttpServer::new(registry, config.server.temp_dir.clone(), Some(server_log.clone()));

    let result = server.run(&shutdown, grace).await;
    signals.abort();

    match &result {
        Ok(()) => server_log.info("jscp stopped"),
        Err(e) => server_log.error("jscp failed to serve", Some(e)),
    }
    sink.terminate().await;
    result.map_err(StartupError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;

    fn two_site_config(good: &std::path::Path, bad: &std::path::Path) -> ServerConfig {
        std::fs::write(good.join("index.jscp"), "ok").unwrap();
        std::fs::write(bad.join("broken.jscp"), "<? if true { ?>").unwrap();
        ServerConfig {
            sites: vec![
                SiteConfig {
                    name: "good".into(),
                    host: "good.test".into(),
                    root: good.to_path_buf(),
                    ..Default::default()
                },
                SiteConfig {
                    name: "bad".into(),
                    host: "bad.test".into(),
                    root: bad.to_path_buf(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_failed_site_is_skipped() {
        let good = tempfile::tempdir().unwrap();
        let bad = tempfile::tempdir().unwrap();
        let config = two_site_config(good.path(), bad.path());

        let (registry, failed) = load_sites(&config, None, None);
        assert_eq!(failed, 1);
        assert_eq!(registry.site_count(), 1);
        assert!(registry.resolve(8080, "good.test").is_some());
        assert!(matches!(
            check(&config),
            Err(StartupError::SitesFailed { failed: 1, total: 2 })
        ));
    }

    #[tokio::test]
    async fn test_sites_load_on_blocking_pool() {
        let good = tempfile::tempdir().unwrap();
        let bad = tempfile::tempdir().unwrap();
        let config = two_site_config(good.path(), bad.path());

        let logging = LoggingConfig {
            console: false,
            ..Default::default()
        };
        let sink = LogSink::start(SinkConfig::from(&logging));
        let server_log = server_logger(&sink, &logging);

        let (registry, failed) = load_sites_blocking(&config, &sink, &server_log)
            .await
            .unwrap();
        assert_eq!(failed, 1);
        assert!(registry.resolve(8080, "good.test").is_some());
        sink.terminate().await;
    }
}
