//! Sites: one configured virtual host each.
//!
//! # Data Flow
//! ```text
//! SiteConfig
//!     → Site::load
//!         → handlers.rs (walk root, compile every .jscp)
//!         → static_files.rs (cache small assets)
//!     → registry.rs (port → host → Site)
//!     → http::dispatcher resolves a Site per request
//! ```
//!
//! # Design Decisions
//! - A site that fails to load is skipped; the others still start
//! - Handler sources are never served as static content
//! - Each request gets a `RequestEnv` built from its site

pub mod error_pages;
pub mod handlers;
pub mod registry;
pub mod static_files;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::config::{LoggingConfig, SiteConfig};
use crate::coordinator::RequestEnv;
use crate::logging::{LogSink, LogTargets, Logger};
use crate::runtime::FileScope;
use crate::template::CompileError;

pub use error_pages::{wants_error_page, ErrorClass, ErrorPage};
pub use handlers::HandlerTable;
pub use registry::SiteRegistry;
pub use static_files::{StaticAsset, StaticFiles};

#[derive(Debug, Error)]
pub enum SiteLoadError {
    #[error("site root {0} is not a directory")]
    MissingRoot(PathBuf),

    #[error("failed to scan site root: {0}")]
    Scan(String),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// A loaded site.
#[derive(Debug)]
pub struct Site {
    config: SiteConfig,
    handlers: HandlerTable,
    statics: StaticFiles,
    files: FileScope,
    logger: Option<Logger>,
}

impl Site {
    /// Compile handlers and warm the static cache. Blocking; call at
    /// startup or from `spawn_blocking`.
    pub fn load(config: SiteConfig, sink: Option<&LogSink>, logging: &LoggingConfig) -> Result<Self, SiteLoadError> {
        if !config.root.is_dir() {
            return Err(SiteLoadError::MissingRoot(config.root.clone()));
        }

        let work_dir = config.upload_work_dir();
        if config.uploads.enabled {
            std::fs::create_dir_all(&work_dir).map_err(|source| SiteLoadError::Io {
                path: work_dir.clone(),
                source,
            })?;
        }

        let handlers = HandlerTable::load(&config.root)?;
        let statics = StaticFiles::new(&config.root, config.static_cache_bytes);
        let cached = statics.preload();

        let logger = sink.map(|sink| {
            Logger::new(
                sink.clone(),
                LogTargets {
                    console: logging.console,
                    server_dir: None,
                    site_dir: config
                        .log_directory
                        .clone()
                        .or_else(|| logging.directory.clone()),
                    rotate_bytes: logging.rotate_bytes,
                },
            )
        });

        tracing::info!(
            site = %config.name,
            host = %config.host,
            port = config.port,
            handlers = handlers.len(),
            cached_assets = cached,
            "Site loaded"
        );

        Ok(Self {
            files: FileScope::new(&config.root),
            config,
            handlers,
            statics,
            logger,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn statics(&self) -> &StaticFiles {
        &self.statics
    }

    pub fn logger(&self) -> Option<&Logger> {
        self.logger.as_ref()
    }

    pub fn work_dir(&self) -> PathBuf {
        self.config.upload_work_dir()
    }

    pub fn request_env(&self, handler_name: &str) -> Arc<RequestEnv> {
        let env = RequestEnv::new(handler_name, self.files.clone());
        Arc::new(match &self.logger {
            Some(logger) => env.with_logger(logger.clone()),
            None => env,
        })
    }
}
