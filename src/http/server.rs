//! HTTP server setup.
//!
//! # Responsibilities
//! - One axum Router per listening port, every path falling back to the dispatcher
//! - Wire up middleware (tracing, request ID)
//! - Bind plain ports with `axum::serve`, TLS ports with `axum-server`
//! - Graceful shutdown: stop accepting, drain in-flight requests within the grace period

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use axum_server::Handle;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::http::dispatcher::dispatch;
use crate::http::inflight::RequestTracker;
use crate::lifecycle::Shutdown;
use crate::logging::Logger;
use crate::net::tls::load_tls_config;
use crate::site::registry::PortSites;
use crate::site::SiteRegistry;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to load TLS certificate for port {port}: {source}")]
    Tls {
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// State shared by every request on one port.
#[derive(Debug)]
pub struct PortState {
    pub port: u16,
    pub sites: Arc<PortSites>,
    /// Multipart staging directory.
    pub temp_dir: PathBuf,
    /// Server-wide log, for faults not attributable to a site.
    pub server_logger: Option<Logger>,
    pub inflight: RequestTracker,
}

pub struct HttpServer {
    registry: Arc<SiteRegistry>,
    temp_dir: PathBuf,
    server_logger: Option<Logger>,
    inflight: RequestTracker,
}

impl HttpServer {
    pub fn new(registry: SiteRegistry, temp_dir: PathBuf, server_logger: Option<Logger>) -> Self {
        Self {
            registry: Arc::new(registry),
            temp_dir,
            server_logger,
            inflight: RequestTracker::new(),
        }
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub fn inflight(&self) -> &RequestTracker {
        &self.inflight
    }

    /// Router for `port`, or `None` when no site listens there.
    pub fn router(&self, port: u16) -> Option<Router> {
        let sites = self.registry.port(port)?;
        let state = Arc::new(PortState {
            port,
            sites,
            temp_dir: self.temp_dir.clone(),
            server_logger: self.server_logger.clone(),
            inflight: self.inflight.clone(),
        });
        Some(build_router(state))
    }

    /// Serve every configured port until `shutdown` fires, then drain.
    pub async fn run(self, shutdown: &Shutdown, grace: Duration) -> Result<(), ServeError> {
        let mut stop = shutdown.subscribe();
        let mut servers: JoinSet<(u16, io::Result<()>)> = JoinSet::new();
        let mut tls_handles = Vec::new();

        for (port, sites) in self.registry.ports() {
            let Some(router) = self.router(port) else {
                continue;
            };
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let app = router.into_make_service_with_connect_info::<SocketAddr>();

            if let Some(tls) = sites.tls() {
                let config = load_tls_config(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(|source| ServeError::Tls { port, source })?;
                let handle = Handle::new();
                tls_handles.push(handle.clone());
                tracing::info!(address = %addr, tls = true, "HTTP server starting");
                servers.spawn(async move {
                    let result = axum_server::bind_rustls(addr, config)
                        .handle(handle)
                        .serve(app)
                        .await;
                    (port, result)
                });
            } else {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|source| ServeError::Bind { port, source })?;
                tracing::info!(address = %addr, tls = false, "HTTP server starting");
                let mut port_stop = shutdown.subscribe();
                servers.spawn(async move {
                    let result = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = port_stop.recv().await;
                        })
                        .await;
                    (port, result)
                });
            }
        }

        loop {
            tokio::select! {
                _ = stop.recv() => break,
                joined = servers.join_next() => match joined {
                    Some(Ok((port, Err(e)))) => {
                        tracing::error!(port, error = %e, "HTTP server stopped unexpectedly");
                    }
                    Some(Ok((port, Ok(())))) => tracing::info!(port, "HTTP server stopped"),
                    Some(Err(e)) => tracing::error!(error = %e, "HTTP server task failed"),
                    None => return Ok(()),
                },
            }
        }

        tracing::info!(in_flight = self.inflight.active_count(), "Shutdown signal received");
        for handle in &tls_handles {
            handle.graceful_shutdown(Some(grace));
        }
        if !self.inflight.drain(grace).await {
            tracing::warn!(
                in_flight = self.inflight.active_count(),
                "Grace period elapsed with requests still in flight"
            );
        }

        let wait = async {
            while let Some(joined) = servers.join_next().await {
                if let Ok((port, _)) = joined {
                    tracing::info!(port, "HTTP server stopped");
                }
            }
        };
        if tokio::time::timeout(grace, wait).await.is_err() {
            servers.abort_all();
            tracing::warn!("Forcing remaining connections closed");
        }
        Ok(())
    }
}

fn build_router(state: Arc<PortState>) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
