//! Request dispatch: one site, one response.
//!
//! # Data Flow
//! ```text
//! Request
//!     → resolve site by Host (403 when unknown)
//!     → method check (403 unless GET/POST)
//!     → spawn process() and race it against the site timeout (408)
//!         → normalize path, extension policy (404)
//!         → static asset | compiled handler | 404
//!         → body.rs (403/413/400)
//!         → coordinator::execute → ResponsePlan
//!     → Server header, access log line, metrics
//! ```
//!
//! # Design Decisions
//! - The first of {process task, timeout} to finish answers the request;
//!   a late result is dropped
//! - A panicking request task is isolated and answered with a bare 500
//! - 4xx/5xx answers go through the site's error pages when negotiable

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use tokio::task::JoinError;

use crate::coordinator::{execute, ResponsePlan};
use crate::http::body::{collect, UploadTracker};
use crate::http::error::RequestLimitError;
use crate::http::request::{extension_allowed, host_of, normalize_path, request_id, request_info, NormalizedPath};
use crate::http::response::{advertise, bare, from_rendered, static_response};
use crate::http::server::PortState;
use crate::observability::metrics;
use crate::runtime::{RequestInfo, RuntimeContext};
use crate::site::handlers::{is_handler_path, HANDLER_EXTENSION};
use crate::site::{wants_error_page, ErrorClass, ErrorPage, Site, StaticAsset};
use crate::template::{CompileError, CompiledHandler};

/// What a normalized path resolved to.
enum Target {
    Static(StaticAsset),
    Handler(String, Result<Arc<CompiledHandler>, CompileError>),
}

/// Fallback handler for every route on a port.
pub async fn dispatch(State(state): State<Arc<PortState>>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();

    let host = host_of(&parts).unwrap_or_default();
    let Some(site) = state.sites.resolve(&host) else {
        let rejection = RequestLimitError::Forbidden("no site for host");
        tracing::debug!(port = state.port, host = %host, "{}", rejection);
        return bare(rejection.status());
    };

    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let id = request_id(&parts);

    let mut response = if method != Method::GET && method != Method::POST {
        bare(RequestLimitError::Forbidden("method not allowed").status())
    } else {
        let guard = state.inflight.track();
        tracing::debug!(
            request_id = %id,
            request = %guard.seq(),
            site = %site.name(),
            method = %method,
            path = %path,
            "Dispatching request"
        );

        let tracker = UploadTracker::default();
        let request = Request::from_parts(parts, body);
        let mut task = tokio::spawn(process(
            Arc::clone(&site),
            Arc::clone(&state),
            request,
            tracker.clone(),
        ));

        match site.config().timeout() {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined_response(&state, &host, &path, joined),
                Err(_) => {
                    tracker.purge().await;
                    tracing::warn!(
                        request_id = %id,
                        site = %site.name(),
                        path = %path,
                        timeout_secs = limit.as_secs(),
                        "Request timed out"
                    );
                    bare(RequestLimitError::Timeout.status())
                }
            },
            None => joined_response(&state, &host, &path, task.await),
        }
    };

    advertise(&mut response, site.config().server_header);

    let status = response.status().as_u16();
    let elapsed = start.elapsed();
    if let Some(logger) = site.logger() {
        logger.info(format!(
            "{} {}{} {} {}ms",
            method,
            host,
            path,
            status,
            elapsed.as_millis()
        ));
    }
    metrics::record_request(site.name(), status, start);
    response
}

fn joined_response(
    state: &PortState,
    host: &str,
    path: &str,
    joined: Result<Response, JoinError>,
) -> Response {
    match joined {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(host = %host, path = %path, error = %e, "CRITICAL: request task failed");
            if let Some(logger) = &state.server_logger {
                logger.error(format!("CRITICAL: request for {host}{path} failed"), Some(&e));
            }
            bare(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn process(
    site: Arc<Site>,
    state: Arc<PortState>,
    request: Request<Body>,
    tracker: UploadTracker,
) -> Response {
    let (parts, body) = request.into_parts();
    let host = host_of(&parts).unwrap_or_default();
    let info = request_info(&parts, &host);

    let path = match normalize_path(parts.uri.path()) {
        Ok(path) => path,
        Err(e) => return render_error(&site, e.status(), &info).await,
    };
    if !extension_allowed(site.config().extension_policy, &path) {
        return render_error(&site, StatusCode::NOT_FOUND, &info).await;
    }

    let (name, handler) = match resolve(&site, &path).await {
        Some(Target::Static(asset)) => return static_response(asset, StatusCode::OK),
        Some(Target::Handler(name, handler)) => (name, handler),
        None => return render_error(&site, StatusCode::NOT_FOUND, &info).await,
    };

    let request = Request::from_parts(parts, body);
    let collected = match collect(request, &site, &state.temp_dir, &tracker).await {
        Ok(collected) => collected,
        Err(e) => {
            tracing::debug!(site = %site.name(), error = %e, "Request body rejected");
            return render_error(&site, e.status(), &info).await;
        }
    };

    let mut ctx = RuntimeContext::new(info.clone());
    ctx.params = collected.params;
    ctx.body = collected.body;
    ctx.uploads = collected.uploads;
    ctx.upload_failure = collected.upload_failure;

    match execute(handler, ctx, site.request_env(&name)).await {
        ResponsePlan::Render(rendered) | ResponsePlan::Redirect(rendered) => from_rendered(rendered),
        ResponsePlan::ServerError(failure) => {
            if let Some(logger) = site.logger() {
                logger.error(format!("{} {} failed", info.method, info.path), Some(&failure));
            } else {
                tracing::error!(site = %site.name(), path = %info.path, error = %failure, "Request failed");
            }
            render_error(&site, StatusCode::INTERNAL_SERVER_ERROR, &info).await
        }
    }
}

/// Lookup order: explicit handler, static asset, then the handler behind
/// an extensionless path.
async fn resolve(site: &Site, path: &NormalizedPath) -> Option<Target> {
    if is_handler_path(&path.key) {
        let handler = site.handlers().get_or_compile(&path.key).await?;
        return Some(Target::Handler(path.key.clone(), handler));
    }
    if let Some(asset) = site.statics().lookup(&path.key).await {
        return Some(Target::Static(asset));
    }
    if !path.has_extension() {
        let key = format!("{}.{}", path.key, HANDLER_EXTENSION);
        let handler = site.handlers().get_or_compile(&key).await?;
        return Some(Target::Handler(key, handler));
    }
    None
}

/// Answer `status` with the site's error page when the client can render
/// one, otherwise with a bare status.
async fn render_error(site: &Site, status: StatusCode, info: &RequestInfo) -> Response {
    let accept = info.headers.get("accept").map(String::as_str);
    let content_type = info.headers.get("content-type").map(String::as_str);
    if !wants_error_page(accept, content_type) {
        return bare(status);
    }
    let Some(class) = ErrorClass::of(status.as_u16()) else {
        return bare(status);
    };

    match site.error_page(class).await {
        Some(ErrorPage::Static(asset)) => static_response(asset, status),
        Some(ErrorPage::Handler(handler)) => {
            let mut ctx = RuntimeContext::new(info.clone());
            ctx.status = status.as_u16();
            let env = site.request_env(handler.name());
            match execute(Ok(handler), ctx, env).await {
                ResponsePlan::Render(mut rendered) => {
                    rendered.status = status.as_u16();
                    from_rendered(rendered)
                }
                ResponsePlan::Redirect(rendered) => from_rendered(rendered),
                ResponsePlan::ServerError(failure) => {
                    tracing::warn!(site = %site.name(), error = %failure, "Error page failed");
                    bare(status)
                }
            }
        }
        None => bare(status),
    }
}
