//! Turning a settled request into a response plan.

use std::fmt;

use crate::coordinator::runtime::{Phase, RequestEnv, Runtime};
use crate::runtime::{RuntimeContext, RuntimeError};
use crate::template::CompileError;

pub const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Status, headers and body ready to be written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Why a request ended as a server error.
#[derive(Debug, Clone)]
pub enum ServerFailure {
    Runtime(RuntimeError),
    Compile(CompileError),
    Upload(String),
}

impl fmt::Display for ServerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerFailure::Runtime(err) => write!(f, "runtime error: {err}"),
            ServerFailure::Compile(err) => write!(f, "compile error: {err}"),
            ServerFailure::Upload(msg) => write!(f, "upload processing failed: {msg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResponsePlan {
    Render(RenderedResponse),
    /// Buffered output is discarded; headers carry `Location` or `Refresh`.
    Redirect(RenderedResponse),
    ServerError(ServerFailure),
}

impl ResponsePlan {
    pub fn status(&self) -> u16 {
        match self {
            ResponsePlan::Render(r) | ResponsePlan::Redirect(r) => r.status,
            ResponsePlan::ServerError(_) => 500,
        }
    }
}

/// Delete unclaimed uploads, then classify the outcome.
pub(crate) async fn finalize(mut rt: Runtime, missing: Option<CompileError>) -> ResponsePlan {
    rt.set_phase(Phase::Sent);
    let (mut ctx, env) = rt.into_parts();
    remove_unhandled_uploads(&ctx, &env).await;

    if let Some(err) = missing {
        return ResponsePlan::ServerError(ServerFailure::Compile(err));
    }
    if let Some(err) = ctx.take_exception() {
        return ResponsePlan::ServerError(ServerFailure::Runtime(err));
    }
    if let Some(msg) = ctx.upload_failure.take() {
        return ResponsePlan::ServerError(ServerFailure::Upload(msg));
    }
    plan_response(ctx)
}

fn plan_response(ctx: RuntimeContext) -> ResponsePlan {
    let mut headers = ctx.headers;
    for cookie in &ctx.cookies {
        headers.push(("Set-Cookie".to_string(), cookie.to_header_value()));
    }
    if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-type")) {
        headers.push(("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string()));
    }

    match ctx.redirect {
        Some(redirect) => {
            let status = match redirect.delay_secs {
                Some(delay) => {
                    headers.push((
                        "Refresh".to_string(),
                        format!("{}; url={}", delay, redirect.location),
                    ));
                    ctx.status
                }
                None => {
                    headers.push(("Location".to_string(), redirect.location));
                    if (300..400).contains(&ctx.status) {
                        ctx.status
                    } else {
                        302
                    }
                }
            };
            ResponsePlan::Redirect(RenderedResponse {
                status,
                headers,
                body: String::new(),
            })
        }
        None => ResponsePlan::Render(RenderedResponse {
            status: ctx.status,
            headers,
            body: ctx.output.concat(),
        }),
    }
}

async fn remove_unhandled_uploads(ctx: &RuntimeContext, env: &RequestEnv) {
    for upload in ctx.uploads.iter().filter(|u| !u.handled) {
        if let Err(e) = tokio::fs::remove_file(&upload.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                env.log_warning(format!(
                    "Failed to remove unhandled upload {}: {}",
                    upload.path.display(),
                    e
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Cookie, Redirect, RequestInfo};

    #[test]
    fn test_render_joins_output_in_order() {
        let mut ctx = RuntimeContext::new(RequestInfo::default());
        ctx.output = vec!["Hello, ".into(), "world".into(), "!".into()];
        ctx.cookies.push(Cookie::new("a", "1"));

        let ResponsePlan::Render(response) = plan_response(ctx) else {
            panic!("expected render");
        };
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "Hello, world!");
        assert!(response
            .headers
            .contains(&("Set-Cookie".to_string(), "a=1; Path=/".to_string())));
        assert!(response
            .headers
            .contains(&("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string())));
    }

    #[test]
    fn test_redirect_discards_output() {
        let mut ctx = RuntimeContext::new(RequestInfo::default());
        ctx.output = vec!["ignored".into()];
        ctx.redirect = Some(Redirect {
            location: "/next".into(),
            delay_secs: None,
        });
        let ResponsePlan::Redirect(response) = plan_response(ctx) else {
            panic!("expected redirect");
        };
        assert_eq!(response.status, 302);
        assert!(response.body.is_empty());
        assert!(response
            .headers
            .contains(&("Location".to_string(), "/next".to_string())));
    }

    #[test]
    fn test_delayed_redirect_uses_refresh() {
        let mut ctx = RuntimeContext::new(RequestInfo::default());
        ctx.redirect = Some(Redirect {
            location: "/later".into(),
            delay_secs: Some(3),
        });
        let plan = plan_response(ctx);
        assert_eq!(plan.status(), 200);
        let ResponsePlan::Redirect(response) = plan else {
            panic!("expected redirect");
        };
        assert!(response
            .headers
            .contains(&("Refresh".to_string(), "3; url=/later".to_string())));
    }
}
