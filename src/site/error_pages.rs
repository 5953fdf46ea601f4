//! Custom error page resolution.

use std::sync::Arc;

use crate::site::handlers::is_handler_path;
use crate::site::static_files::StaticAsset;
use crate::site::Site;
use crate::template::CompiledHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Client,
    Server,
}

impl ErrorClass {
    pub fn of(status: u16) -> Option<Self> {
        match status {
            400..=499 => Some(ErrorClass::Client),
            500..=599 => Some(ErrorClass::Server),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ErrorPage {
    Handler(Arc<CompiledHandler>),
    Static(StaticAsset),
}

/// Whether the client can render an HTML error page: it accepts HTML (or
/// anything, or sent no `Accept`) and did not send JSON.
pub fn wants_error_page(accept: Option<&str>, content_type: Option<&str>) -> bool {
    let accepts_html = match accept {
        None => true,
        Some(accept) => accept
            .split(',')
            .map(|part| part.split(';').next().unwrap_or("").trim())
            .any(|mime| mime == "*/*" || mime == "text/html" || mime.is_empty()),
    };
    let sent_json = content_type
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false);
    accepts_html && !sent_json
}

impl Site {
    /// The configured page for `class`, if it exists and compiles.
    pub async fn error_page(&self, class: ErrorClass) -> Option<ErrorPage> {
        let pages = &self.config().error_pages;
        let configured = match class {
            ErrorClass::Client => pages.client.as_deref(),
            ErrorClass::Server => pages.server.as_deref(),
        }?;
        let key = configured.trim_start_matches('/');
        if is_handler_path(key) {
            match self.handlers().get_or_compile(key).await? {
                Ok(handler) => Some(ErrorPage::Handler(handler)),
                Err(_) => None,
            }
        } else {
            self.statics().lookup(key).await.map(ErrorPage::Static)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_class() {
        assert_eq!(ErrorClass::of(404), Some(ErrorClass::Client));
        assert_eq!(ErrorClass::of(503), Some(ErrorClass::Server));
        assert_eq!(ErrorClass::of(302), None);
    }

    #[test]
    fn test_negotiation() {
        assert!(wants_error_page(None, None));
        assert!(wants_error_page(Some("*/*"), None));
        assert!(wants_error_page(
            Some("text/html,application/xhtml+xml;q=0.9"),
            Some("application/x-www-form-urlencoded")
        ));
        assert!(!wants_error_page(Some("application/json"), None));
        assert!(!wants_error_page(None, Some("application/json")));
    }
}
