//! Request inspection: request IDs, path normalisation, request info.
//!
//! # Design Decisions
//! - Request ID is set by tower-http before tracing sees the request
//! - Paths are decoded and NFC-normalised before any filesystem lookup
//! - `..` segments and dot-files never reach the filesystem

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::header;
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

use crate::config::ExtensionPolicy;
use crate::http::error::RequestLimitError;
use crate::runtime::RequestInfo;
use crate::site::handlers::is_handler_path;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const INDEX_HANDLER: &str = "index.jscp";

/// A request path reduced to a root-relative key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    /// `/`-separated, no leading slash (`blog/index.jscp`).
    pub key: String,
    /// `index.jscp` was appended to a directory path.
    pub implicit_index: bool,
}

impl NormalizedPath {
    pub fn has_extension(&self) -> bool {
        let last = self.key.rsplit('/').next().unwrap_or("");
        last.contains('.')
    }
}

pub fn normalize_path(raw: &str) -> Result<NormalizedPath, RequestLimitError> {
    let decoded = urlencoding::decode(raw).map_err(|_| RequestLimitError::NotFound)?;
    let decoded: String = decoded.nfc().collect();
    if decoded.contains('\0') || decoded.contains('\\') {
        return Err(RequestLimitError::NotFound);
    }

    let mut segments = Vec::new();
    for segment in decoded.split('/').filter(|s| !s.is_empty()) {
        if segment.starts_with('.') {
            return Err(RequestLimitError::NotFound);
        }
        segments.push(segment);
    }

    let implicit_index = decoded.ends_with('/') || segments.is_empty();
    if implicit_index {
        segments.push(INDEX_HANDLER);
    }
    Ok(NormalizedPath {
        key: segments.join("/"),
        implicit_index,
    })
}

/// Whether the URL form is allowed by the site's extension policy.
/// Checked before any handler or static lookup.
pub fn extension_allowed(policy: ExtensionPolicy, path: &NormalizedPath) -> bool {
    match policy {
        ExtensionPolicy::Optional => true,
        ExtensionPolicy::Always => path.has_extension(),
        ExtensionPolicy::Never => path.implicit_index || !is_handler_path(&path.key),
    }
}

pub fn request_info(parts: &Parts, host: &str) -> RequestInfo {
    let headers: BTreeMap<String, String> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());
    RequestInfo {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        host: host.to_string(),
        headers,
        remote_addr,
    }
}

/// `Host` header, falling back to the URI authority.
pub fn host_of(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()))
}

pub fn request_id(parts: &Parts) -> String {
    parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Decode `a=1&b=2` into string values; a repeated key keeps the last value.
pub fn parse_form(input: &[u8], into: &mut Map<String, Value>) {
    for (key, value) in url::form_urlencoded::parse(input) {
        into.insert(key.into_owned(), Value::String(value.into_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> NormalizedPath {
        normalize_path(raw).unwrap()
    }

    #[test]
    fn test_directory_paths_get_index() {
        assert_eq!(norm("/").key, "index.jscp");
        assert!(norm("/").implicit_index);
        assert_eq!(norm("/blog/").key, "blog/index.jscp");
        assert_eq!(norm("//blog//post.jscp").key, "blog/post.jscp");
        assert!(!norm("/blog/post.jscp").implicit_index);
    }

    #[test]
    fn test_decoding_and_normalisation() {
        assert_eq!(norm("/a%20b.html").key, "a b.html");
        // "e" + combining acute accent composes to U+00E9.
        assert_eq!(norm("/caf%65%CC%81.html").key, "caf\u{e9}.html");
    }

    #[test]
    fn test_traversal_and_dotfiles_rejected() {
        assert_eq!(normalize_path("/../etc/passwd"), Err(RequestLimitError::NotFound));
        assert_eq!(normalize_path("/a/%2e%2e/b"), Err(RequestLimitError::NotFound));
        assert_eq!(normalize_path("/.env"), Err(RequestLimitError::NotFound));
        assert_eq!(normalize_path("/a%5Cb"), Err(RequestLimitError::NotFound));
    }

    #[test]
    fn test_extension_policy() {
        let explicit = norm("/page.jscp");
        let bare = norm("/page");
        let index = norm("/");
        let asset = norm("/style.css");

        assert!(extension_allowed(ExtensionPolicy::Optional, &explicit));
        assert!(extension_allowed(ExtensionPolicy::Optional, &bare));

        assert!(extension_allowed(ExtensionPolicy::Always, &explicit));
        assert!(!extension_allowed(ExtensionPolicy::Always, &bare));

        assert!(!extension_allowed(ExtensionPolicy::Never, &explicit));
        assert!(extension_allowed(ExtensionPolicy::Never, &bare));
        assert!(extension_allowed(ExtensionPolicy::Never, &index));
        assert!(extension_allowed(ExtensionPolicy::Never, &asset));
    }

    #[test]
    fn test_parse_form() {
        let mut map = Map::new();
        parse_form(b"a=1&b=two+words&a=3", &mut map);
        assert_eq!(map["a"], Value::String("3".into()));
        assert_eq!(map["b"], Value::String("two words".into()));
    }
}
