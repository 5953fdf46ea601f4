//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use jscp::config::{LoggingConfig, SiteConfig};
use jscp::http::HttpServer;
use jscp::site::{Site, SiteRegistry};

pub const PORT: u16 = 8080;

/// A site rooted in a temporary directory.
pub struct TestSite {
    pub dir: TempDir,
    pub config: SiteConfig,
}

impl TestSite {
    pub fn new(name: &str, host: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root");
        std::fs::create_dir_all(&root).unwrap();
        let mut config = SiteConfig {
            name: name.into(),
            host: host.into(),
            port: PORT,
            root,
            ..Default::default()
        };
        config.uploads.work_dir = Some(dir.path().join("work"));
        Self { dir, config }
    }

    /// Write `contents` to `rel` under the site root.
    pub fn file(self, rel: &str, contents: &str) -> Self {
        let path = self.config.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
        self
    }

    pub fn with(mut self, configure: impl FnOnce(&mut SiteConfig)) -> Self {
        configure(&mut self.config);
        self
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.dir.path().join("staging")
    }
}

/// Load `sites` and return the router for their shared port.
pub fn router(sites: &[&TestSite]) -> Router {
    let mut registry = SiteRegistry::new();
    for site in sites {
        registry.insert(Site::load(site.config.clone(), None, &LoggingConfig::default()).unwrap());
    }
    let staging = sites[0].staging_dir();
    HttpServer::new(registry, staging, None).router(PORT).unwrap()
}

pub fn get(host: &str, path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

pub fn post(host: &str, path: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("host", host)
        .header("content-type", content_type)
        .body(body.into())
        .unwrap()
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

pub async fn send(router: &Router, request: Request<Body>) -> Reply {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    Reply {
        status,
        headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

/// A multipart body with one text field and one file.
pub fn multipart_body(boundary: &str, file_field: &str, file_name: &str, contents: &str) -> String {
    format!(
        "--{b}\r\n\
         Content-Disposition: form-data; name=\"title\"\r\n\r\n\
         Quarterly\r\n\
         --{b}\r\n\
         Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         {contents}\r\n\
         --{b}--\r\n",
        b = boundary,
        field = file_field,
        name = file_name,
        contents = contents,
    )
}
