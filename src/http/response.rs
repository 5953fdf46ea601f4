//! Response construction.
//!
//! # Responsibilities
//! - Turn a rendered handler response into an axum `Response`
//! - Serve static assets from memory or stream them from disk
//! - Bare status responses (no body) for early rejections
//!
//! # Design Decisions
//! - Invalid header names or values written by a handler are skipped, not fatal
//! - Large files are streamed in fixed-size chunks, never fully buffered

use std::path::PathBuf;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use futures_util::stream;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::coordinator::RenderedResponse;
use crate::site::StaticAsset;

pub const SERVER_NAME: &str = "jscp";

const STREAM_CHUNK: usize = 64 * 1024;

fn status_of(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Status line only, empty body.
pub fn bare(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

pub fn from_rendered(rendered: RenderedResponse) -> Response {
    let mut response = Response::new(Body::from(rendered.body));
    *response.status_mut() = status_of(rendered.status);
    let headers = response.headers_mut();
    for (name, value) in rendered.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid response header"),
        }
    }
    response
}

enum FileRead {
    Pending(PathBuf),
    Open(File),
    Done,
}

/// Chunked file body. The file is opened on first poll.
fn file_body(path: PathBuf) -> Body {
    let chunks = stream::unfold(FileRead::Pending(path), |state| async move {
        let mut file = match state {
            FileRead::Pending(path) => match File::open(&path).await {
                Ok(file) => file,
                Err(e) => return Some((Err(e), FileRead::Done)),
            },
            FileRead::Open(file) => file,
            FileRead::Done => return None,
        };
        let mut buf = vec![0u8; STREAM_CHUNK];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), FileRead::Open(file)))
            }
            Err(e) => Some((Err(e), FileRead::Done)),
        }
    });
    Body::from_stream(chunks)
}

/// Serve a static asset with `status`.
pub fn static_response(asset: StaticAsset, status: StatusCode) -> Response {
    let content_type = asset.content_type().to_string();
    let size = asset.size();
    let body = match asset {
        StaticAsset::Cached { bytes, .. } => Body::from(bytes),
        StaticAsset::Stream { path, .. } => file_body(path),
    };
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    response
}

/// Add the `Server` header when the site advertises itself.
pub fn advertise(response: &mut Response, enabled: bool) {
    if enabled {
        response
            .headers_mut()
            .insert(header::SERVER, HeaderValue::from_static(SERVER_NAME));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rendered_headers() {
        let response = from_rendered(RenderedResponse {
            status: 201,
            headers: vec![
                ("Set-Cookie".into(), "a=1; Path=/".into()),
                ("Set-Cookie".into(), "b=2; Path=/".into()),
                ("Bad Header".into(), "x".into()),
            ],
            body: "created".into(),
        });
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
        assert_eq!(response.headers().len(), 2);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"created");
    }

    #[tokio::test]
    async fn test_streamed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let asset = StaticAsset::Stream {
            path,
            content_type: "application/octet-stream".into(),
            size: data.len() as u64,
        };
        let response = static_response(asset, StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_LENGTH).unwrap(),
            &data.len().to_string()
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), data.len());
        assert_eq!(&bytes[..], &data[..]);
    }

    #[test]
    fn test_advertise() {
        let mut response = bare(StatusCode::NOT_FOUND);
        advertise(&mut response, false);
        assert!(response.headers().get(header::SERVER).is_none());
        advertise(&mut response, true);
        assert_eq!(response.headers().get(header::SERVER).unwrap(), "jscp");
    }
}
