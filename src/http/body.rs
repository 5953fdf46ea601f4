//! Request body collection.
//!
//! # Responsibilities
//! - Enforce the site body limit from `Content-Length` and while streaming
//! - Reject multipart bodies when uploads are disabled
//! - Stream multipart files to the staging directory, then relocate them
//!   into the site work directory
//! - Interpret buffered bodies as JSON, url-encoded form or raw text

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, HeaderMap, Request};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::http::error::RequestLimitError;
use crate::http::request::parse_form;
use crate::runtime::files::relocate;
use crate::runtime::UploadedFile;
use crate::site::Site;

/// Parsed body, ready for the runtime context.
#[derive(Debug, Default)]
pub struct CollectedBody {
    pub params: Map<String, Value>,
    pub body: Value,
    pub uploads: Vec<UploadedFile>,
    pub upload_failure: Option<String>,
}

/// Upload temporaries belonging to one request, so a timeout can remove
/// them while the request task is still running.
#[derive(Debug, Clone, Default)]
pub struct UploadTracker {
    paths: Arc<Mutex<Vec<PathBuf>>>,
}

impl UploadTracker {
    pub fn add(&self, path: PathBuf) {
        if let Ok(mut paths) = self.paths.lock() {
            paths.push(path);
        }
    }

    pub fn len(&self) -> usize {
        self.paths.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every tracked file that still exists.
    pub async fn purge(&self) {
        let paths = match self.paths.lock() {
            Ok(mut paths) => std::mem::take(&mut *paths),
            Err(_) => return,
        };
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove upload temporary");
                }
            }
        }
    }
}

/// Keep the last path component and replace anything outside
/// `[A-Za-z0-9._-]`. Never empty, never a dot-file.
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    let mut result: String = trimmed.chars().take(128).collect();
    if result.is_empty() {
        result.push_str("upload");
    }
    result
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Collect the body of `request` for `site`.
pub async fn collect(
    request: Request<Body>,
    site: &Site,
    staging_dir: &Path,
    tracker: &UploadTracker,
) -> Result<CollectedBody, RequestLimitError> {
    let limit = site.config().max_body_bytes;
    let headers = request.headers().clone();
    if declared_length(&headers).map(|len| len > limit).unwrap_or(false) {
        return Err(RequestLimitError::PayloadTooLarge { limit });
    }

    let mut collected = CollectedBody::default();
    if let Some(query) = request.uri().query() {
        parse_form(query.as_bytes(), &mut collected.params);
    }

    let kind = content_type(&headers);
    if kind.starts_with("multipart/form-data") {
        if !site.config().uploads.enabled {
            return Err(RequestLimitError::UploadForbidden);
        }
        let result = collect_multipart(request, site, staging_dir, tracker, &mut collected).await;
        if let Err(e) = result {
            tracker.purge().await;
            return Err(e);
        }
        relocate_uploads(site, tracker, &mut collected).await;
        return Ok(collected);
    }

    let bytes = read_limited(request.into_body(), limit).await?;
    if bytes.is_empty() {
        return Ok(collected);
    }
    if kind.starts_with("application/json") {
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| RequestLimitError::Malformed(e.to_string()))?;
        if let Value::Object(fields) = &value {
            for (key, field) in fields {
                collected.params.insert(key.clone(), field.clone());
            }
        }
        collected.body = value;
    } else if kind.starts_with("application/x-www-form-urlencoded") {
        let mut fields = Map::new();
        parse_form(&bytes, &mut fields);
        collected.params.extend(fields.clone());
        collected.body = Value::Object(fields);
    } else {
        collected.body = Value::String(String::from_utf8_lossy(&bytes).into_owned());
    }
    Ok(collected)
}

/// Buffer a body, failing as soon as it grows past `limit`.
async fn read_limited(body: Body, limit: u64) -> Result<Vec<u8>, RequestLimitError> {
    let mut stream = body.into_data_stream();
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| RequestLimitError::Malformed(e.to_string()))?;
        if (buffer.len() + chunk.len()) as u64 > limit {
            return Err(RequestLimitError::PayloadTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

async fn collect_multipart(
    request: Request<Body>,
    site: &Site,
    staging_dir: &Path,
    tracker: &UploadTracker,
    collected: &mut CollectedBody,
) -> Result<(), RequestLimitError> {
    let limit = site.config().max_body_bytes;
    let file_limit = site.config().uploads.max_file_bytes;
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| RequestLimitError::Malformed(e.body_text()))?;

    if let Err(e) = tokio::fs::create_dir_all(staging_dir).await {
        collected.upload_failure = Some(format!("{}: {}", staging_dir.display(), e));
    }

    let mut total: u64 = 0;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| RequestLimitError::Malformed(e.body_text()))?
    {
        let name = field.name().unwrap_or("").to_string();
        let Some(original_name) = field.file_name().map(str::to_string) else {
            let mut value = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|e| RequestLimitError::Malformed(e.body_text()))?
            {
                total += chunk.len() as u64;
                if total > limit {
                    return Err(RequestLimitError::PayloadTooLarge { limit });
                }
                value.extend_from_slice(&chunk);
            }
            collected.params.insert(
                name,
                Value::String(String::from_utf8_lossy(&value).into_owned()),
            );
            continue;
        };

        let file_name = sanitize_filename(&original_name);
        let content_type = field.content_type().map(str::to_string);
        let path = staging_dir.join(format!("{}-{}", Uuid::new_v4(), file_name));

        let mut file = if collected.upload_failure.is_none() {
            match tokio::fs::File::create(&path).await {
                Ok(file) => {
                    tracker.add(path.clone());
                    Some(file)
                }
                Err(e) => {
                    collected.upload_failure = Some(format!("{}: {}", path.display(), e));
                    None
                }
            }
        } else {
            None
        };

        let mut size: u64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| RequestLimitError::Malformed(e.body_text()))?
        {
            size += chunk.len() as u64;
            total += chunk.len() as u64;
            if total > limit {
                return Err(RequestLimitError::PayloadTooLarge { limit });
            }
            if size > file_limit {
                return Err(RequestLimitError::PayloadTooLarge { limit: file_limit });
            }
            if let Some(out) = file.as_mut() {
                if let Err(e) = out.write_all(&chunk).await {
                    file = None;
                    abandon_staged(&path, e, collected).await;
                }
            }
        }
        if let Some(mut out) = file {
            if let Err(e) = out.flush().await {
                drop(out);
                abandon_staged(&path, e, collected).await;
                continue;
            }
            collected.uploads.push(UploadedFile {
                field: name,
                file_name,
                original_name,
                content_type,
                size,
                path,
                handled: false,
            });
        }
    }
    Ok(())
}

/// Record a staging failure and remove the partly written file.
async fn abandon_staged(path: &Path, error: std::io::Error, collected: &mut CollectedBody) {
    collected.upload_failure = Some(format!("{}: {}", path.display(), error));
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
        }
    }
}

/// Move staged files into the work directory concurrently. The request
/// only proceeds once every move has finished.
async fn relocate_uploads(site: &Site, tracker: &UploadTracker, collected: &mut CollectedBody) {
    if collected.uploads.is_empty() {
        return;
    }
    let work_dir = site.work_dir();
    if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
        collected.upload_failure = Some(format!("{}: {}", work_dir.display(), e));
        return;
    }

    let mut moves = JoinSet::new();
    for (index, upload) in collected.uploads.iter().enumerate() {
        let from = upload.path.clone();
        let Some(name) = from.file_name().map(|n| n.to_owned()) else {
            continue;
        };
        let to = work_dir.join(name);
        tracker.add(to.clone());
        moves.spawn(async move { (index, relocate(&from, &to).await.map(|_| to)) });
    }

    while let Some(joined) = moves.join_next().await {
        match joined {
            Ok((index, Ok(to))) => collected.uploads[index].path = to,
            Ok((index, Err(e))) => {
                collected.upload_failure = Some(format!(
                    "{}: {}",
                    collected.uploads[index].path.display(),
                    e
                ));
            }
            Err(e) => collected.upload_failure = Some(e.to_string()),
        }
    }
}
