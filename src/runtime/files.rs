//! Site-scoped file operations behind the async builtins.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

/// Resolves handler-supplied paths against the site root.
#[derive(Debug, Clone)]
pub struct FileScope {
    root: PathBuf,
}

impl FileScope {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Paths are relative to the root; a leading `/` is ignored and `..`
    /// is rejected.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, String> {
        let trimmed = relative.trim_start_matches('/');
        if trimmed.is_empty() {
            return Err("empty path".to_string());
        }
        let mut resolved = self.root.clone();
        for component in Path::new(trimmed).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => return Err(format!("path escapes the site root: {relative}")),
            }
        }
        Ok(resolved)
    }
}

fn describe(err: io::Error, path: &Path) -> String {
    format!("{}: {}", path.display(), err)
}

pub async fn read_file(path: PathBuf) -> Result<Value, String> {
    tokio::fs::read_to_string(&path)
        .await
        .map(Value::String)
        .map_err(|e| describe(e, &path))
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

pub async fn write_file(path: PathBuf, data: String) -> Result<Value, String> {
    ensure_parent(&path).await.map_err(|e| describe(e, &path))?;
    tokio::fs::write(&path, data.as_bytes())
        .await
        .map_err(|e| describe(e, &path))?;
    Ok(Value::Null)
}

pub async fn append_file(path: PathBuf, data: String) -> Result<Value, String> {
    ensure_parent(&path).await.map_err(|e| describe(e, &path))?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .map_err(|e| describe(e, &path))?;
    file.write_all(data.as_bytes())
        .await
        .map_err(|e| describe(e, &path))?;
    file.flush().await.map_err(|e| describe(e, &path))?;
    Ok(Value::Null)
}

pub async fn stat(path: PathBuf) -> Result<Value, String> {
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|e| describe(e, &path))?;
    let modified = meta
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339());
    Ok(json!({
        "size": meta.len(),
        "is_file": meta.is_file(),
        "is_dir": meta.is_dir(),
        "modified": modified,
    }))
}

pub async fn copy_file(from: PathBuf, to: PathBuf) -> Result<Value, String> {
    ensure_parent(&to).await.map_err(|e| describe(e, &to))?;
    tokio::fs::copy(&from, &to)
        .await
        .map(Value::from)
        .map_err(|e| describe(e, &from))
}

pub async fn move_file(from: PathBuf, to: PathBuf) -> Result<Value, String> {
    ensure_parent(&to).await.map_err(|e| describe(e, &to))?;
    relocate(&from, &to).await.map_err(|e| describe(e, &from))?;
    Ok(Value::Null)
}

pub async fn delete_file(path: PathBuf) -> Result<Value, String> {
    tokio::fs::remove_file(&path)
        .await
        .map_err(|e| describe(e, &path))?;
    Ok(Value::Null)
}

pub async fn sleep(millis: u64) -> Result<Value, String> {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(Value::Null)
}

/// Rename, falling back to copy + remove across filesystems.
pub async fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await
        }
    }
}
