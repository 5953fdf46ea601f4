//! Static asset lookup with a small in-memory cache.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use dashmap::DashMap;
use walkdir::WalkDir;

use crate::site::handlers::is_handler_path;

/// Result of a static lookup.
#[derive(Debug, Clone)]
pub enum StaticAsset {
    Cached {
        bytes: Bytes,
        content_type: String,
        size: u64,
    },
    Stream {
        path: PathBuf,
        content_type: String,
        size: u64,
    },
}

impl StaticAsset {
    pub fn content_type(&self) -> &str {
        match self {
            StaticAsset::Cached { content_type, .. } | StaticAsset::Stream { content_type, .. } => {
                content_type
            }
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            StaticAsset::Cached { size, .. } | StaticAsset::Stream { size, .. } => *size,
        }
    }
}

pub fn content_type_for(path: &str) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[derive(Debug)]
pub struct StaticFiles {
    root: PathBuf,
    cache_limit: u64,
    cache: DashMap<String, Bytes>,
}

impl StaticFiles {
    pub fn new(root: &Path, cache_limit: u64) -> Self {
        Self {
            root: root.to_path_buf(),
            cache_limit,
            cache: DashMap::new(),
        }
    }

    /// Cache every small non-handler file under the root. Unreadable files
    /// are skipped and served from disk later.
    pub fn preload(&self) -> usize {
        for entry in WalkDir::new(&self.root).follow_links(true).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let Some(key) = relative.to_str().map(|k| k.replace('\\', "/")) else {
                continue;
            };
            if is_handler_path(&key) {
                continue;
            }
            let small = entry
                .metadata()
                .map(|m| m.len() <= self.cache_limit)
                .unwrap_or(false);
            if small {
                if let Ok(bytes) = std::fs::read(entry.path()) {
                    self.cache.insert(key, Bytes::from(bytes));
                }
            }
        }
        self.cache.len()
    }

    /// Look up `key` (root-relative, `/`-separated). Handler sources are
    /// never served.
    pub async fn lookup(&self, key: &str) -> Option<StaticAsset> {
        if is_handler_path(key) {
            return None;
        }
        let content_type = content_type_for(key);
        let cached = self.cache.get(key).map(|entry| entry.value().clone());
        if let Some(bytes) = cached {
            return Some(StaticAsset::Cached {
                size: bytes.len() as u64,
                bytes,
                content_type,
            });
        }

        let path = self.root.join(key);
        let meta = tokio::fs::metadata(&path).await.ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(StaticAsset::Stream {
            path,
            content_type,
            size: meta.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_files_cached_large_streamed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("small.css"), "a{}").unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![b'x'; 64]).unwrap();
        std::fs::write(dir.path().join("page.jscp"), "secret").unwrap();

        let statics = StaticFiles::new(dir.path(), 16);
        assert_eq!(statics.preload(), 1);

        match statics.lookup("small.css").await.unwrap() {
            StaticAsset::Cached { bytes, content_type, .. } => {
                assert_eq!(&bytes[..], b"a{}");
                assert_eq!(content_type, "text/css");
            }
            other => panic!("expected cached asset, got {other:?}"),
        }
        let big = statics.lookup("big.txt").await.unwrap();
        assert!(matches!(big, StaticAsset::Stream { .. }));
        assert_eq!(big.size(), 64);

        assert!(statics.lookup("page.jscp").await.is_none());
        assert!(statics.lookup("missing.png").await.is_none());
    }
}
