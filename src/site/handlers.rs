//! Compiled handler table for one site.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use walkdir::WalkDir;

use crate::site::SiteLoadError;
use crate::template::{compile, CompileError, CompiledHandler};

pub const HANDLER_EXTENSION: &str = "jscp";

/// Handlers keyed by their root-relative path (`blog/index.jscp`).
#[derive(Debug)]
pub struct HandlerTable {
    root: PathBuf,
    handlers: DashMap<String, Arc<CompiledHandler>>,
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

pub fn is_handler_path(path: &str) -> bool {
    Path::new(path)
        .extension()
        .map(|ext| ext == HANDLER_EXTENSION)
        .unwrap_or(false)
}

impl HandlerTable {
    /// Compile every handler under `root`. Any failure aborts the load.
    pub fn load(root: &Path) -> Result<Self, SiteLoadError> {
        let table = Self {
            root: root.to_path_buf(),
            handlers: DashMap::new(),
        };
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.map_err(|e| SiteLoadError::Scan(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Some(key) = relative_key(root, path) else {
                continue;
            };
            if !is_handler_path(&key) {
                continue;
            }
            let source = std::fs::read_to_string(path).map_err(|source| SiteLoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let handler = compile(&source, &key)?;
            table.handlers.insert(key, handler);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Arc<CompiledHandler>> {
        self.handlers.get(key).map(|h| h.value().clone())
    }

    /// Look up a handler, compiling it if it appeared after startup.
    ///
    /// `None` when no such file exists. Failed compiles are not cached, so
    /// a fixed file is picked up on the next request.
    pub async fn get_or_compile(&self, key: &str) -> Option<Result<Arc<CompiledHandler>, CompileError>> {
        if let Some(handler) = self.get(key) {
            return Some(Ok(handler));
        }
        let path = self.root.join(key);
        let source = tokio::fs::read_to_string(&path).await.ok()?;
        let compiled = compile(&source, key);
        match &compiled {
            Ok(handler) => {
                tracing::info!(handler = %key, "Compiled new handler");
                self.handlers.insert(key.to_string(), handler.clone());
            }
            Err(e) => tracing::warn!(handler = %key, error = %e, "Handler failed to compile"),
        }
        Some(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_compiles_nested_handlers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blog")).unwrap();
        std::fs::write(dir.path().join("index.jscp"), "home").unwrap();
        std::fs::write(dir.path().join("blog/post.jscp"), "<? print 1 ?>").unwrap();
        std::fs::write(dir.path().join("style.css"), "body{}").unwrap();

        let table = HandlerTable::load(dir.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.get("index.jscp").is_some());
        assert_eq!(table.get("blog/post.jscp").unwrap().name(), "blog/post.jscp");
    }

    #[test]
    fn test_load_fails_on_compile_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.jscp"), "<? if {").unwrap();
        let err = HandlerTable::load(dir.path()).unwrap_err();
        assert!(matches!(err, SiteLoadError::Compile(_)));
    }

    #[tokio::test]
    async fn test_on_demand_compile() {
        let dir = tempfile::tempdir().unwrap();
        let table = HandlerTable::load(dir.path()).unwrap();
        assert!(table.get_or_compile("late.jscp").await.is_none());

        std::fs::write(dir.path().join("late.jscp"), "<? print ( ?>").unwrap();
        assert!(matches!(table.get_or_compile("late.jscp").await, Some(Err(_))));

        std::fs::write(dir.path().join("late.jscp"), "fixed").unwrap();
        assert!(matches!(table.get_or_compile("late.jscp").await, Some(Ok(_))));
        assert!(table.get("late.jscp").is_some());
    }
}
