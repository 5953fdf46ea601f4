//! Background gzip compression of rotated log files.
//!
//! Directories are compressed one at a time by a single worker task; a
//! directory already waiting in the queue is not queued again. Inside a
//! directory at most `concurrency` files are compressed at once.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::task::JoinSet;

use crate::logging::naming::is_uncompressed_log;
use crate::logging::SinkShared;

#[derive(Debug, Default)]
struct SchedulerState {
    queue: VecDeque<PathBuf>,
    running: bool,
    accepting: bool,
}

/// Global single-directory-at-a-time scheduler.
#[derive(Debug)]
pub struct CompressionScheduler {
    state: Mutex<SchedulerState>,
}

impl CompressionScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                accepting: true,
                ..Default::default()
            }),
        }
    }

    /// Stop accepting new directories. Already queued passes still run.
    pub fn stop_accepting(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.accepting = false;
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state
            .lock()
            .map(|s| !s.running && s.queue.is_empty())
            .unwrap_or(true)
    }

    /// Queue `dir` for a compression pass and start the worker if needed.
    pub(crate) fn schedule(shared: &Arc<SinkShared>, dir: PathBuf) {
        let start_worker = {
            let Ok(mut state) = shared.compression.state.lock() else {
                return;
            };
            if !state.accepting || state.queue.contains(&dir) {
                return;
            }
            state.queue.push_back(dir);
            !std::mem::replace(&mut state.running, true)
        };
        if start_worker {
            tokio::spawn(run_worker(shared.clone()));
        }
    }

    fn next(&self) -> Option<PathBuf> {
        let mut state = self.state.lock().ok()?;
        let next = state.queue.pop_front();
        if next.is_none() {
            state.running = false;
        }
        next
    }
}

impl Default for CompressionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_worker(shared: Arc<SinkShared>) {
    while let Some(dir) = shared.compression.next() {
        compress_directory(&shared, &dir).await;
    }
}

/// One pass: gzip every uncompressed log file except the active one.
async fn compress_directory(shared: &Arc<SinkShared>, dir: &Path) {
    let state = shared.directory(dir);

    {
        let mut guard = state.lock().await;
        let candidates = match list_candidates(dir, guard.current.as_deref()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(directory = %dir.display(), error = %e, "Failed to list log directory");
                return;
            }
        };
        if candidates.is_empty() {
            return;
        }
        guard.pass_active = true;
        guard.queued = candidates.into();
    }

    let limit = shared.config.compression_concurrency.max(1);
    let mut jobs = JoinSet::new();
    loop {
        {
            let mut guard = state.lock().await;
            while jobs.len() < limit {
                let Some(name) = guard.queued.pop_front() else {
                    break;
                };
                guard.compressing.push(name.clone());
                let source = dir.join(&name);
                jobs.spawn(async move {
                    let result = compress_file(source).await;
                    (name, result)
                });
            }
        }

        let Some(joined) = jobs.join_next().await else {
            break;
        };
        let mut guard = state.lock().await;
        match joined {
            Ok((name, result)) => {
                guard.compressing.retain(|n| n != &name);
                if let Err(e) = result {
                    tracing::warn!(directory = %dir.display(), file = %name, error = %e, "Log compression failed");
                }
            }
            Err(e) => {
                tracing::warn!(directory = %dir.display(), error = %e, "Log compression task failed");
            }
        }
    }

    let mut guard = state.lock().await;
    guard.compressing.clear();
    guard.pass_active = false;
}

async fn list_candidates(dir: &Path, active: Option<&str>) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if Some(name.as_str()) != active && is_uncompressed_log(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Gzip `source` to a `.gz` sibling, then delete the original.
pub async fn compress_file(source: PathBuf) -> io::Result<()> {
    tokio::task::spawn_blocking(move || gzip_and_remove(&source))
        .await
        .map_err(io::Error::other)?
}

fn gzip_and_remove(source: &Path) -> io::Result<()> {
    let mut target = source.as_os_str().to_owned();
    target.push(".gz");
    let target = PathBuf::from(target);

    let result = (|| {
        let mut reader = BufReader::new(File::open(source)?);
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(&target)?), Compression::default());
        io::copy(&mut reader, &mut encoder)?;
        encoder.finish()?.into_inner().map_err(|e| e.into_error())?.sync_all()
    })();

    match result {
        Ok(()) => std::fs::remove_file(source),
        Err(e) => {
            let _ = std::fs::remove_file(&target);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[tokio::test]
    async fn test_compress_file_replaces_original() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("jsc_2024-01-01_00-00-00.log");
        std::fs::write(&source, "line one\nline two\n").unwrap();

        compress_file(source.clone()).await.unwrap();
        assert!(!source.exists());

        let gz = dir.path().join("jsc_2024-01-01_00-00-00.log.gz");
        let mut text = String::new();
        GzDecoder::new(File::open(gz).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_missing_source_leaves_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("jsc_2024-01-01_00-00-00.log");
        assert!(compress_file(source).await.is_err());
        assert!(!dir.path().join("jsc_2024-01-01_00-00-00.log.gz").exists());
    }

    #[tokio::test]
    async fn test_candidates_exclude_active_and_archives() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "jsc_2024-01-01_00-00-00.log",
            "jsc_2024-01-01_00-00-00--1.log",
            "jsc_2024-01-01_00-00-00--2.log.gz",
            "other.txt",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let names = list_candidates(dir.path(), Some("jsc_2024-01-01_00-00-00--1.log"))
            .await
            .unwrap();
        assert_eq!(names, vec!["jsc_2024-01-01_00-00-00.log"]);
    }
}
