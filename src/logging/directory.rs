//! Per-directory log state and active file resolution.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::logging::naming::{format_name, truncate_to_hour};
use crate::logging::LogIoError;

/// State for one log directory. Guarded by an async mutex so writes,
/// rotation and compression bookkeeping never interleave.
#[derive(Debug, Default)]
pub struct DirectoryState {
    /// Name of the active file.
    pub current: Option<String>,
    pub file: Option<File>,
    /// Files with a gzip job in flight.
    pub compressing: Vec<String>,
    /// Files waiting for a compression slot.
    pub queued: VecDeque<String>,
    /// A compression pass over this directory is running.
    pub pass_active: bool,
}

impl DirectoryState {
    pub fn is_compressing(&self) -> bool {
        self.pass_active || !self.compressing.is_empty() || !self.queued.is_empty()
    }

    /// Flush and drop the open handle.
    pub async fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        Ok(())
    }

    /// Append to the active file, opening it on demand.
    pub async fn append(&mut self, dir: &Path, bytes: &[u8]) -> Result<(), LogIoError> {
        let Some(name) = self.current.clone() else {
            return Ok(());
        };
        let path = dir.join(&name);
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|source| LogIoError::Io {
                    path: path.clone(),
                    source,
                })?;
            self.file = Some(file);
        }
        if let Some(file) = self.file.as_mut() {
            let write = async {
                file.write_all(bytes).await?;
                file.flush().await
            };
            if let Err(source) = write.await {
                // Reopen on the next write.
                self.file = None;
                return Err(LogIoError::Io { path, source });
            }
        }
        Ok(())
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Pick the file a message stamped `timestamp` belongs in.
///
/// Suffixes are probed in increasing order. A suffix whose `.gz` exists
/// is archived and skipped. The first remaining name that does not exist,
/// or exists below `threshold` bytes, wins. A zero threshold disables
/// size rotation.
pub async fn resolve_file_name(
    dir: &Path,
    timestamp: NaiveDateTime,
    threshold: u64,
    max_suffix: u32,
) -> Result<String, LogIoError> {
    for suffix in 0..max_suffix {
        if exists(&dir.join(format_name(timestamp, suffix, true))).await {
            continue;
        }
        let name = format_name(timestamp, suffix, false);
        match tokio::fs::metadata(dir.join(&name)).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(name),
            Err(source) => {
                return Err(LogIoError::Io {
                    path: dir.join(&name),
                    source,
                })
            }
            Ok(meta) if threshold == 0 || meta.len() < threshold => return Ok(name),
            Ok(_) => continue,
        }
    }
    Err(LogIoError::TooManySegments {
        dir: dir.to_path_buf(),
        hour: truncate_to_hour(timestamp).format("%Y-%m-%d %H:00").to_string(),
    })
}

pub async fn ensure_dir(dir: &Path) -> Result<(), LogIoError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| LogIoError::Io {
            path: PathBuf::from(dir),
            source,
        })
}
