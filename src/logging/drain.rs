//! The single drain loop.
//!
//! Messages are taken from the queue one at a time. Each message is fully
//! delivered (console, then every file target) before the next one is
//! taken, so lines are never interleaved or reordered per destination.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::logging::compression::CompressionScheduler;
use crate::logging::directory::{ensure_dir, resolve_file_name};
use crate::logging::{LogIoError, LogKind, LogMessage, SinkShared};

pub(crate) async fn run(shared: Arc<SinkShared>, mut rx: mpsc::Receiver<LogMessage>) {
    while let Some(message) = rx.recv().await {
        deliver(&shared, &message).await;
        shared.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

async fn deliver(shared: &Arc<SinkShared>, message: &LogMessage) {
    if message.targets.console {
        to_console(message);
    }

    let mut dirs: Vec<&Path> = Vec::with_capacity(2);
    for dir in [&message.targets.server_dir, &message.targets.site_dir]
        .into_iter()
        .flatten()
    {
        if !dirs.contains(&dir.as_path()) {
            dirs.push(dir);
        }
    }

    if dirs.is_empty() {
        return;
    }
    let line = message.render();
    for dir in dirs {
        if let Err(e) = write_line(shared, dir, message, line.as_bytes()).await {
            tracing::warn!(directory = %dir.display(), error = %e, "Dropped log line");
        }
    }
}

fn to_console(message: &LogMessage) {
    let text = &message.text;
    match (&message.kind, &message.cause) {
        (LogKind::Error, Some(cause)) => tracing::error!(cause = %cause, "{}", text),
        (LogKind::Error, None) => tracing::error!("{}", text),
        (LogKind::Warning, Some(cause)) => tracing::warn!(cause = %cause, "{}", text),
        (LogKind::Warning, None) => tracing::warn!("{}", text),
        (LogKind::Info | LogKind::Raw, _) => tracing::info!("{}", text),
    }
}

/// Resolve the active file for `dir`, rotating if allowed, then append.
async fn write_line(
    shared: &Arc<SinkShared>,
    dir: &Path,
    message: &LogMessage,
    bytes: &[u8],
) -> Result<(), LogIoError> {
    let state = shared.directory(dir);
    let mut guard = state.lock().await;

    if guard.current.is_none() {
        ensure_dir(dir).await?;
    }
    let resolved = resolve_file_name(
        dir,
        message.timestamp,
        message.targets.rotate_bytes,
        shared.config.max_suffix,
    )
    .await?;

    if guard.current.as_deref() != Some(resolved.as_str()) {
        if guard.current.is_none() || !guard.is_compressing() {
            let previous = guard.current.replace(resolved.clone());
            if let Err(e) = guard.close().await {
                tracing::warn!(directory = %dir.display(), error = %e, "Failed to close rotated log file");
            }
            tracing::debug!(
                directory = %dir.display(),
                previous = ?previous,
                current = %resolved,
                "Log file rotated"
            );
            drop(guard);
            CompressionScheduler::schedule(shared, dir.to_path_buf());
            guard = state.lock().await;
        }
        // Otherwise keep writing to the previous file until the
        // directory's compression pass finishes.
    }

    guard.append(dir, bytes).await
}
