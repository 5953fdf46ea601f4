//! Log Sink: ordered, non-blocking persistent logging.
//!
//! # Data Flow
//! ```text
//! LogSink::log / Logger::{info, warning, error}
//!     → bounded queue (try_send; overflow drops + rate-limited warning)
//!     → drain.rs (single loop, one message at a time)
//!         → console via tracing
//!         → directory.rs (resolve active file, rotate, append)
//!             → compression.rs (one directory at a time, N files at once)
//! ```
//!
//! # Design Decisions
//! - Callers never block and never see an error; I/O failures become
//!   `tracing::warn!` events and the line is dropped
//! - Directory state sits behind an async mutex per directory, shared by
//!   the drain loop and the compression worker
//! - A directory is only rotated while no compression pass runs over it

pub mod compression;
pub mod directory;
pub mod drain;
pub mod naming;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};

use crate::config::LoggingConfig;
use self::compression::CompressionScheduler;
use self::directory::DirectoryState;

/// Internal I/O failures. Never returned to callers of the sink.
#[derive(Debug, Error)]
pub enum LogIoError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("too many segment files for {hour} in {}", dir.display())]
    TooManySegments { dir: PathBuf, hour: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Error,
    Warning,
    Info,
    /// Written without timestamp or level prefix.
    Raw,
}

impl LogKind {
    fn label(self) -> &'static str {
        match self {
            LogKind::Error => "ERROR",
            LogKind::Warning => "WARNING",
            LogKind::Info => "INFO",
            LogKind::Raw => "",
        }
    }
}

/// Where a message goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogTargets {
    pub console: bool,
    pub server_dir: Option<PathBuf>,
    pub site_dir: Option<PathBuf>,
    /// Size threshold for rotation; zero disables it.
    pub rotate_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct LogMessage {
    pub kind: LogKind,
    pub text: String,
    pub cause: Option<String>,
    pub targets: LogTargets,
    pub timestamp: NaiveDateTime,
}

impl LogMessage {
    pub fn new(kind: LogKind, text: impl Into<String>, targets: LogTargets) -> Self {
        Self {
            kind,
            text: text.into(),
            cause: None,
            targets,
            timestamp: Local::now().naive_local(),
        }
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn at(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// File form of the message, newline terminated.
    pub fn render(&self) -> String {
        let mut line = match self.kind {
            LogKind::Raw => self.text.clone(),
            kind => format!(
                "[{}] {}: {}",
                self.timestamp.format("%Y-%m-%d %H:%M:%S"),
                kind.label(),
                self.text
            ),
        };
        line.push('\n');
        if let Some(cause) = &self.cause {
            line.push_str(&format!("    caused by: {cause}\n"));
        }
        line
    }
}

/// Sink tuning, taken from `[logging]`.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub queue_capacity: usize,
    pub overflow_warning_interval: Duration,
    pub compression_concurrency: usize,
    pub max_suffix: u32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100_000,
            overflow_warning_interval: Duration::from_secs(5),
            compression_concurrency: 4,
            max_suffix: 10,
        }
    }
}

impl From<&LoggingConfig> for SinkConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            overflow_warning_interval: Duration::from_secs(config.overflow_warning_secs),
            compression_concurrency: config.compression_concurrency.max(1),
            max_suffix: config.max_suffix.max(1),
        }
    }
}

/// State shared by the sink handle, the drain loop and the compressor.
#[derive(Debug)]
pub(crate) struct SinkShared {
    pub(crate) config: SinkConfig,
    directories: DashMap<PathBuf, Arc<Mutex<DirectoryState>>>,
    /// Messages accepted but not yet delivered.
    pub(crate) pending: AtomicUsize,
    dropped: AtomicU64,
    overflow_warnings: AtomicU64,
    last_overflow_warning: StdMutex<Option<Instant>>,
    pub(crate) compression: CompressionScheduler,
    terminating: AtomicBool,
    terminated: watch::Sender<bool>,
}

impl SinkShared {
    pub(crate) fn directory(&self, dir: &Path) -> Arc<Mutex<DirectoryState>> {
        self.directories
            .entry(dir.to_path_buf())
            .or_default()
            .clone()
    }
}

/// Process-wide log sink handle. Cheap to clone.
#[derive(Clone)]
pub struct LogSink {
    shared: Arc<SinkShared>,
    tx: mpsc::Sender<LogMessage>,
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("pending", &self.shared.pending.load(Ordering::Relaxed))
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl LogSink {
    /// Create the sink and spawn its drain loop. Requires a Tokio runtime.
    pub fn start(config: SinkConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (terminated, _) = watch::channel(false);
        let shared = Arc::new(SinkShared {
            config,
            directories: DashMap::new(),
            pending: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            overflow_warnings: AtomicU64::new(0),
            last_overflow_warning: StdMutex::new(None),
            compression: CompressionScheduler::new(),
            terminating: AtomicBool::new(false),
            terminated,
        });
        tokio::spawn(drain::run(shared.clone(), rx));
        Self { shared, tx }
    }

    pub fn log(&self, kind: LogKind, text: impl Into<String>, targets: &LogTargets) {
        self.submit(LogMessage::new(kind, text, targets.clone()));
    }

    /// Enqueue a message. Never blocks; drops on overflow.
    pub fn submit(&self, message: LogMessage) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
                self.on_overflow();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    fn on_overflow(&self) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        crate::observability::metrics::record_log_dropped();

        let Ok(mut last) = self.shared.last_overflow_warning.lock() else {
            return;
        };
        let interval = self.shared.config.overflow_warning_interval;
        if last.map(|t| t.elapsed() >= interval).unwrap_or(true) {
            *last = Some(Instant::now());
            self.shared.overflow_warnings.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                dropped = self.dropped(),
                capacity = self.shared.config.queue_capacity,
                "Log queue full, dropping messages"
            );
        }
    }

    /// Messages dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Overflow warnings emitted so far.
    pub fn overflow_warnings(&self) -> u64 {
        self.shared.overflow_warnings.load(Ordering::Relaxed)
    }

    fn is_idle(&self) -> bool {
        self.shared.pending.load(Ordering::Acquire) == 0 && self.shared.compression.is_idle()
    }

    /// Wait until every accepted message is written and no compression runs.
    pub async fn flush(&self) {
        while !self.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop compression intake, drain the queue and close every file.
    ///
    /// Later calls log a notice and wait for the first one to finish.
    pub async fn terminate(&self) {
        if self.shared.terminating.swap(true, Ordering::AcqRel) {
            tracing::info!("Log sink is already shutting down");
            let mut done = self.shared.terminated.subscribe();
            let _ = done.wait_for(|closed| *closed).await;
            return;
        }

        self.shared.compression.stop_accepting();
        self.flush().await;

        let states: Vec<_> = self
            .shared
            .directories
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (dir, state) in states {
            if let Err(e) = state.lock().await.close().await {
                tracing::warn!(directory = %dir.display(), error = %e, "Failed to close log file");
            }
        }

        self.shared.terminated.send_replace(true);
        tracing::info!("Log sink terminated");
    }

    /// Active file name for `dir`, if it has been written to.
    pub async fn current_file(&self, dir: &Path) -> Option<String> {
        let state = self.shared.directories.get(dir)?.value().clone();
        let name = state.lock().await.current.clone();
        name
    }
}

/// A sink bound to fixed targets, handed to sites and requests.
#[derive(Debug, Clone)]
pub struct Logger {
    sink: LogSink,
    targets: LogTargets,
}

impl Logger {
    pub fn new(sink: LogSink, targets: LogTargets) -> Self {
        Self { sink, targets }
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn targets(&self) -> &LogTargets {
        &self.targets
    }

    pub fn info(&self, text: impl Into<String>) {
        self.sink.log(LogKind::Info, text, &self.targets);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.sink.log(LogKind::Warning, text, &self.targets);
    }

    pub fn error(&self, text: impl Into<String>, cause: Option<&dyn fmt::Display>) {
        let mut message = LogMessage::new(LogKind::Error, text, self.targets.clone());
        if let Some(cause) = cause {
            message = message.with_cause(cause);
        }
        self.sink.submit(message);
    }

    pub fn raw(&self, text: impl Into<String>) {
        self.sink.log(LogKind::Raw, text, &self.targets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stamp(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap()
    }

    fn file_targets(dir: &Path, rotate_bytes: u64) -> LogTargets {
        LogTargets {
            console: false,
            server_dir: Some(dir.to_path_buf()),
            site_dir: None,
            rotate_bytes,
        }
    }

    #[test]
    fn test_render_formats() {
        let targets = LogTargets::default();
        let line = LogMessage::new(LogKind::Warning, "disk low", targets.clone())
            .at(stamp(3))
            .with_cause("quota")
            .render();
        assert_eq!(
            line,
            "[2024-06-01 10:03:00] WARNING: disk low\n    caused by: quota\n"
        );

        let raw = LogMessage::new(LogKind::Raw, "GET / 200", targets).render();
        assert_eq!(raw, "GET / 200\n");
    }

    #[tokio::test]
    async fn test_messages_written_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::start(SinkConfig::default());
        let targets = file_targets(dir.path(), 0);
        for i in 1..=3 {
            sink.submit(LogMessage::new(LogKind::Info, format!("m{i}"), targets.clone()).at(stamp(0)));
        }
        sink.flush().await;

        let text = std::fs::read_to_string(dir.path().join("jsc_2024-06-01_10-00-00.log")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[2024-06-01 10:00:00] INFO: m1",
                "[2024-06-01 10:00:00] INFO: m2",
                "[2024-06-01 10:00:00] INFO: m3",
            ]
        );
    }

    #[tokio::test]
    async fn test_same_directory_targets_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::start(SinkConfig::default());
        let mut targets = file_targets(dir.path(), 0);
        targets.site_dir = targets.server_dir.clone();
        sink.submit(LogMessage::new(LogKind::Raw, "once", targets).at(stamp(0)));
        sink.flush().await;

        let text = std::fs::read_to_string(dir.path().join("jsc_2024-06-01_10-00-00.log")).unwrap();
        assert_eq!(text, "once\n");
    }

    #[tokio::test]
    async fn test_rotation_compresses_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::start(SinkConfig::default());
        let targets = file_targets(dir.path(), 64);

        sink.submit(LogMessage::new(LogKind::Raw, "x".repeat(80), targets.clone()).at(stamp(0)));
        sink.flush().await;
        sink.submit(LogMessage::new(LogKind::Raw, "next", targets.clone()).at(stamp(1)));
        sink.flush().await;

        assert_eq!(
            sink.current_file(dir.path()).await.as_deref(),
            Some("jsc_2024-06-01_10-00-00--1.log")
        );
        assert!(dir.path().join("jsc_2024-06-01_10-00-00.log.gz").exists());
        assert!(!dir.path().join("jsc_2024-06-01_10-00-00.log").exists());
        let text = std::fs::read_to_string(dir.path().join("jsc_2024-06-01_10-00-00--1.log")).unwrap();
        assert_eq!(text, "next\n");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_overflow_drops_and_warns_once() {
        let sink = LogSink::start(SinkConfig {
            queue_capacity: 1,
            ..Default::default()
        });
        let targets = LogTargets::default();
        // The drain loop cannot run until this task yields.
        for i in 0..100 {
            sink.log(LogKind::Info, format!("m{i}"), &targets);
        }
        assert_eq!(sink.dropped(), 99);
        assert_eq!(sink.overflow_warnings(), 1);
        sink.flush().await;
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::start(SinkConfig::default());
        sink.log(LogKind::Info, "before shutdown", &file_targets(dir.path(), 0));

        let second = sink.clone();
        tokio::join!(sink.terminate(), second.terminate());
        sink.terminate().await;

        assert_eq!(sink.shared.pending.load(Ordering::Acquire), 0);
        let state = sink.shared.directory(dir.path());
        assert!(state.lock().await.file.is_none());
    }
}
