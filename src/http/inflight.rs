//! In-flight request tracking for graceful shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Global counter for request sequence numbers used in trace output.
static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestSeq(u64);

impl RequestSeq {
    pub fn next() -> Self {
        Self(REQUEST_SEQ.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Counts requests between dispatch and response, shared by every port.
#[derive(Debug, Clone, Default)]
pub struct RequestTracker {
    active: Arc<AtomicU64>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a guard that decrements on drop.
    pub fn track(&self) -> RequestGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            active: Arc::clone(&self.active),
            seq: RequestSeq::next(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait until no request is in flight, or `grace` elapses.
    /// Returns whether everything drained.
    pub async fn drain(&self, grace: Duration) -> bool {
        let wait = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(grace, wait).await.is_ok()
    }
}

#[derive(Debug)]
pub struct RequestGuard {
    active: Arc<AtomicU64>,
    seq: RequestSeq,
}

impl RequestGuard {
    pub fn seq(&self) -> RequestSeq {
        self.seq
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(request = %self.seq, "Request finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_seq_unique() {
        assert_ne!(RequestSeq::next(), RequestSeq::next());
    }

    #[test]
    fn tracker_counts() {
        let tracker = RequestTracker::new();
        let a = tracker.track();
        let b = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        drop(a);
        assert_eq!(tracker.active_count(), 1);
        drop(b);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_times_out_while_busy() {
        let tracker = RequestTracker::new();
        let guard = tracker.track();
        assert!(!tracker.drain(Duration::from_millis(60)).await);
        drop(guard);
        assert!(tracker.drain(Duration::from_millis(60)).await);
    }
}
