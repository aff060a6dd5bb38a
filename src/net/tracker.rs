//! Open-connection accounting for graceful shutdown.
//!
//! # Responsibilities
//! - Count connections handed out by the listener
//! - Generate unique connection IDs for tracing
//! - Fire a one-shot "drained" signal once shutdown has begun and the count hits zero
//!
//! # Design Decisions
//! - Counter and shutdown flag are plain atomics (SeqCst on both sides), so the
//!   decrement that observes zero is the same step that decides to fire
//! - The drained signal is a watch channel guarded by a fire-once flag; any number
//!   of waiters can observe it, late waiters included

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug)]
struct TrackerState {
    open_count: AtomicU64,
    shutting_down: AtomicBool,
    fired: AtomicBool,
    drained_tx: watch::Sender<bool>,
}

impl TrackerState {
    fn decrement(&self) {
        let previous = self.open_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "connection count underflow");

        if previous == 1 && self.shutting_down.load(Ordering::SeqCst) {
            self.fire_drained();
        }
    }

    fn fire_drained(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        self.drained_tx.send_replace(true);
        tracing::debug!("All tracked connections drained");
    }
}

/// Tracks open connections for graceful shutdown.
///
/// Cloning yields another handle to the same counter.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: Arc<TrackerState>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        let (drained_tx, _) = watch::channel(false);
        Self {
            state: Arc::new(TrackerState {
                open_count: AtomicU64::new(0),
                shutting_down: AtomicBool::new(false),
                fired: AtomicBool::new(false),
                drained_tx,
            }),
        }
    }

    /// Record a new open connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.state.open_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            state: Arc::clone(&self.state),
            id: ConnectionId::new(),
        }
    }

    /// Mark the start of shutdown.
    ///
    /// Only the first call has any effect and returns `true`. If no connection is
    /// open at that point the drained signal fires immediately.
    pub fn begin_shutdown(&self) -> bool {
        if self
            .state
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let open = self.state.open_count.load(Ordering::SeqCst);
        tracing::debug!(open_connections = open, "Connection tracker shutting down");
        if open == 0 {
            self.state.fire_drained();
        }
        true
    }

    /// Wait until the drained signal fires or `timeout` elapses.
    ///
    /// Returns `true` if the tracker drained, `false` on timeout.
    pub async fn wait_drained(&self, timeout: Duration) -> bool {
        let mut drained = self.state.drained_tx.subscribe();
        let fired = matches!(
            tokio::time::timeout(timeout, drained.wait_for(|fired| *fired)).await,
            Ok(Ok(_))
        );
        fired
    }

    /// Get current open connection count.
    pub fn open_count(&self) -> u64 {
        self.state.open_count.load(Ordering::SeqCst)
    }

    /// Whether the drained signal has fired.
    pub fn is_drained(&self) -> bool {
        *self.state.drained_tx.borrow()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements the open count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    state: Arc<TrackerState>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.decrement();
        tracing::trace!(connection_id = %self.id, "Connection released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.open_count(), 0);

        let guard1 = tracker.track();
        assert_eq!(tracker.open_count(), 1);

        let guard2 = tracker.track();
        assert_eq!(tracker.open_count(), 2);

        drop(guard1);
        assert_eq!(tracker.open_count(), 1);

        drop(guard2);
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn zero_count_without_shutdown_does_not_drain() {
        let tracker = ConnectionTracker::new();
        drop(tracker.track());
        assert_eq!(tracker.open_count(), 0);
        assert!(!tracker.is_drained());
    }

    #[tokio::test]
    async fn shutdown_with_no_connections_drains_immediately() {
        let tracker = ConnectionTracker::new();
        assert!(tracker.begin_shutdown());
        assert!(tracker.is_drained());

        let start = Instant::now();
        assert!(tracker.wait_drained(Duration::from_secs(5)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn drains_only_after_last_release() {
        let tracker = ConnectionTracker::new();
        let mut guards: Vec<_> = (0..5).map(|_| tracker.track()).collect();

        tracker.begin_shutdown();
        while guards.len() > 1 {
            guards.pop();
            assert!(!tracker.is_drained());
        }
        assert!(!tracker.wait_drained(Duration::from_millis(20)).await);

        guards.pop();
        assert!(tracker.is_drained());
        assert!(tracker.wait_drained(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn wait_times_out_while_connection_open() {
        let tracker = ConnectionTracker::new();
        let _guard = tracker.track();
        tracker.begin_shutdown();

        let start = Instant::now();
        assert!(!tracker.wait_drained(Duration::from_millis(50)).await);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn second_begin_shutdown_is_a_no_op() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();
        assert!(tracker.begin_shutdown());
        assert!(!tracker.begin_shutdown());
        assert!(!tracker.is_drained());
        drop(guard);
        assert!(tracker.is_drained());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_begin_shutdown_single_transition() {
        let tracker = ConnectionTracker::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move { tracker.begin_shutdown() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(tracker.is_drained());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_releases_drain_exactly_when_all_closed() {
        let tracker = ConnectionTracker::new();
        let n = 64;
        let guards: Vec<_> = (0..n).map(|_| tracker.track()).collect();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_drained(Duration::from_secs(5)).await })
        };

        let mut handles = Vec::new();
        for (i, guard) in guards.into_iter().enumerate() {
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis((i % 8) as u64)).await;
                drop(guard);
            }));
            if i == n / 2 {
                tracker.begin_shutdown();
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(waiter.await.unwrap());
        assert_eq!(tracker.open_count(), 0);
        assert!(tracker.is_drained());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn churn_with_shutdown_never_drains_early() {
        let tracker = ConnectionTracker::new();
        // Held open for the whole test; drained must not fire before it goes.
        let anchor = tracker.track();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let guard = tracker.track();
                    tokio::task::yield_now().await;
                    drop(guard);
                }
            }));
        }
        tracker.begin_shutdown();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(!tracker.is_drained());
        drop(anchor);
        assert!(tracker.is_drained());
    }
}
