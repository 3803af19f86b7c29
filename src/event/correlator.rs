//! # Correlator
//!
//! Demultiplexes asynchronous replies to the caller waiting for them.
//!
//! A caller [`register`](Correlator::register)s a correlation id and receives a
//! [`WaitHandle`]. The reply dispatcher calls [`resolve`](Correlator::resolve)
//! for every inbound reply. The caller suspends in [`wait`](Correlator::wait)
//! until the reply arrives or the deadline passes.
//!
//! ## Fulfillment
//!
//! Each pending request is fulfilled at most once. Resolve, timeout and cancel
//! all race to remove the entry from the map; whoever removes it wins and the
//! others become no-ops. Removal is a single atomic map operation, so a reply
//! that arrives after a timeout (or a duplicate delivery of a reply) finds no
//! entry and is dropped as an orphan.
//!
//! The map lock is only held for point reads and writes. Waiting happens on a
//! Tokio oneshot channel outside the lock.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use thiserror::Error;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, instrument, warn};

pub type CorrelationId = String;

struct PendingRequest<T> {
    /// Distinguishes this registration from a later one reusing the same id
    token: u64,
    sender: oneshot::Sender<T>,
}

type PendingMap<T> = Arc<DashMap<CorrelationId, PendingRequest<T>>>;

/// Outcome of [`Correlator::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handed to the waiting caller.
    Delivered,
    /// No pending request: late, duplicate, or never issued here. Logged and dropped.
    Orphaned,
    /// The pending request was claimed but its caller had already gone away.
    Abandoned,
}

/// Caller-side handle to one pending request.
///
/// Dropping the handle without waiting deregisters the request.
pub struct WaitHandle<T> {
    correlation_id: CorrelationId,
    token: u64,
    deadline: Instant,
    receiver: oneshot::Receiver<T>,
    pending: PendingMap<T>,
}

impl<T> WaitHandle<T> {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    fn release(&self) -> bool {
        self.pending
            .remove_if(&self.correlation_id, |_, pending| pending.token == self.token)
            .is_some()
    }
}

impl<T> Drop for WaitHandle<T> {
    fn drop(&mut self) {
        if self.release() {
            debug!(correlation_id = %self.correlation_id, "pending request dropped by caller");
        }
    }
}

impl<T> fmt::Debug for WaitHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("correlation_id", &self.correlation_id)
            .field("deadline", &self.deadline)
            .finish()
    }
}

pub struct Correlator<T> {
    pending: PendingMap<T>,
    next_token: AtomicU64,
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(0),
        }
    }
}

impl<T: Send + 'static> Correlator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pending request that expires `timeout` from now.
    ///
    /// # Errors
    ///
    /// * `CorrelationError::Duplicate` - `correlation_id` is already pending.
    ///   Correlation ids must be unique per in-flight call; this indicates a bug
    ///   in the caller.
    pub fn register(
        &self,
        correlation_id: &str,
        timeout: Duration,
    ) -> CorrelationResult<WaitHandle<T>> {
        let (sender, receiver) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;

        match self.pending.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(CorrelationError::Duplicate(correlation_id.to_string()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingRequest { token, sender });
            }
        }

        debug!(correlation_id, ?timeout, "registered pending request");
        Ok(WaitHandle {
            correlation_id: correlation_id.to_string(),
            token,
            deadline,
            receiver,
            pending: self.pending.clone(),
        })
    }

    /// Hands `payload` to the caller waiting on `correlation_id`, if any.
    ///
    /// Never fails: replies without a pending request are logged and dropped.
    pub fn resolve(&self, correlation_id: &str, payload: T) -> Resolution {
        match self.pending.remove(correlation_id) {
            Some((_, pending)) => {
                if pending.sender.send(payload).is_ok() {
                    debug!(correlation_id, "reply delivered");
                    Resolution::Delivered
                } else {
                    debug!(correlation_id, "reply arrived after caller went away");
                    Resolution::Abandoned
                }
            }
            None => {
                warn!(correlation_id, "orphan reply dropped: no pending request");
                Resolution::Orphaned
            }
        }
    }

    /// Suspends until the request behind `handle` is resolved or its deadline passes.
    ///
    /// # Errors
    ///
    /// * `CorrelationError::Timeout` - The deadline passed first. The pending
    ///   request has been removed and a later reply will be dropped.
    /// * `CorrelationError::Cancelled` - The request was cancelled while waiting.
    #[instrument(skip(self, handle), fields(correlation_id = %handle.correlation_id))]
    pub async fn wait(&self, mut handle: WaitHandle<T>) -> CorrelationResult<T> {
        let started = Instant::now();
        match tokio::time::timeout_at(handle.deadline, &mut handle.receiver).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(CorrelationError::Cancelled(handle.correlation_id.clone())),
            Err(_) => {
                if handle.release() {
                    debug!("pending request timed out");
                    return Err(CorrelationError::Timeout {
                        correlation_id: handle.correlation_id.clone(),
                        waited: started.elapsed(),
                    });
                }
                // Lost the race: a resolver or canceller already owns the sender
                // and is about to send or drop it.
                match (&mut handle.receiver).await {
                    Ok(payload) => Ok(payload),
                    Err(_) => Err(CorrelationError::Cancelled(handle.correlation_id.clone())),
                }
            }
        }
    }

    /// Removes the pending request without resolving it. Returns `false` if it
    /// had already been resolved, timed out or cancelled.
    pub fn cancel(&self, handle: WaitHandle<T>) -> bool {
        let removed = handle.release();
        if removed {
            debug!(correlation_id = %handle.correlation_id, "pending request cancelled");
        }
        removed
    }

    /// Fails every pending request. Waiters observe `CorrelationError::Cancelled`.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|e| e.key().clone()).collect();
        let cancelled = ids
            .iter()
            .filter(|id| self.pending.remove(id.as_str()).is_some())
            .count();
        if cancelled > 0 {
            warn!(cancelled, reason, "cancelled pending requests");
        }
        cancelled
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.pending.contains_key(correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("correlation id already pending: {0}")]
    Duplicate(CorrelationId),

    #[error("no reply for {correlation_id} within {waited:?}")]
    Timeout {
        correlation_id: CorrelationId,
        waited: Duration,
    },

    #[error("pending request cancelled: {0}")]
    Cancelled(CorrelationId),
}

pub type CorrelationResult<T> = Result<T, CorrelationError>;

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const LONG: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_resolve_then_wait_delivers() {
        let correlator = Correlator::new();
        let handle = correlator.register("a", LONG).unwrap();

        assert_eq!(correlator.resolve("a", 7), Resolution::Delivered);
        assert_eq!(correlator.wait(handle).await, Ok(7));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_then_resolve_from_another_task() {
        let correlator = Arc::new(Correlator::new());
        let handle = correlator.register("a", LONG).unwrap();

        let resolver = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            resolver.resolve("a", "reply".to_string());
        });

        assert_eq!(correlator.wait(handle).await, Ok("reply".to_string()));
    }

    #[test]
    fn test_duplicate_register_is_rejected() {
        let correlator = Correlator::<u8>::new();
        let _first = correlator.register("a", LONG).unwrap();
        assert_eq!(
            correlator.register("a", LONG).unwrap_err(),
            CorrelationError::Duplicate("a".to_string())
        );
        assert_eq!(correlator.pending_count(), 1);
    }

    #[test]
    fn test_resolve_unknown_is_orphaned() {
        let correlator = Correlator::new();
        assert_eq!(correlator.resolve("never", 1), Resolution::Orphaned);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_resolves_once() {
        let correlator = Correlator::new();
        let handle = correlator.register("x", LONG).unwrap();

        assert_eq!(correlator.resolve("x", 1), Resolution::Delivered);
        assert_eq!(correlator.resolve("x", 2), Resolution::Orphaned);
        assert_eq!(correlator.wait(handle).await, Ok(1));
    }

    #[tokio::test]
    async fn test_timeout_fires_after_deadline_and_drops_late_reply() {
        let correlator = Correlator::<u8>::new();
        let timeout = Duration::from_millis(100);
        let handle = correlator.register("t", timeout).unwrap();

        let started = Instant::now();
        let result = correlator.wait(handle).await;
        assert!(started.elapsed() >= timeout);
        assert!(matches!(result, Err(CorrelationError::Timeout { .. })));

        assert!(!correlator.is_pending("t"));
        assert_eq!(correlator.resolve("t", 1), Resolution::Orphaned);
    }

    #[tokio::test]
    async fn test_cancel_removes_pending_request() {
        let correlator = Correlator::<u8>::new();
        let handle = correlator.register("c", LONG).unwrap();

        assert!(correlator.cancel(handle));
        assert!(!correlator.is_pending("c"));
        assert_eq!(correlator.resolve("c", 1), Resolution::Orphaned);
    }

    #[tokio::test]
    async fn test_cancel_after_resolve_is_noop() {
        let correlator = Correlator::new();
        let handle = correlator.register("c", LONG).unwrap();
        correlator.resolve("c", 1);
        assert!(!correlator.cancel(handle));
    }

    #[test]
    fn test_dropped_handle_deregisters() {
        let correlator = Correlator::<u8>::new();
        let handle = correlator.register("d", LONG).unwrap();
        drop(handle);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn test_stale_handle_does_not_remove_new_registration() {
        let correlator = Correlator::<u8>::new();
        let first = correlator.register("r", LONG).unwrap();
        correlator.resolve("r", 1);

        let _second = correlator.register("r", LONG).unwrap();
        drop(first);
        assert!(correlator.is_pending("r"));
    }

    #[tokio::test]
    async fn test_cancel_all_fails_waiters() {
        let correlator = Arc::new(Correlator::<u8>::new());
        let first = correlator.register("a", LONG).unwrap();
        let second = correlator.register("b", LONG).unwrap();

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.wait(first).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(correlator.cancel_all("shutdown"), 2);
        assert_eq!(
            waiter.await.unwrap(),
            Err(CorrelationError::Cancelled("a".to_string()))
        );
        assert_eq!(
            correlator.wait(second).await,
            Err(CorrelationError::Cancelled("b".to_string()))
        );
    }

    #[tokio::test]
    async fn test_out_of_order_replies_route_by_id() {
        let correlator = Arc::new(Correlator::new());
        let handles: Vec<_> = (0..10)
            .map(|i| correlator.register(&format!("id-{i}"), LONG).unwrap())
            .collect();

        for i in (0..10).rev() {
            correlator.resolve(&format!("id-{i}"), i);
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(correlator.wait(handle).await, Ok(i));
        }
    }

    #[tokio::test]
    async fn test_resolve_racing_timeout_yields_exactly_one_outcome() {
        for _ in 0..50 {
            let correlator = Arc::new(Correlator::new());
            let handle = correlator.register("race", Duration::from_millis(5)).unwrap();

            let resolver = {
                let correlator = correlator.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    correlator.resolve("race", 1)
                })
            };

            let outcome = correlator.wait(handle).await;
            let resolution = resolver.await.unwrap();
            match outcome {
                Ok(1) => assert_eq!(resolution, Resolution::Delivered),
                Err(CorrelationError::Timeout { .. }) => {
                    assert_eq!(resolution, Resolution::Orphaned)
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
            assert_eq!(correlator.pending_count(), 0);
        }
    }

    proptest! {
        #[test]
        fn test_resolve_without_registration_never_panics(id in "[a-z0-9-]{1,16}", value in any::<u32>()) {
            let correlator = Correlator::new();
            prop_assert_eq!(correlator.resolve(&id, value), Resolution::Orphaned);
            prop_assert_eq!(correlator.pending_count(), 0);
        }

        #[test]
        fn test_distinct_ids_never_cross_deliver(ids in prop::collection::hash_set("[a-z]{1,8}", 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
            rt.block_on(async {
                let correlator = Correlator::new();
                let handles: Vec<_> = ids
                    .iter()
                    .map(|id| (id.clone(), correlator.register(id, LONG).unwrap()))
                    .collect();
                for id in &ids {
                    correlator.resolve(id, id.clone());
                }
                for (id, handle) in handles {
                    assert_eq!(correlator.wait(handle).await, Ok(id));
                }
            });
        }
    }
}
