//! In-flight request deduplication.
//!
//! The first caller for a key becomes the leader: its work is spawned as a
//! task and its result is broadcast to every caller that joined while it was
//! running. The entry is removed by the task itself right before the result
//! is broadcast, so a completed execution is never shared with later callers
//! and errors are never cached.
//!
//! A panic in the shared work is caught and reported to every subscriber as
//! [`Error::Internal`].
//!
//! Subscribers are counted. Dropping a wait (caller cancelled or timed out)
//! only releases that subscriber; the task is aborted once nobody is left.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use courier_core::CacheKey;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Whether the caller ran the work or waited on someone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Joiner,
}

struct InflightEntry<T> {
    id: u64,
    sender: broadcast::Sender<Result<T>>,
    subscribers: usize,
    task: AbortHandle,
}

/// Map of outstanding executions keyed by in-flight key.
pub struct InflightMap<T> {
    entries: Arc<DashMap<CacheKey, InflightEntry<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for InflightMap<T> {
    fn default() -> Self {
        InflightMap {
            entries: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T> std::fmt::Debug for InflightMap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflightMap")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<T> InflightMap<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding executions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs `work` for `key`, or joins the execution already running for it.
    ///
    /// `work` is only invoked by the leader. A joiner's wait is bounded by
    /// `wait`; expiring it fails that joiner with [`Error::Timeout`] and leaves
    /// the shared execution running.
    pub async fn run<F, Fut>(
        &self,
        key: CacheKey,
        wait: Option<Duration>,
        work: F,
    ) -> (Role, Result<T>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (role, id, mut rx) = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.subscribers += 1;
                trace!(%key, subscribers = entry.subscribers, "joining in-flight request");
                (Role::Joiner, entry.id, entry.sender.subscribe())
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (sender, rx) = broadcast::channel(1);
                let task = tokio::spawn({
                    let work = work();
                    let entries = self.entries.clone();
                    let sender = sender.clone();
                    let key = key.clone();
                    async move {
                        let result = AssertUnwindSafe(work)
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                warn!(%key, "shared execution panicked");
                                Err(Error::Internal("shared execution panicked".into()))
                            });
                        entries.remove_if(&key, |_, entry| entry.id == id);
                        // No receivers left is fine: nobody is waiting.
                        let _ = sender.send(result);
                    }
                });
                vacant.insert(InflightEntry {
                    id,
                    sender,
                    subscribers: 1,
                    task: task.abort_handle(),
                });
                trace!(%key, "leading in-flight request");
                (Role::Leader, id, rx)
            }
        };

        let guard = Subscriber {
            entries: &self.entries,
            key,
            id,
        };
        let received = match (role, wait) {
            (Role::Joiner, Some(limit)) => match tokio::time::timeout(limit, rx.recv()).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(key = %guard.key, ?limit, "gave up waiting on in-flight request");
                    return (role, Err(Error::Timeout { after: limit }));
                }
            },
            _ => rx.recv().await,
        };
        drop(guard);

        let result = match received {
            Ok(result) => result,
            Err(RecvError::Closed) => Err(Error::Internal(
                "shared execution ended without a result".into(),
            )),
            Err(RecvError::Lagged(_)) => Err(Error::Internal(
                "shared execution result was overwritten".into(),
            )),
        };
        (role, result)
    }
}

/// Releases one subscription; the last one aborts the execution.
struct Subscriber<'a, T> {
    entries: &'a DashMap<CacheKey, InflightEntry<T>>,
    key: CacheKey,
    id: u64,
}

impl<T> Drop for Subscriber<'_, T> {
    fn drop(&mut self) {
        if let Entry::Occupied(mut occupied) = self.entries.entry(self.key.clone()) {
            if occupied.get().id != self.id {
                return;
            }
            let entry = occupied.get_mut();
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                let entry = occupied.remove();
                entry.task.abort();
                debug!(key = %self.key, "last subscriber left, in-flight request aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32};

    use futures::future::join_all;

    use super::*;

    fn key() -> CacheKey {
        CacheKey::from_raw("GET http://upstream/items")
    }

    fn counted(
        calls: &Arc<AtomicU32>,
        delay: Duration,
        value: u32,
    ) -> impl FnOnce() -> std::pin::Pin<Box<dyn Future<Output = Result<u32>> + Send>> + use<> {
        let calls = calls.clone();
        move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                Ok(value)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_execution() {
        let map = InflightMap::new();
        let calls = Arc::new(AtomicU32::new(0));

        let results = join_all((0..5).map(|i| {
            map.run(key(), None, counted(&calls, Duration::from_millis(50), i))
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results[0].0, Role::Leader);
        for (role, result) in &results[1..] {
            assert_eq!(*role, Role::Joiner);
            assert_eq!(*result.as_ref().unwrap(), 0);
        }
        assert!(map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completed_execution_is_not_shared() {
        let map = InflightMap::new();
        let calls = Arc::new(AtomicU32::new(0));

        let (first, _) = map
            .run(key(), None, counted(&calls, Duration::from_millis(10), 1))
            .await;
        let (second, value) = map
            .run(key(), None, counted(&calls, Duration::from_millis(10), 2))
            .await;

        assert_eq!((first, second), (Role::Leader, Role::Leader));
        assert_eq!(value.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_reach_every_subscriber_and_are_not_kept() {
        let map: InflightMap<u32> = InflightMap::new();
        let failing = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(Error::Internal("upstream exploded".into()))
        };

        let (a, b) = tokio::join!(map.run(key(), None, failing), map.run(key(), None, failing));

        assert!(matches!(a.1, Err(Error::Internal(_))));
        assert!(matches!(b.1, Err(Error::Internal(_))));
        assert!(map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_subscriber_does_not_cancel_others() {
        let map = Arc::new(InflightMap::new());
        let calls = Arc::new(AtomicU32::new(0));

        let leader = tokio::spawn({
            let map = map.clone();
            let work = counted(&calls, Duration::from_millis(100), 7);
            async move { map.run(key(), None, work).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        let joiner = tokio::spawn({
            let map = map.clone();
            let work = counted(&calls, Duration::from_millis(100), 8);
            async move { map.run(key(), None, work).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        leader.abort();
        let (role, value) = joiner.await.unwrap();

        assert_eq!(role, Role::Joiner);
        assert_eq!(value.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_work_fails_every_subscriber() {
        async fn explode() -> Result<u32> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            panic!("transport exploded")
        }
        let map: InflightMap<u32> = InflightMap::new();

        let (a, b) = tokio::join!(
            map.run(key(), None, explode),
            map.run(key(), None, explode)
        );

        assert!(matches!(a.1, Err(Error::Internal(_))));
        assert!(matches!(b.1, Err(Error::Internal(_))));
        assert!(map.is_empty());

        let calls = Arc::new(AtomicU32::new(0));
        let (role, value) = map
            .run(key(), None, counted(&calls, Duration::from_millis(1), 9))
            .await;
        assert_eq!((role, value.unwrap()), (Role::Leader, 9));
    }

    #[tokio::test(start_paused = true)]
    async fn last_subscriber_leaving_aborts_execution() {
        let map: Arc<InflightMap<u32>> = Arc::new(InflightMap::new());
        let finished = Arc::new(AtomicBool::new(false));

        let caller = tokio::spawn({
            let map = map.clone();
            let finished = finished.clone();
            async move {
                map.run(key(), None, move || async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    finished.store(true, Ordering::SeqCst);
                    Ok(1)
                })
                .await
            }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(map.len(), 1);

        caller.abort();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(!finished.load(Ordering::SeqCst));
        assert!(map.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn joiner_timeout_is_local() {
        let map = InflightMap::new();
        let calls = Arc::new(AtomicU32::new(0));

        let (leader, joiner) = tokio::join!(
            map.run(key(), None, counted(&calls, Duration::from_millis(100), 3)),
            map.run(
                key(),
                Some(Duration::from_millis(10)),
                counted(&calls, Duration::from_millis(100), 4)
            ),
        );

        assert!(matches!(joiner.1, Err(Error::Timeout { .. })));
        assert_eq!(leader.1.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
