//! In-flight fetch registry.
//!
//! Maps a cache key to the shared future of the one fetch running for it.
//! Registration happens under a synchronous lock with no `.await` in between
//! the lookup and the insert, so two callers can never both see an empty slot
//! and start a second fetch for the same key.
//!
//! Every registration carries a unique id. A fetch only completes the
//! registration it created: once a key has been invalidated (or replaced by a
//! newer fetch), the old fetch's `complete` is a no-op and reports `false`.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use warden_core::{CacheKey, WardenError, WardenResult};

/// Outcome future shared by every caller joined to one fetch.
pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, WardenResult<T>>>;

struct PendingFetch<T> {
    id: u64,
    task: SharedFetch<T>,
}

/// Whether a caller started a fetch or joined one already in flight.
pub(crate) enum Registration<T> {
    Started(SharedFetch<T>),
    Joined(SharedFetch<T>),
}

impl<T> Registration<T> {
    pub(crate) fn is_joined(&self) -> bool {
        matches!(self, Self::Joined(_))
    }

    pub(crate) fn into_task(self) -> SharedFetch<T> {
        match self {
            Self::Started(task) | Self::Joined(task) => task,
        }
    }
}

/// Per-instance map of fetches in flight.
pub(crate) struct InflightRegistry<T> {
    pending: Mutex<HashMap<CacheKey, PendingFetch<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for InflightRegistry<T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Join the fetch in flight for `key`, or start one with `start`.
    ///
    /// `start` receives the new registration id and must not block; it runs
    /// while the registry lock is held.
    pub(crate) fn join_or_start<F>(&self, key: &CacheKey, start: F) -> Registration<T>
    where
        F: FnOnce(u64) -> BoxFuture<'static, WardenResult<T>>,
    {
        let mut pending = self.pending();
        if let Some(existing) = pending.get(key) {
            return Registration::Joined(existing.task.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = start(id).shared();
        pending.insert(
            key.clone(),
            PendingFetch {
                id,
                task: task.clone(),
            },
        );
        Registration::Started(task)
    }

    /// Whether registration `id` still owns `key`.
    pub(crate) fn is_current(&self, key: &CacheKey, id: u64) -> bool {
        self.pending()
            .get(key)
            .is_some_and(|pending| pending.id == id)
    }

    /// Remove registration `id` for `key`. Returns `false` when it was
    /// already gone.
    pub(crate) fn complete(&self, key: &CacheKey, id: u64) -> bool {
        let mut pending = self.pending();
        match pending.get(key) {
            Some(current) if current.id == id => {
                pending.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Drop whatever registration exists for `key`. The fetch keeps running
    /// but will no longer write its result.
    pub(crate) fn cancel(&self, key: &CacheKey) -> bool {
        self.pending().remove(key).is_some()
    }

    pub(crate) fn cancel_all(&self) -> usize {
        let mut pending = self.pending();
        let count = pending.len();
        pending.clear();
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<CacheKey, PendingFetch<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `work` on its own task and expose its outcome as a boxed future.
///
/// The work keeps running when every caller stops waiting. A failed join
/// (runtime shutdown) surfaces as [`WardenError::FetchAborted`].
pub(crate) fn spawn_fetch<T, Fut>(key: &CacheKey, work: Fut) -> BoxFuture<'static, WardenResult<T>>
where
    T: Send + 'static,
    Fut: std::future::Future<Output = WardenResult<T>> + Send + 'static,
{
    let handle = tokio::spawn(work);
    let key = key.to_string();
    async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(WardenError::FetchAborted {
                key,
                reason: e.to_string(),
            }),
        }
    }
    .boxed()
}

/// Await a caller's fetch, turning a panic into an error.
pub(crate) async fn catch_fetch<Fut, T, E>(fetch: Fut) -> Result<Result<T, E>, String>
where
    Fut: std::future::Future<Output = Result<T, E>>,
{
    AssertUnwindSafe(fetch).catch_unwind().await.map_err(|panic| {
        if let Some(message) = panic.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = panic.downcast_ref::<String>() {
            message.clone()
        } else {
            "fetch panicked".to_string()
        }
    })
}
