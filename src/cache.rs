//! Expiring memoization cache.
//!
//! Every entry carries its own TTL. [`ExpiringCache::get_or_set`] stores the
//! pending computation itself, so concurrent callers for the same key await
//! one shared future instead of issuing duplicate requests. A pending entry
//! never expires; its TTL starts once the computation succeeds.

use std::{
    future::Future,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry as MapEntry};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tokio::{task::AbortHandle, time::Instant};
use tracing::trace;

use crate::common::errors::Result;

/// TTL used for recently fetched metadata.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// TTL used for session-identity tokens.
pub const IDENTITY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

enum Slot<V> {
    Ready(V),
    Pending(SharedResult<V>),
}

struct Entry<V> {
    slot: Slot<V>,
    /// `None` while the computation is pending.
    expires_at: Option<Instant>,
    generation: u64,
    timer: Option<AbortHandle>,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

impl<V> Drop for Entry<V> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner<K, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: Duration,
    next_generation: AtomicU64,
}

/// Key/value store whose entries disappear `ttl` after they were last set.
///
/// Cloning is cheap and yields a handle to the same store. Purge timers only
/// hold a weak reference, so a dropped cache takes its timers with it.
pub struct ExpiringCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ExpiringCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                ttl,
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Stores `value`, replacing any previous entry and restarting its timer.
    pub fn set(&self, key: K, value: V) {
        let entry = self.ready_entry(&key, value);
        // The replaced entry aborts its own timer when dropped.
        self.inner.entries.insert(key, entry);
    }

    /// Returns the value for `key` if present.
    ///
    /// A computation started by [`get_or_set`](Self::get_or_set) that has not
    /// settled yet reads as absent; a settled one reads as its value.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.inner.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.purge_expired(key);
            return None;
        }
        match &entry.slot {
            Slot::Ready(value) => Some(value.clone()),
            Slot::Pending(fut) => fut.peek().and_then(|r| r.as_ref().ok().cloned()),
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        match self.inner.entries.get(key) {
            Some(entry) if !entry.is_expired() => true,
            Some(entry) => {
                drop(entry);
                self.purge_expired(key);
                false
            }
            None => false,
        }
    }

    /// Returns the cached value for `key`, or runs `factory` to produce it.
    ///
    /// `factory` runs at most once per key while its computation is in
    /// flight; every concurrent caller awaits the same result. A failed
    /// computation is purged so the next call retries instead of replaying
    /// the failure.
    pub async fn get_or_set<F, Fut>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (generation, pending) = match self.inner.entries.entry(key.clone()) {
            MapEntry::Occupied(occupied) if !occupied.get().is_expired() => {
                let entry = occupied.get();
                match &entry.slot {
                    Slot::Ready(value) => return Ok(value.clone()),
                    Slot::Pending(fut) => (entry.generation, fut.clone()),
                }
            }
            map_entry => {
                trace!("cache miss, starting computation");
                let fut: BoxFuture<'static, Result<V>> = async move { factory().await }.boxed();
                let pending = fut.shared();
                let entry = self.pending_entry(pending.clone());
                let generation = entry.generation;
                match map_entry {
                    MapEntry::Occupied(mut occupied) => {
                        occupied.insert(entry);
                    }
                    MapEntry::Vacant(vacant) => {
                        vacant.insert(entry);
                    }
                }
                (generation, pending)
            }
        };

        let result = pending.await;
        match &result {
            Ok(value) => self.settle(&key, generation, value.clone()),
            Err(_) => {
                self.inner
                    .entries
                    .remove_if(&key, |_, entry| entry.generation == generation);
            }
        }
        result
    }

    /// Removes `key`, cancelling its timer. Returns whether an entry existed.
    pub fn delete(&self, key: &K) -> bool {
        self.inner.entries.remove(key).is_some()
    }

    /// Removes every entry and cancels every timer.
    pub fn clear(&self) {
        self.inner.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn next_generation(&self) -> u64 {
        self.inner.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    fn ready_entry(&self, key: &K, value: V) -> Entry<V> {
        let generation = self.next_generation();
        Entry {
            slot: Slot::Ready(value),
            expires_at: Some(Instant::now() + self.inner.ttl),
            generation,
            timer: self.spawn_purge(key.clone(), generation),
        }
    }

    fn pending_entry(&self, pending: SharedResult<V>) -> Entry<V> {
        Entry {
            slot: Slot::Pending(pending),
            expires_at: None,
            generation: self.next_generation(),
            timer: None,
        }
    }

    /// Turns the pending entry of `generation` into a ready one and starts its
    /// TTL. Only the first caller to observe the result does so.
    fn settle(&self, key: &K, generation: u64, value: V) {
        let Some(mut entry) = self.inner.entries.get_mut(key) else {
            return;
        };
        if entry.generation != generation || !matches!(entry.slot, Slot::Pending(_)) {
            return;
        }
        entry.slot = Slot::Ready(value);
        entry.expires_at = Some(Instant::now() + self.inner.ttl);
        entry.timer = self.spawn_purge(key.clone(), generation);
    }

    fn purge_expired(&self, key: &K) {
        self.inner.entries.remove_if(key, |_, entry| entry.is_expired());
    }

    /// Schedules removal of `key` once the TTL elapses. Outside a runtime the
    /// entry is only expired lazily on the next lookup.
    fn spawn_purge(&self, key: K, generation: u64) -> Option<AbortHandle> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let weak = Arc::downgrade(&self.inner);
        let ttl = self.inner.ttl;
        let task = handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = weak.upgrade() {
                inner
                    .entries
                    .remove_if(&key, |_, entry| entry.generation == generation);
            }
        });
        Some(task.abort_handle())
    }
}
