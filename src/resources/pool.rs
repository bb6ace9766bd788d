//! # Keyed Resource Pool
//!
//! One slot per key, each guarded by its own async mutex. Holding the slot lock
//! across the factory call means concurrent first acquisitions of the same key
//! construct exactly one instance; everyone else observes a pool hit.

use dashmap::DashMap;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::stats::ResourceCounters;
use crate::error::{HostError, Result};

/// A pooled value with its bookkeeping
#[derive(Debug)]
pub struct PooledResource<T: ?Sized> {
    pub resource: Arc<T>,
    pub created_at: Instant,
    pub last_used: Instant,
    pub expires_at: Instant,
    pub use_count: u64,
}

impl<T: ?Sized> PooledResource<T> {
    pub fn new(resource: Arc<T>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            resource,
            created_at: now,
            last_used: now,
            expires_at: now + ttl,
            use_count: 1,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    /// `max_uses` is the last permitted use; an entry at the ceiling is not handed out again
    pub fn is_worn_out(&self, max_uses: u64) -> bool {
        self.use_count >= max_uses
    }

    pub fn is_reusable(&self, now: Instant, max_uses: u64) -> bool {
        !self.is_expired(now) && !self.is_worn_out(max_uses)
    }
}

type ErasedResource = PooledResource<dyn Any + Send + Sync>;

/// Read-only view of a pooled entry
#[derive(Debug, Clone, Serialize)]
pub struct PooledResourceInfo {
    pub key: String,
    pub age_ms: u64,
    pub idle_ms: u64,
    pub expires_in_ms: u64,
    pub use_count: u64,
}

#[derive(Default)]
struct PoolSlot {
    entry: Mutex<Option<ErasedResource>>,
}

/// How an acquisition was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireKind {
    Hit,
    Created,
}

/// What a release did with the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Retained,
    Disposed,
    NotFound,
}

pub(crate) struct ResourcePool {
    slots: DashMap<String, Arc<PoolSlot>>,
    live: AtomicUsize,
    counters: Arc<ResourceCounters>,
}

impl ResourcePool {
    pub(crate) fn new(counters: Arc<ResourceCounters>) -> Self {
        Self {
            slots: DashMap::new(),
            live: AtomicUsize::new(0),
            counters,
        }
    }

    fn slot(&self, key: &str) -> Arc<PoolSlot> {
        Arc::clone(
            self.slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(PoolSlot::default()))
                .value(),
        )
    }

    fn existing_slot(&self, key: &str) -> Option<Arc<PoolSlot>> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    /// Drop the map entry for `key` once nobody holds its slot and the slot is empty.
    ///
    /// The predicate runs under the shard write lock, so a concurrent `slot()` either
    /// already holds a clone (strong count above one) or will insert a fresh slot.
    fn forget_if_vacant(&self, key: &str) {
        self.slots.remove_if(key, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot.entry.try_lock().is_ok_and(|entry| entry.is_none())
        });
    }

    fn dispose(&self, key: &str, entry: ErasedResource) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.counters.record_disposed();
        debug!(
            key = %key,
            use_count = entry.use_count,
            age_ms = entry.created_at.elapsed().as_millis() as u64,
            "RESOURCES: Disposed pooled resource"
        );
        // The pool's reference goes away here; the value itself drops with the
        // last outstanding Arc held by a caller.
        drop(entry);
    }

    pub(crate) async fn acquire<T, E, F, Fut>(
        &self,
        key: &str,
        factory: F,
        ttl: Duration,
        max_uses: u64,
    ) -> Result<(Arc<T>, AcquireKind)>
    where
        T: Send + Sync + 'static,
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.entry.lock().await;
        let now = Instant::now();

        if let Some(entry) = guard.as_mut() {
            if entry.is_reusable(now, max_uses) {
                let resource = Arc::clone(&entry.resource)
                    .downcast::<T>()
                    .map_err(|_| HostError::ResourceTypeMismatch {
                        key: key.to_string(),
                    })?;
                entry.use_count += 1;
                entry.last_used = now;
                self.counters.record_hit();
                return Ok((resource, AcquireKind::Hit));
            }
        }

        if let Some(stale) = guard.take() {
            self.dispose(key, stale);
        }

        let created = match factory().await {
            Ok(value) => Arc::new(value),
            Err(e) => {
                self.counters.record_factory_failure();
                drop(guard);
                drop(slot);
                self.forget_if_vacant(key);
                return Err(HostError::resource_creation(key, e.to_string()));
            }
        };

        let erased: Arc<dyn Any + Send + Sync> = created.clone();
        *guard = Some(PooledResource::new(erased, ttl));
        self.live.fetch_add(1, Ordering::AcqRel);
        self.counters.record_created();

        Ok((created, AcquireKind::Created))
    }

    pub(crate) async fn release(&self, key: &str, force_dispose: bool, max_uses: u64) -> ReleaseOutcome {
        let Some(slot) = self.existing_slot(key) else {
            return ReleaseOutcome::NotFound;
        };

        let mut guard = slot.entry.lock().await;
        let now = Instant::now();
        let outcome = match guard.as_mut() {
            None => ReleaseOutcome::NotFound,
            Some(entry) if force_dispose || !entry.is_reusable(now, max_uses) => {
                ReleaseOutcome::Disposed
            }
            Some(entry) => {
                entry.last_used = now;
                ReleaseOutcome::Retained
            }
        };
        if outcome == ReleaseOutcome::Disposed {
            if let Some(entry) = guard.take() {
                self.dispose(key, entry);
            }
        }
        drop(guard);
        drop(slot);

        if outcome != ReleaseOutcome::Retained {
            self.forget_if_vacant(key);
        }
        outcome
    }

    /// Dispose every entry that is expired or over-used; busy slots are skipped
    pub(crate) fn sweep(&self, max_uses: u64) -> usize {
        let now = Instant::now();
        let slots: Vec<(String, Arc<PoolSlot>)> = self
            .slots
            .iter()
            .map(|slot| (slot.key().clone(), Arc::clone(slot.value())))
            .collect();

        let mut disposed = 0;
        for (key, slot) in slots {
            let vacant = {
                let Ok(mut guard) = slot.entry.try_lock() else {
                    continue;
                };
                let stale = guard
                    .as_ref()
                    .is_some_and(|entry| !entry.is_reusable(now, max_uses));
                if stale {
                    if let Some(entry) = guard.take() {
                        self.dispose(&key, entry);
                        disposed += 1;
                    }
                }
                guard.is_none()
            };
            drop(slot);
            if vacant {
                self.forget_if_vacant(&key);
            }
        }
        disposed
    }

    /// Dispose everything, waiting for in-flight acquisitions to finish
    pub(crate) async fn clear(&self) -> usize {
        let slots: Vec<(String, Arc<PoolSlot>)> = self
            .slots
            .iter()
            .map(|slot| (slot.key().clone(), Arc::clone(slot.value())))
            .collect();

        let mut disposed = 0;
        for (key, slot) in slots {
            let taken = slot.entry.lock().await.take();
            drop(slot);
            if let Some(entry) = taken {
                self.dispose(&key, entry);
                disposed += 1;
            }
            self.forget_if_vacant(&key);
        }
        disposed
    }

    pub(crate) fn len(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn entries(&self) -> Vec<PooledResourceInfo> {
        let now = Instant::now();
        self.slots
            .iter()
            .filter_map(|slot| {
                let guard = slot.value().entry.try_lock().ok()?;
                let entry = guard.as_ref()?;
                Some(PooledResourceInfo {
                    key: slot.key().clone(),
                    age_ms: now.duration_since(entry.created_at).as_millis() as u64,
                    idle_ms: now.duration_since(entry.last_used).as_millis() as u64,
                    expires_in_ms: entry.expires_at.saturating_duration_since(now).as_millis()
                        as u64,
                    use_count: entry.use_count,
                })
            })
            .collect()
    }
}
