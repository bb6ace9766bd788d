//! Bounded free-list of worker slots.
//!
//! OS threads are not recycled directly; a slot is a named, pre-configured
//! execution descriptor that blocking work borrows while it runs on tokio's
//! blocking pool. Returned slots beyond the free-list capacity are discarded.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::stats::ResourceCounters;

#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub id: Uuid,
    pub name: String,
    pub created_at: Instant,
    pub last_returned: Instant,
    pub uses: u64,
}

impl WorkerSlot {
    fn new(name: String) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            name,
            created_at: now,
            last_returned: now,
            uses: 0,
        }
    }
}

pub(crate) struct WorkerSlotPool {
    free: ArrayQueue<WorkerSlot>,
    next_index: AtomicU64,
    counters: Arc<ResourceCounters>,
}

impl WorkerSlotPool {
    pub(crate) fn new(capacity: usize, counters: Arc<ResourceCounters>) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            next_index: AtomicU64::new(1),
            counters,
        }
    }

    pub(crate) fn take(&self) -> WorkerSlot {
        let mut slot = match self.free.pop() {
            Some(slot) => {
                self.counters.record_slot_reused();
                slot
            }
            None => {
                let index = self.next_index.fetch_add(1, Ordering::Relaxed);
                self.counters.record_slot_created();
                WorkerSlot::new(format!("scripthost-worker-{index}"))
            }
        };
        slot.uses += 1;
        slot
    }

    /// Returns false when the free-list was full and the slot was discarded
    pub(crate) fn give_back(&self, mut slot: WorkerSlot) -> bool {
        slot.last_returned = Instant::now();
        match self.free.push(slot) {
            Ok(()) => true,
            Err(_) => {
                self.counters.record_slot_discarded();
                false
            }
        }
    }

    /// Drop slots idle for longer than `max_idle`
    pub(crate) fn prune(&self, max_idle: Duration) -> usize {
        let mut keep = Vec::with_capacity(self.free.len());
        let mut pruned = 0;
        while let Some(slot) = self.free.pop() {
            if slot.last_returned.elapsed() > max_idle {
                pruned += 1;
            } else {
                keep.push(slot);
            }
        }
        for slot in keep {
            if self.free.push(slot).is_err() {
                pruned += 1;
            }
        }
        pruned
    }

    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(capacity: usize) -> WorkerSlotPool {
        WorkerSlotPool::new(capacity, Arc::new(ResourceCounters::default()))
    }

    #[test]
    fn test_returned_slot_is_reused() {
        let pool = pool(2);
        let slot = pool.take();
        let id = slot.id;
        assert!(pool.give_back(slot));

        let again = pool.take();
        assert_eq!(again.id, id);
        assert_eq!(again.uses, 2);
        assert_eq!(pool.counters.snapshot().worker_slots_reused, 1);
    }

    #[test]
    fn test_excess_slots_are_discarded() {
        let pool = pool(1);
        let a = pool.take();
        let b = pool.take();
        assert!(pool.give_back(a));
        assert!(!pool.give_back(b));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.counters.snapshot().worker_slots_discarded, 1);
    }

    #[test]
    fn test_prune_idle_slots() {
        let pool = pool(4);
        let a = pool.take();
        let b = pool.take();
        pool.give_back(a);
        pool.give_back(b);

        assert_eq!(pool.prune(Duration::from_secs(3600)), 0);
        assert_eq!(pool.len(), 2);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.prune(Duration::from_millis(1)), 2);
        assert_eq!(pool.len(), 0);
    }
}
