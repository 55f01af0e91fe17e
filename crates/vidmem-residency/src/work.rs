//! The paging work queue.
//!
//! A bounded single-producer single-consumer ring carries one job per
//! submission from the coordinator to the paging worker. Head and tail are
//! monotonic 64-bit counters; the slot for an index is `index % capacity`.
//! Capacity is `max_latency + 1`, and the producer blocks whenever it gets
//! `max_latency` jobs ahead of the worker, so the GPU never outruns the
//! paging stream by more than that.

use parking_lot::{Condvar, Mutex};

use crate::object::ManagedObject;

/// One paging job: the objects a submission references, the generation the
/// submission will become, and the gate-fence value to signal when paging
/// for it is done.
#[derive(Debug)]
pub(crate) struct PagingWork {
    /// Deduplicated references from the submission's residency sets.
    pub objects: Vec<ManagedObject>,
    /// Sync-point generation id of the submission.
    pub generation: u64,
    /// Gate-fence value the worker signals once paging completes.
    pub fence_value_to_signal: u64,
}

/// Fixed-capacity ring with monotonic indices.
///
/// Invariant: `head <= tail` and `tail - head <= capacity`.
#[derive(Debug)]
pub(crate) struct WorkRing {
    slots: Box<[Option<PagingWork>]>,
    head: u64,
    tail: u64,
}

impl WorkRing {
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: slots.into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Jobs currently enqueued (including any being dequeued next).
    pub(crate) fn len(&self) -> usize {
        (self.tail - self.head) as usize
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Producer side. Caller must have ensured there is room.
    pub(crate) fn push(&mut self, work: PagingWork) {
        debug_assert!(self.len() < self.capacity(), "work ring overflow");
        let slot = (self.tail % self.slots.len() as u64) as usize;
        self.slots[slot] = Some(work);
        self.tail += 1;
    }

    /// Consumer side.
    pub(crate) fn pop(&mut self) -> Option<PagingWork> {
        if self.is_empty() {
            return None;
        }
        let slot = (self.head % self.slots.len() as u64) as usize;
        let work = self.slots[slot].take();
        debug_assert!(work.is_some(), "work ring slot empty at head");
        self.head += 1;
        work
    }
}

/// The ring plus the two wakeup events around it.
///
/// `work_available` wakes the idle worker when a job arrives (and at
/// shutdown); `work_done` wakes a producer blocked on backpressure after
/// the worker finishes a job.
#[derive(Debug)]
pub(crate) struct WorkChannel {
    ring: Mutex<WorkRing>,
    work_available: Condvar,
    work_done: Condvar,
}

impl WorkChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(WorkRing::new(capacity)),
            work_available: Condvar::new(),
            work_done: Condvar::new(),
        }
    }

    /// Enqueue a job, blocking while the worker is `max_latency` jobs behind.
    pub(crate) fn enqueue_blocking(&self, work: PagingWork, max_latency: usize) {
        let mut ring = self.ring.lock();
        while ring.len() >= max_latency {
            self.work_done.wait(&mut ring);
        }
        ring.push(work);
        self.work_available.notify_one();
    }

    /// Non-blocking dequeue. Used by the inline (synchronous) pump.
    pub(crate) fn try_dequeue(&self) -> Option<PagingWork> {
        self.ring.lock().pop()
    }

    /// Dequeue a job, parking until one arrives.
    ///
    /// Returns `None` once `shutdown` reads true and the ring is empty.
    pub(crate) fn dequeue_blocking(
        &self,
        shutdown: &std::sync::atomic::AtomicBool,
    ) -> Option<PagingWork> {
        let mut ring = self.ring.lock();
        loop {
            if let Some(work) = ring.pop() {
                return Some(work);
            }
            if shutdown.load(std::sync::atomic::Ordering::Acquire) {
                return None;
            }
            self.work_available.wait(&mut ring);
        }
    }

    /// Worker-side completion notification, after each processed job.
    pub(crate) fn job_done(&self) {
        // Take the lock so the notify cannot slip between a producer's
        // full-ring check and its wait.
        let _ring = self.ring.lock();
        self.work_done.notify_one();
    }

    /// Wake the worker so it can observe the shutdown flag.
    pub(crate) fn wake_worker(&self) {
        let _ring = self.ring.lock();
        self.work_available.notify_one();
    }

    /// Discard all pending jobs.
    pub(crate) fn drain(&self) {
        let mut ring = self.ring.lock();
        while ring.pop().is_some() {}
        self.work_done.notify_all();
    }
}
