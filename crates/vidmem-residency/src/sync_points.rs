//! Queue fences and device-wide sync points.
//!
//! Every submission queue the manager sees gets one monotonic fence; each
//! submission records a device-wide sync point snapshotting the latest
//! submitted value of every known fence. A sync point is complete when all
//! of its queue snapshots have completed, which makes the in-flight list a
//! monotone approximation of GPU progress the paging worker can wait on.
//!
//! A sync point captures only the queues known at creation time. Queues
//! discovered later are not represented in older points; completion means
//! "everything submitted up to then is done", which is exactly what the
//! eviction decisions need.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::error::ResidencyResult;
use crate::hal::{FenceHandle, PagingDevice, QueueId};

/// A device fence plus the next value its owner will signal.
///
/// Values start at 1 and are incremented only by the owner: the submission
/// coordinator for queue fences, the paging worker for the gate fence.
#[derive(Debug)]
pub(crate) struct QueueFence {
    handle: FenceHandle,
    next_value: AtomicU64,
}

impl QueueFence {
    /// Create the underlying device fence (completed value 0).
    pub(crate) fn create<D: PagingDevice>(device: &D) -> ResidencyResult<Self> {
        let handle = device.create_fence(0)?;
        Ok(Self {
            handle,
            next_value: AtomicU64::new(1),
        })
    }

    pub(crate) fn handle(&self) -> FenceHandle {
        self.handle
    }

    /// The value the next signal will use.
    pub(crate) fn next_value(&self) -> u64 {
        self.next_value.load(Ordering::Relaxed)
    }

    pub(crate) fn increment(&self) {
        self.next_value.fetch_add(1, Ordering::Relaxed);
    }
}

/// Per-queue fence table, keyed by queue identity.
///
/// Fences are created on first sight of a queue and live until shutdown.
/// The count of queues seen only grows.
#[derive(Debug, Default)]
pub(crate) struct FenceTable {
    by_queue: HashMap<QueueId, usize>,
    fences: Vec<Arc<QueueFence>>,
}

impl FenceTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fence for `queue`, creating it on first sight.
    pub(crate) fn resolve_or_create<D: PagingDevice>(
        &mut self,
        device: &D,
        queue: QueueId,
    ) -> ResidencyResult<Arc<QueueFence>> {
        match self.by_queue.entry(queue) {
            Entry::Occupied(entry) => Ok(Arc::clone(&self.fences[*entry.get()])),
            Entry::Vacant(entry) => {
                let fence = Arc::new(QueueFence::create(device)?);
                trace!(%queue, "created residency fence for new queue");
                entry.insert(self.fences.len());
                self.fences.push(Arc::clone(&fence));
                Ok(fence)
            }
        }
    }

    /// Number of distinct queues seen so far.
    pub(crate) fn num_queues_seen(&self) -> usize {
        self.fences.len()
    }

    /// Snapshot every known fence into queue sync points.
    ///
    /// `next_value - 1` is the most recently submitted value at capture
    /// time, which is what completion must be measured against.
    pub(crate) fn snapshot(&self) -> Vec<QueueSyncPoint> {
        self.fences
            .iter()
            .map(|fence| QueueSyncPoint {
                last_used_value: fence.next_value() - 1,
                fence: Arc::clone(fence),
            })
            .collect()
    }

    /// Release all device fences and forget the queues.
    pub(crate) fn destroy_all<D: PagingDevice>(&mut self, device: &D) {
        for fence in self.fences.drain(..) {
            device.destroy_fence(fence.handle());
        }
        self.by_queue.clear();
    }
}

/// A position on one queue's timeline.
#[derive(Debug)]
pub(crate) struct QueueSyncPoint {
    fence: Arc<QueueFence>,
    last_used_value: u64,
}

impl QueueSyncPoint {
    fn is_completed<D: PagingDevice>(&self, device: &D) -> bool {
        self.last_used_value <= device.completed_value(self.fence.handle())
    }

    fn wait<D: PagingDevice>(&self, device: &D) {
        device.wait_for_value(self.fence.handle(), self.last_used_value);
    }
}

/// A snapshot of every queue timeline at one submission.
#[derive(Debug)]
pub(crate) struct DeviceWideSyncPoint {
    generation: u64,
    queue_points: Vec<QueueSyncPoint>,
}

impl DeviceWideSyncPoint {
    pub(crate) fn new(generation: u64, queue_points: Vec<QueueSyncPoint>) -> Self {
        Self {
            generation,
            queue_points,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Completed once every queue active at capture time has passed it.
    fn is_completed<D: PagingDevice>(&self, device: &D) -> bool {
        self.queue_points.iter().all(|qp| qp.is_completed(device))
    }

    fn wait<D: PagingDevice>(&self, device: &D) {
        for qp in &self.queue_points {
            if !qp.is_completed(device) {
                qp.wait(device);
            }
        }
    }
}

/// In-flight device-wide sync points, generation order head to tail.
#[derive(Debug, Default)]
pub(crate) struct SyncPointLedger {
    in_flight: VecDeque<DeviceWideSyncPoint>,
}

impl SyncPointLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a sync point. Generations must be strictly increasing.
    pub(crate) fn enqueue(&mut self, point: DeviceWideSyncPoint) {
        debug_assert!(self
            .in_flight
            .back()
            .map_or(true, |prev| prev.generation() < point.generation()));
        self.in_flight.push_back(point);
    }

    /// Drop completed sync points from the head and return the generation
    /// of the first uncompleted one, if any remain.
    pub(crate) fn dequeue_completed<D: PagingDevice>(&mut self, device: &D) -> Option<u64> {
        while let Some(head) = self.in_flight.front() {
            if head.is_completed(device) {
                trace!(generation = head.generation(), "sync point completed");
                self.in_flight.pop_front();
            } else {
                return Some(head.generation());
            }
        }
        None
    }

    /// Block until the sync point with `generation` completes.
    ///
    /// Points older than `generation` are dropped along the way; if the
    /// head is already newer the wait has implicitly happened and this
    /// returns immediately.
    pub(crate) fn wait_for<D: PagingDevice>(&mut self, generation: u64, device: &D) {
        while let Some(head) = self.in_flight.front() {
            if head.generation() > generation {
                return;
            }
            let exact = head.generation() == generation;
            if exact {
                head.wait(device);
            }
            self.in_flight.pop_front();
            if exact {
                return;
            }
        }
    }

    /// Drop everything. Used at shutdown.
    pub(crate) fn clear(&mut self) {
        self.in_flight.clear();
    }

    #[cfg(test)]
    fn generations(&self) -> Vec<u64> {
        self.in_flight.iter().map(DeviceWideSyncPoint::generation).collect()
    }
}
