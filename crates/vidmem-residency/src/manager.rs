//! The residency manager: tracking surface and submission coordinator.
//!
//! # Lock order
//!
//! Submission lock → sync-point (worker-facing) lock → fence table.
//! The registry lock is innermost on application threads; the paging
//! worker holds it across its whole body and acquires the worker-facing
//! lock transiently underneath it. No cycle exists between the two sides
//! because the application side never takes the registry lock while
//! holding another manager lock.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::budget::{BudgetCache, GracePeriods};
use crate::config::ResidencyConfig;
use crate::error::{ResidencyError, ResidencyResult};
use crate::hal::{
    CommandListHandle, MemorySegment, MonotonicClock, PagingClock, PagingDevice, SubmissionQueue,
    VideoMemoryProvider,
};
use crate::lru::{LruCache, ResidencyStats, TrackedObjectState};
use crate::object::{ManagedObject, ResidencySet, ResidencyStatus};
use crate::sync_points::{DeviceWideSyncPoint, FenceTable, QueueFence, SyncPointLedger};
use crate::work::{PagingWork, WorkChannel};
use crate::worker;

/// State shared between the application threads and the paging worker.
pub(crate) struct Shared<D, A, C> {
    pub(crate) device: D,
    pub(crate) clock: C,
    pub(crate) config: ResidencyConfig,
    pub(crate) grace: GracePeriods,
    pub(crate) budget: BudgetCache<A>,
    /// Registry lock: the LRU and every object's residency attributes.
    pub(crate) registry: Mutex<LruCache>,
    /// Worker-facing lock: the in-flight sync-point list.
    pub(crate) ledger: Mutex<SyncPointLedger>,
    pub(crate) fences: Mutex<FenceTable>,
    pub(crate) work: WorkChannel,
    /// Gate fence: queues wait on it until paging for their submission is
    /// done. Signaled only by the worker.
    pub(crate) gate_fence: QueueFence,
    pub(crate) generation: AtomicU64,
    pub(crate) shutdown: AtomicBool,
    /// Sticky fatal error from the worker, surfaced on the next submit.
    pub(crate) fatal: Mutex<Option<ResidencyError>>,
    /// Serializes the enqueue + wait + execute + signal + sync-point block.
    submission: Mutex<()>,
}

/// Video-memory residency manager.
///
/// Register every pageable object with [`begin_tracking`], describe each
/// command list's references in a [`ResidencySet`], and submit through
/// [`execute_command_lists`] instead of the queue directly. The manager
/// keeps the referenced working set resident, evicts stale or excess
/// objects to respect the OS budget, and interlocks CPU paging with GPU
/// execution so the GPU never reads an evicted object.
///
/// [`begin_tracking`]: ResidencyManager::begin_tracking
/// [`execute_command_lists`]: ResidencyManager::execute_command_lists
pub struct ResidencyManager<D, A, C = MonotonicClock>
where
    D: PagingDevice,
    A: VideoMemoryProvider,
    C: PagingClock,
{
    shared: Arc<Shared<D, A, C>>,
    worker: Option<JoinHandle<()>>,
    torn_down: bool,
}

impl<D, A> ResidencyManager<D, A, MonotonicClock>
where
    D: PagingDevice + 'static,
    A: VideoMemoryProvider + 'static,
{
    /// Create a manager over `device` and `adapter` with the default
    /// monotonic clock.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a rejected configuration, `DeviceLost`
    /// if the gate fence cannot be created, `OsResource` if the paging
    /// worker thread cannot be spawned.
    pub fn new(device: D, adapter: A, config: ResidencyConfig) -> ResidencyResult<Self> {
        Self::with_clock(device, adapter, MonotonicClock::new(), config)
    }
}

impl<D, A, C> ResidencyManager<D, A, C>
where
    D: PagingDevice + 'static,
    A: VideoMemoryProvider + 'static,
    C: PagingClock + 'static,
{
    /// Create a manager with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`new`](ResidencyManager::new).
    pub fn with_clock(
        device: D,
        adapter: A,
        clock: C,
        config: ResidencyConfig,
    ) -> ResidencyResult<Self> {
        config.validate()?;

        let grace = GracePeriods::from_clock(&clock);
        let gate_fence = QueueFence::create(&device)?;
        let budget = BudgetCache::new(adapter, config.node_mask);
        let ring_capacity = config.work_ring_capacity();
        let synchronous = config.synchronous_paging;

        let shared = Arc::new(Shared {
            device,
            clock,
            config,
            grace,
            budget,
            registry: Mutex::new(LruCache::new()),
            ledger: Mutex::new(SyncPointLedger::new()),
            fences: Mutex::new(FenceTable::new()),
            work: WorkChannel::new(ring_capacity),
            gate_fence,
            generation: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
            fatal: Mutex::new(None),
            submission: Mutex::new(()),
        });

        let worker = if synchronous {
            None
        } else {
            let worker_shared = Arc::clone(&shared);
            match std::thread::Builder::new()
                .name("vidmem-paging".into())
                .spawn(move || worker::run_worker(worker_shared))
            {
                Ok(handle) => Some(handle),
                Err(err) => {
                    shared.device.destroy_fence(shared.gate_fence.handle());
                    return Err(ResidencyError::OsResource {
                        reason: format!("failed to spawn paging worker: {err}"),
                    });
                }
            }
        };

        info!(
            max_latency = shared.config.max_latency,
            synchronous_paging = synchronous,
            start_objects_evicted = shared.config.start_objects_evicted,
            "residency manager initialized"
        );

        Ok(Self {
            shared,
            worker,
            torn_down: false,
        })
    }

    /// Register a pageable object for residency tracking.
    ///
    /// The object starts Resident unless the manager is configured to start
    /// objects evicted, in which case the device is asked to evict it right
    /// away. The caller must keep the underlying GPU object alive until
    /// [`end_tracking`](ResidencyManager::end_tracking) returns.
    pub fn begin_tracking(&self, object: &ManagedObject) {
        let status = if self.shared.config.start_objects_evicted {
            ResidencyStatus::Evicted
        } else {
            ResidencyStatus::Resident
        };

        let mut registry = self.shared.registry.lock();
        if status == ResidencyStatus::Evicted {
            if let Err(err) = self.shared.device.evict(&[object.handle()]) {
                warn!(handle = %object.handle(), error = %err, "initial evict failed");
            }
        }
        registry.insert(object, status);
    }

    /// Remove an object from residency tracking.
    ///
    /// After this returns the manager will not touch the underlying GPU
    /// object again, even if a paging job still holds a reference to it.
    pub fn end_tracking(&self, object: &ManagedObject) {
        self.shared.registry.lock().remove(object);
    }

    /// Submit command lists with their residency sets.
    ///
    /// Merges the sets, keeps the union resident, inserts a GPU wait that
    /// holds the queue until paging completes, executes the lists, and
    /// records the submission in the sync-point ledger. Oversize
    /// multi-list submissions whose total referenced bytes exceed the
    /// combined budget are split recursively; a single list that exceeds
    /// the budget on its own is submitted as-is and left to the OS.
    ///
    /// May block when the paging worker is `max_latency` submissions
    /// behind.
    ///
    /// # Errors
    ///
    /// - `InvalidSubmission` on arity mismatch or a shut-down manager.
    /// - `OutOfMemoryDevice` (sticky) once a working set failed to fit in
    ///   the entire budget.
    /// - `DeviceLost` when a queue operation fails.
    pub fn execute_command_lists<Q: SubmissionQueue>(
        &self,
        queue: &Q,
        lists: &[CommandListHandle],
        residency_sets: &[&ResidencySet],
    ) -> ResidencyResult<()> {
        if lists.len() != residency_sets.len() {
            return Err(ResidencyError::InvalidSubmission {
                reason: format!(
                    "{} command lists with {} residency sets",
                    lists.len(),
                    residency_sets.len()
                ),
            });
        }
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(ResidencyError::InvalidSubmission {
                reason: "residency manager is shut down".into(),
            });
        }
        if let Some(fatal) = self.shared.fatal.lock().clone() {
            return Err(fatal);
        }

        self.execute_subset(queue, lists, residency_sets)
    }

    /// Aggregate residency counters.
    #[must_use]
    pub fn stats(&self) -> ResidencyStats {
        self.shared.registry.lock().stats()
    }

    /// Residency attributes of one tracked object, `None` if untracked.
    #[must_use]
    pub fn tracked_state(&self, object: &ManagedObject) -> Option<TrackedObjectState> {
        self.shared.registry.lock().tracked_state(object)
    }

    /// Drain the paging pipeline and release manager-owned fences.
    ///
    /// Pending jobs are discarded. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        self.shutdown_inner();
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn execute_subset<Q: SubmissionQueue>(
        &self,
        queue: &Q,
        lists: &[CommandListHandle],
        residency_sets: &[&ResidencySet],
    ) -> ResidencyResult<()> {
        let shared = &self.shared;
        let local = shared.budget.query(MemorySegment::Local);
        let non_local = shared.budget.query(MemorySegment::NonLocal);

        // Union of every set in this batch, with total referenced bytes.
        let mut seen: HashSet<u64> = HashSet::new();
        let mut referenced: Vec<ManagedObject> = Vec::new();
        let mut total_bytes: u64 = 0;
        for set in residency_sets {
            for object in set.iter() {
                if seen.insert(object.handle().0) {
                    total_bytes += object.size_bytes();
                    referenced.push(object.clone());
                }
            }
        }

        // A batch that cannot possibly fit is split in half until its
        // subsets can. One list is submitted regardless; the OS demotes
        // what it must.
        let combined_budget = local.budget + non_local.budget;
        if lists.len() > 1 && total_bytes > combined_budget {
            debug!(
                lists = lists.len(),
                total_bytes, combined_budget, "splitting oversize submission"
            );
            let half = lists.len() / 2;
            let lower = self.execute_subset(queue, &lists[..half], &residency_sets[..half]);
            let upper = self.execute_subset(queue, &lists[half..], &residency_sets[half..]);
            return lower.and(upper);
        }

        let queue_fence = shared
            .fences
            .lock()
            .resolve_or_create(&shared.device, queue.id())?;

        // The rest must be atomic so sync-point generations match ring
        // order across threads.
        let _submit = shared.submission.lock();

        let generation = shared.generation.load(Ordering::Relaxed);
        let gate_value = shared.gate_fence.next_value();

        shared.work.enqueue_blocking(
            PagingWork {
                objects: referenced,
                generation,
                fence_value_to_signal: gate_value,
            },
            shared.config.max_latency as usize,
        );
        if shared.config.synchronous_paging {
            while let Some(job) = shared.work.try_dequeue() {
                worker::process_paging_work(shared, job);
            }
        }

        // The GPU must not start this submission until paging for it is
        // done.
        queue.gpu_wait(shared.gate_fence.handle(), gate_value)?;
        shared.gate_fence.increment();

        queue.execute_command_lists(lists)?;

        // Passing this fence value means the submission's objects are safe
        // to evict.
        queue.gpu_signal(queue_fence.handle(), queue_fence.next_value())?;
        queue_fence.increment();

        {
            let mut ledger = shared.ledger.lock();
            let snapshot = shared.fences.lock().snapshot();
            ledger.enqueue(DeviceWideSyncPoint::new(generation, snapshot));
        }
        shared.generation.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}

impl<D, A, C> Drop for ResidencyManager<D, A, C>
where
    D: PagingDevice,
    A: VideoMemoryProvider,
    C: PagingClock,
{
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

impl<D, A, C> ResidencyManager<D, A, C>
where
    D: PagingDevice,
    A: VideoMemoryProvider,
    C: PagingClock,
{
    // In a separate impl block without the `'static` construction bounds
    // so `Drop` can call it.
    fn shutdown_inner(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.shared.work.drain();
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.work.wake_worker();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("paging worker panicked before shutdown");
            }
        }

        self.shared.ledger.lock().clear();
        let queues_seen = {
            let mut fences = self.shared.fences.lock();
            let seen = fences.num_queues_seen();
            fences.destroy_all(&self.shared.device);
            seen
        };
        self.shared
            .device
            .destroy_fence(self.shared.gate_fence.handle());

        info!(queues_seen, "residency manager shut down");
    }
}
