//! The asynchronous paging worker.
//!
//! A software paging queue: one job per submission, processed in FIFO
//! order. For each job the worker pages the referenced objects in, trims
//! what the budget no longer affords, and finally signals the gate fence so
//! the GPU wait the coordinator already enqueued can clear. The GPU is
//! throttled by this pipeline, never the other way around.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::error::ResidencyError;
use crate::hal::{MemorySegment, PagingClock, PagingDevice, VideoMemoryProvider};
use crate::manager::Shared;
use crate::object::{ManagedObject, ResidencyStatus};
use crate::work::PagingWork;

/// Worker thread body: drain jobs, park when idle, exit on shutdown.
pub(crate) fn run_worker<D, A, C>(shared: Arc<Shared<D, A, C>>)
where
    D: PagingDevice,
    A: VideoMemoryProvider,
    C: PagingClock,
{
    debug!("paging worker started");
    while let Some(work) = shared.work.dequeue_blocking(&shared.shutdown) {
        process_paging_work(&shared, work);
        shared.work.job_done();
    }
    debug!("paging worker exited");
}

/// Page in, trim, and gate one submission.
///
/// Holds the registry lock for the whole body: object status, the LRU
/// order, and the aggregates all change here and must be observed
/// atomically by the application threads.
///
/// On a mid-batch make-resident failure the LRU keeps the affected objects
/// marked Resident: the state reflects paging intent, and the remainder of
/// the batch is retried after trimming.
pub(crate) fn process_paging_work<D, A, C>(shared: &Shared<D, A, C>, work: PagingWork)
where
    D: PagingDevice,
    A: VideoMemoryProvider,
    C: PagingClock,
{
    let now_ticks = shared.clock.now_ticks();
    let mut registry = shared.registry.lock();

    let mut first_uncompleted = shared.ledger.lock().dequeue_completed(&shared.device);

    // Mark the referenced objects: evicted ones join the make-resident
    // list, everything gets its reference marks refreshed.
    let mut make_resident: Vec<ManagedObject> = Vec::new();
    let mut bytes_to_page_in: u64 = 0;

    for object in &work.objects {
        let Some(status) = registry.status_of(object) else {
            // End-tracked while the job sat in the ring. The handle must
            // not be touched anymore.
            trace!(handle = %object.handle(), "skipping untracked reference");
            continue;
        };
        if status == ResidencyStatus::Evicted {
            registry.mark_resident(object);
            bytes_to_page_in += object.size_bytes();
            make_resident.push(object.clone());
        }
        registry.touch(object, work.generation, now_ticks);
    }

    // Age out whatever the current pressure no longer tolerates.
    let local = shared.budget.query(MemorySegment::Local);
    let grace_ticks = shared.grace.eviction_grace_period(&local);
    let aged = registry.trim_aged(first_uncompleted, now_ticks, grace_ticks);
    if !aged.is_empty() {
        if let Err(err) = shared.device.evict(&aged) {
            warn!(count = aged.len(), error = %err, "aged eviction failed");
        }
    }

    if !make_resident.is_empty() {
        debug!(
            generation = work.generation,
            count = make_resident.len(),
            bytes = bytes_to_page_in,
            "paging in referenced objects"
        );

        // Budget-respecting batching loop: page in as much as fits, trim
        // against completed sync points when it does not, and only force
        // the issue when there is nothing left to trim.
        let mut next = 0usize;
        loop {
            let local = shared.budget.query(MemorySegment::Local);
            let non_local = shared.budget.query(MemorySegment::NonLocal);
            let total_usage = local.current_usage + non_local.current_usage;
            let total_budget = local.budget + non_local.budget;
            let available = total_budget.saturating_sub(total_usage);

            let mut batch_failed = false;
            if available > 0 {
                let batch_start = next;
                let mut batch_bytes = 0u64;
                while next < make_resident.len() {
                    let size = make_resident[next].size_bytes();
                    if batch_bytes + size > available {
                        break;
                    }
                    batch_bytes += size;
                    next += 1;
                }

                if next > batch_start {
                    let handles: Vec<_> = make_resident[batch_start..next]
                        .iter()
                        .map(ManagedObject::handle)
                        .collect();
                    trace!(batch = handles.len(), bytes = batch_bytes, available, "make-resident batch");
                    match shared.device.make_resident(&handles) {
                        Ok(()) => bytes_to_page_in -= batch_bytes,
                        Err(err) => {
                            warn!(error = %err, "make-resident batch failed, trimming for room");
                            batch_failed = true;
                            next = batch_start;
                        }
                    }
                }
            }

            if !batch_failed && next == make_resident.len() {
                break;
            }

            let head_sync = registry.resident_head_sync_point();
            first_uncompleted = shared.ledger.lock().dequeue_completed(&shared.device);

            // Nothing safe to trim: either the resident list is empty, or
            // its stalest entry belongs to this very submission, or no
            // sync point is still in flight to wait on.
            let no_trim_left = head_sync.map_or(true, |sync| sync >= work.generation)
                || first_uncompleted.is_none();
            if no_trim_left {
                let handles: Vec<_> = make_resident[next..]
                    .iter()
                    .map(ManagedObject::handle)
                    .collect();
                if let Err(err) = shared.device.make_resident(&handles) {
                    // The submission cannot fit within the entire budget.
                    let fatal = match err {
                        ResidencyError::DeviceLost { .. } => err,
                        _ => ResidencyError::OutOfMemoryDevice {
                            requested_bytes: bytes_to_page_in,
                        },
                    };
                    error!(
                        code = fatal.error_code(),
                        remaining = handles.len(),
                        bytes = bytes_to_page_in,
                        "final make-resident failed with nothing left to trim"
                    );
                    *shared.fatal.lock() = Some(fatal);
                }
                break;
            }

            // Wait for the oldest in-flight sync point, but never the one
            // this job is paging for.
            let mut wait_generation = first_uncompleted.unwrap_or(0);
            if wait_generation == work.generation {
                debug_assert!(wait_generation > 0);
                wait_generation = wait_generation.saturating_sub(1);
            }
            shared.ledger.lock().wait_for(wait_generation, &shared.device);

            // Trim against the usage this job will add once paged in.
            let evictions = registry.trim_to_sync_point_inclusive(
                total_usage + bytes_to_page_in,
                total_budget,
                wait_generation,
            );
            if !evictions.is_empty() {
                if let Err(err) = shared.device.evict(&evictions) {
                    warn!(count = evictions.len(), error = %err, "trim eviction failed");
                }
            }
        }
    }

    drop(registry);

    // Unblock the GPU wait the coordinator enqueued for this submission.
    if let Err(err) = shared
        .device
        .signal_fence(shared.gate_fence.handle(), work.fence_value_to_signal)
    {
        error!(
            value = work.fence_value_to_signal,
            error = %err,
            "gate fence signal failed"
        );
        let mut fatal = shared.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
    }
}
