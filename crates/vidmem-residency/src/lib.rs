//! Video-memory residency management for explicit graphics APIs.
//!
//! Explicit APIs leave residency to the application: every pageable object
//! must be in video memory before the GPU touches it, and the OS hands out
//! a budget that shrinks under system pressure. This crate keeps a
//! registered working set resident, evicts stale or excess objects to
//! respect the budget, and interlocks CPU-side paging with GPU execution
//! so a queue never executes against an evicted object.
//!
//! # Architecture
//!
//! | Module | Primary Type | Purpose |
//! |--------|-------------|---------|
//! | [`manager`] | [`ResidencyManager`] | Tracking surface + submission coordinator |
//! | [`object`] | [`ManagedObject`], [`ResidencySet`] | Per-object identity, per-list reference sets |
//! | [`lru`] | [`ResidencyStats`] | Arena-backed resident/evicted LRU |
//! | `sync_points` | `SyncPointLedger` | Per-queue fences, device-wide sync points |
//! | `work` | `WorkChannel` | Bounded SPSC paging work ring |
//! | `worker` | `process_paging_work` | Asynchronous paging pipeline |
//! | [`budget`] | `BudgetCache` | Budget queries + eviction grace policy |
//! | [`hal`] | [`PagingDevice`] | Capability traits over the graphics layer |
//!
//! Submissions flow through [`ResidencyManager::execute_command_lists`]:
//! residency sets are merged, a paging job is enqueued, the queue gets a
//! GPU-side wait on the manager's gate fence, the lists execute, and the
//! queue fence signal is recorded as a device-wide sync point. The paging
//! worker pages the job's objects in (trimming the LRU against completed
//! sync points when the budget is short) and then signals the gate, which
//! is what lets the queue start executing.
//!
//! # Threads and locks
//!
//! Three parties concur: application threads (tracking + submission), the
//! paging worker, and the GPU. Lock order is submission lock, then the
//! worker-facing sync-point lock; the registry lock is innermost on
//! application threads and held across the worker's whole paging pass.
//! Backpressure bounds the worker's lag at `max_latency` submissions.
//!
//! # Example
//!
//! ```rust,ignore
//! use vidmem_residency::{
//!     ManagedObject, PageableHandle, ResidencyConfig, ResidencyManager, ResidencySet,
//! };
//!
//! let manager = ResidencyManager::new(device, adapter, ResidencyConfig::default())?;
//!
//! let texture = ManagedObject::new(PageableHandle(0x1000), 64 << 20);
//! manager.begin_tracking(&texture);
//!
//! let mut refs = ResidencySet::new();
//! refs.insert(&texture);
//! manager.execute_command_lists(&queue, &[command_list], &[&refs])?;
//!
//! manager.end_tracking(&texture);
//! # Ok::<(), vidmem_residency::ResidencyError>(())
//! ```

pub mod budget;
pub mod config;
pub mod error;
pub mod hal;
pub mod lru;
pub mod manager;
pub mod object;

mod sync_points;
mod work;
mod worker;

pub use budget::{MAX_EVICTION_GRACE_SECS, MIN_EVICTION_GRACE_SECS};
pub use config::ResidencyConfig;
pub use error::{ResidencyError, ResidencyResult};
pub use hal::{
    CommandListHandle, FenceHandle, MemorySegment, MonotonicClock, PageableHandle, PagingClock,
    PagingDevice, QueueId, SubmissionQueue, VideoMemoryInfo, VideoMemoryProvider,
};
pub use lru::{ResidencyStats, TrackedObjectState};
pub use manager::ResidencyManager;
pub use object::{ManagedObject, ResidencySet, ResidencyStatus};
