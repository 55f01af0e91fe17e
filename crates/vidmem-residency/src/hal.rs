//! Capability traits consumed from the graphics layer.
//!
//! The manager never talks to a concrete graphics API. Everything it needs
//! is expressed as opaque `u64` handles plus a small set of traits the
//! embedding application implements over its device, queues, adapter, and
//! clock. The traits deliberately mirror the callable surface of explicit
//! APIs: residency control and fences on the device, wait/signal/execute on
//! queues, per-segment budget queries on the adapter.
//!
//! # Thread Safety
//!
//! [`PagingDevice`], [`VideoMemoryProvider`], and [`PagingClock`] require
//! `Send + Sync`: they are shared with the paging worker thread.
//! [`SubmissionQueue`] is only used on the thread that submits.

use std::fmt;
use std::time::Instant;

use crate::error::ResidencyResult;

/// Opaque handle to a pageable GPU object (heap, committed resource, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageableHandle(pub u64);

impl fmt::Display for PageableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pageable:{:#x}", self.0)
    }
}

/// Opaque handle to a recorded command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandListHandle(pub u64);

/// Opaque handle to a GPU fence created through [`PagingDevice::create_fence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceHandle(pub u64);

/// Identity of a submission queue.
///
/// The application assigns these; pointer-derived values work fine. Two
/// queues with the same id share one residency fence, so ids must be
/// stable and unique per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueId(pub u64);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue:{}", self.0)
    }
}

/// Video-memory segment group, as reported by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySegment {
    /// Memory local to the GPU (VRAM on discrete adapters).
    Local,
    /// Non-local memory visible to the GPU (system memory).
    NonLocal,
}

impl MemorySegment {
    /// Human-readable segment name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::NonLocal => "non-local",
        }
    }
}

impl fmt::Display for MemorySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OS-provided budget figures for one memory segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoMemoryInfo {
    /// Bytes this process may use before the OS starts demoting.
    pub budget: u64,
    /// Bytes this process currently uses.
    pub current_usage: u64,
}

/// Residency and fence operations on the graphics device.
pub trait PagingDevice: Send + Sync {
    /// Create a fence with the given initial completed value.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::DeviceLost` if the device cannot create
    /// fences (typically only after device removal).
    fn create_fence(&self, initial_value: u64) -> ResidencyResult<FenceHandle>;

    /// Release a fence created by [`create_fence`](Self::create_fence).
    fn destroy_fence(&self, _fence: FenceHandle) {}

    /// Bring the given objects into video memory. Blocking OS call.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::OutOfMemoryDevice` when the OS cannot find
    /// room, `ResidencyError::DeviceLost` on fatal device status.
    fn make_resident(&self, objects: &[PageableHandle]) -> ResidencyResult<()>;

    /// Remove the given objects from video memory.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::DeviceLost` on fatal device status.
    fn evict(&self, objects: &[PageableHandle]) -> ResidencyResult<()>;

    /// Last value the GPU has signaled on `fence`.
    fn completed_value(&self, fence: FenceHandle) -> u64;

    /// Signal `fence` to `value` from the CPU.
    ///
    /// Used by the paging worker to open the gate fence once paging for a
    /// submission is done.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::DeviceLost` on fatal device status.
    fn signal_fence(&self, fence: FenceHandle, value: u64) -> ResidencyResult<()>;

    /// Block the calling thread until `fence` reaches `value`.
    ///
    /// Returns immediately if the value is already completed.
    fn wait_for_value(&self, fence: FenceHandle, value: u64);
}

/// Submission-side operations on one command queue.
pub trait SubmissionQueue {
    /// Stable identity of this queue (see [`QueueId`]).
    fn id(&self) -> QueueId;

    /// Enqueue a GPU-side wait: the queue stalls until `fence >= value`.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::DeviceLost` on fatal device status.
    fn gpu_wait(&self, fence: FenceHandle, value: u64) -> ResidencyResult<()>;

    /// Enqueue a GPU-side signal of `fence` to `value`.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::DeviceLost` on fatal device status.
    fn gpu_signal(&self, fence: FenceHandle, value: u64) -> ResidencyResult<()>;

    /// Submit command lists for execution on this queue.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::DeviceLost` on fatal device status.
    fn execute_command_lists(&self, lists: &[CommandListHandle]) -> ResidencyResult<()>;
}

/// Adapter-level video-memory budget queries.
pub trait VideoMemoryProvider: Send + Sync {
    /// Query budget and usage for one segment of the given node.
    ///
    /// # Errors
    ///
    /// Returns `ResidencyError::BudgetQueryFailed` when the adapter rejects
    /// the query. The manager treats this as advisory and keeps running on
    /// the last known figures.
    fn query_video_memory_info(
        &self,
        node_mask: u32,
        segment: MemorySegment,
    ) -> ResidencyResult<VideoMemoryInfo>;
}

/// High-resolution monotonic clock with a known frequency.
///
/// Timestamps drive the aged-eviction grace period. A seam rather than a
/// direct `Instant` so tests can simulate minutes of idle time.
pub trait PagingClock: Send + Sync {
    /// Current tick count. Monotonically non-decreasing.
    fn now_ticks(&self) -> u64;

    /// Ticks per second.
    fn ticks_per_second(&self) -> u64;
}

/// Default [`PagingClock`] backed by [`std::time::Instant`].
///
/// Ticks are nanoseconds since clock construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose tick origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PagingClock for MonotonicClock {
    fn now_ticks(&self) -> u64 {
        // u64 nanoseconds cover ~584 years of process uptime.
        self.origin.elapsed().as_nanos() as u64
    }

    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ticks();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now_ticks();
        assert!(b > a);
        assert_eq!(clock.ticks_per_second(), 1_000_000_000);
    }

    #[test]
    fn segment_display() {
        assert_eq!(MemorySegment::Local.to_string(), "local");
        assert_eq!(MemorySegment::NonLocal.to_string(), "non-local");
    }

    #[test]
    fn handle_display() {
        assert_eq!(PageableHandle(0xab).to_string(), "pageable:0xab");
        assert_eq!(QueueId(3).to_string(), "queue:3");
    }
}
