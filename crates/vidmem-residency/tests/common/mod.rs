//! Mock graphics layer for exercising the residency manager end to end.
//!
//! `MockGpu` implements the device and adapter capability traits over
//! plain bookkeeping: per-handle sizes, a resident set that drives the
//! local-segment usage figure, recorded make-resident/evict calls, and
//! fences whose completion the test controls. In auto mode a queue-side
//! signal completes its fence immediately (an infinitely fast GPU); in
//! manual mode fences complete only when the test says so, or when the
//! paging pipeline explicitly waits on them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use vidmem_residency::{
    CommandListHandle, FenceHandle, ManagedObject, MemorySegment, PageableHandle, PagingClock,
    PagingDevice, QueueId, ResidencyError, ResidencyResult, SubmissionQueue, VideoMemoryInfo,
    VideoMemoryProvider,
};

/// Every device call the manager issued, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    pub make_resident: Vec<Vec<PageableHandle>>,
    pub evict: Vec<Vec<PageableHandle>>,
    /// Combined available bytes (budget - usage) at each make-resident call.
    pub available_at_make_resident: Vec<u64>,
}

#[derive(Debug, Default)]
struct FenceState {
    completed: u64,
    last_signaled: u64,
}

#[derive(Debug, Default)]
struct Segments {
    local: VideoMemoryInfo,
    non_local: VideoMemoryInfo,
}

impl Segments {
    fn get(&self, segment: MemorySegment) -> VideoMemoryInfo {
        match segment {
            MemorySegment::Local => self.local,
            MemorySegment::NonLocal => self.non_local,
        }
    }

    fn available(&self) -> u64 {
        let budget = self.local.budget + self.non_local.budget;
        let usage = self.local.current_usage + self.non_local.current_usage;
        budget.saturating_sub(usage)
    }
}

struct GpuState {
    segments: Mutex<Segments>,
    object_sizes: Mutex<HashMap<u64, u64>>,
    resident: Mutex<HashSet<u64>>,
    calls: Mutex<CallLog>,
    fences: Mutex<HashMap<u64, FenceState>>,
    fence_cv: Condvar,
    next_fence: AtomicU64,
    /// Queue-side signals complete their fence immediately.
    auto_complete_signals: bool,
    paused: Mutex<bool>,
    pause_cv: Condvar,
    fail_make_resident: AtomicBool,
    make_resident_entered: AtomicUsize,
}

/// Shared handle to the fake device + adapter.
#[derive(Clone)]
pub struct MockGpu {
    state: Arc<GpuState>,
}

impl MockGpu {
    fn with_auto_complete(auto_complete_signals: bool) -> Self {
        Self {
            state: Arc::new(GpuState {
                segments: Mutex::new(Segments::default()),
                object_sizes: Mutex::new(HashMap::new()),
                resident: Mutex::new(HashSet::new()),
                calls: Mutex::new(CallLog::default()),
                fences: Mutex::new(HashMap::new()),
                fence_cv: Condvar::new(),
                next_fence: AtomicU64::new(1),
                auto_complete_signals,
                paused: Mutex::new(false),
                pause_cv: Condvar::new(),
                fail_make_resident: AtomicBool::new(false),
                make_resident_entered: AtomicUsize::new(0),
            }),
        }
    }

    /// GPU whose queue signals complete instantly.
    pub fn new() -> Self {
        Self::with_auto_complete(true)
    }

    /// GPU whose fences complete only on request (or on a CPU wait).
    pub fn manual() -> Self {
        Self::with_auto_complete(false)
    }

    pub fn set_budget(&self, segment: MemorySegment, budget: u64) {
        let mut segments = self.state.segments.lock();
        match segment {
            MemorySegment::Local => segments.local.budget = budget,
            MemorySegment::NonLocal => segments.non_local.budget = budget,
        }
    }

    /// Register a GPU object of `size` bytes and wrap it for tracking.
    pub fn object(&self, id: u64, size: u64, resident: bool) -> ManagedObject {
        self.state.object_sizes.lock().insert(id, size);
        if resident {
            let newly = self.state.resident.lock().insert(id);
            assert!(newly, "object {id} defined twice");
            self.state.segments.lock().local.current_usage += size;
        }
        ManagedObject::new(PageableHandle(id), size)
    }

    pub fn calls(&self) -> CallLog {
        self.state.calls.lock().clone()
    }

    pub fn resident_handles(&self) -> HashSet<u64> {
        self.state.resident.lock().clone()
    }

    pub fn local_usage(&self) -> u64 {
        self.state.segments.lock().local.current_usage
    }

    /// Drive every fence to its last signaled value.
    pub fn complete_all_fences(&self) {
        let mut fences = self.state.fences.lock();
        for fence in fences.values_mut() {
            fence.completed = fence.completed.max(fence.last_signaled);
        }
        self.state.fence_cv.notify_all();
    }

    /// Make `make_resident` block until [`resume_paging`](Self::resume_paging).
    pub fn pause_paging(&self) {
        *self.state.paused.lock() = true;
    }

    pub fn resume_paging(&self) {
        *self.state.paused.lock() = false;
        self.state.pause_cv.notify_all();
    }

    pub fn fail_make_resident(&self, fail: bool) {
        self.state.fail_make_resident.store(fail, Ordering::Relaxed);
    }

    /// How many make-resident calls have been entered (possibly still
    /// blocked on a paused pipeline).
    pub fn make_resident_entered(&self) -> usize {
        self.state.make_resident_entered.load(Ordering::SeqCst)
    }

    fn size_of(&self, handle: PageableHandle) -> u64 {
        self.state
            .object_sizes
            .lock()
            .get(&handle.0)
            .copied()
            .unwrap_or_else(|| panic!("unknown object {}", handle))
    }
}

impl Default for MockGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl PagingDevice for MockGpu {
    fn create_fence(&self, initial_value: u64) -> ResidencyResult<FenceHandle> {
        let id = self.state.next_fence.fetch_add(1, Ordering::Relaxed);
        self.state.fences.lock().insert(
            id,
            FenceState {
                completed: initial_value,
                last_signaled: initial_value,
            },
        );
        Ok(FenceHandle(id))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        self.state.fences.lock().remove(&fence.0);
    }

    fn make_resident(&self, objects: &[PageableHandle]) -> ResidencyResult<()> {
        self.state.make_resident_entered.fetch_add(1, Ordering::SeqCst);
        {
            let mut paused = self.state.paused.lock();
            while *paused {
                self.state.pause_cv.wait(&mut paused);
            }
        }

        let available = self.state.segments.lock().available();
        let mut calls = self.state.calls.lock();
        calls.make_resident.push(objects.to_vec());
        calls.available_at_make_resident.push(available);
        drop(calls);

        if self.state.fail_make_resident.load(Ordering::Relaxed) {
            let requested_bytes = objects.iter().map(|h| self.size_of(*h)).sum();
            return Err(ResidencyError::OutOfMemoryDevice { requested_bytes });
        }

        for handle in objects {
            if self.state.resident.lock().insert(handle.0) {
                self.state.segments.lock().local.current_usage += self.size_of(*handle);
            }
        }
        Ok(())
    }

    fn evict(&self, objects: &[PageableHandle]) -> ResidencyResult<()> {
        self.state.calls.lock().evict.push(objects.to_vec());
        for handle in objects {
            if self.state.resident.lock().remove(&handle.0) {
                let size = self.size_of(*handle);
                let mut segments = self.state.segments.lock();
                segments.local.current_usage =
                    segments.local.current_usage.saturating_sub(size);
            }
        }
        Ok(())
    }

    fn completed_value(&self, fence: FenceHandle) -> u64 {
        self.state
            .fences
            .lock()
            .get(&fence.0)
            .map_or(0, |f| f.completed)
    }

    fn signal_fence(&self, fence: FenceHandle, value: u64) -> ResidencyResult<()> {
        let mut fences = self.state.fences.lock();
        if let Some(state) = fences.get_mut(&fence.0) {
            state.last_signaled = state.last_signaled.max(value);
            state.completed = state.completed.max(value);
        }
        self.state.fence_cv.notify_all();
        Ok(())
    }

    fn wait_for_value(&self, fence: FenceHandle, value: u64) {
        // The fake GPU catches up the moment the CPU waits on it; tests
        // that need a fence to stay incomplete simply never wait.
        let mut fences = self.state.fences.lock();
        if let Some(state) = fences.get_mut(&fence.0) {
            state.completed = state.completed.max(value);
        }
        self.state.fence_cv.notify_all();
    }
}

impl VideoMemoryProvider for MockGpu {
    fn query_video_memory_info(
        &self,
        _node_mask: u32,
        segment: MemorySegment,
    ) -> ResidencyResult<VideoMemoryInfo> {
        Ok(self.state.segments.lock().get(segment))
    }
}

#[derive(Debug, Default)]
pub struct QueueLog {
    pub waits: Vec<(FenceHandle, u64)>,
    pub signals: Vec<(FenceHandle, u64)>,
    pub executed: Vec<Vec<CommandListHandle>>,
}

/// A fake submission queue recording everything it is asked to do.
#[derive(Clone)]
pub struct MockQueue {
    id: QueueId,
    gpu: MockGpu,
    log: Arc<Mutex<QueueLog>>,
}

impl MockQueue {
    pub fn new(gpu: &MockGpu, id: u64) -> Self {
        Self {
            id: QueueId(id),
            gpu: gpu.clone(),
            log: Arc::new(Mutex::new(QueueLog::default())),
        }
    }

    pub fn executed(&self) -> Vec<Vec<CommandListHandle>> {
        self.log.lock().executed.clone()
    }

    pub fn waits(&self) -> Vec<(FenceHandle, u64)> {
        self.log.lock().waits.clone()
    }

    pub fn signals(&self) -> Vec<(FenceHandle, u64)> {
        self.log.lock().signals.clone()
    }
}

impl SubmissionQueue for MockQueue {
    fn id(&self) -> QueueId {
        self.id
    }

    fn gpu_wait(&self, fence: FenceHandle, value: u64) -> ResidencyResult<()> {
        self.log.lock().waits.push((fence, value));
        Ok(())
    }

    fn gpu_signal(&self, fence: FenceHandle, value: u64) -> ResidencyResult<()> {
        self.log.lock().signals.push((fence, value));
        let mut fences = self.gpu.state.fences.lock();
        if let Some(state) = fences.get_mut(&fence.0) {
            state.last_signaled = state.last_signaled.max(value);
            if self.gpu.state.auto_complete_signals {
                state.completed = state.completed.max(value);
            }
        }
        self.gpu.state.fence_cv.notify_all();
        Ok(())
    }

    fn execute_command_lists(&self, lists: &[CommandListHandle]) -> ResidencyResult<()> {
        self.log.lock().executed.push(lists.to_vec());
        Ok(())
    }
}

/// Test-controlled clock: nanosecond ticks, advanced explicitly.
#[derive(Clone, Default)]
pub struct ManualClock {
    ticks: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_secs(&self, secs: u64) {
        self.ticks
            .fetch_add(secs * 1_000_000_000, Ordering::Relaxed);
    }
}

impl PagingClock for ManualClock {
    fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn ticks_per_second(&self) -> u64 {
        1_000_000_000
    }
}

/// Mebibytes, the unit every scenario thinks in.
pub const MIB: u64 = 1024 * 1024;
