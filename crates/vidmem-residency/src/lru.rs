//! Least-recently-used residency tracking.
//!
//! Two intrusively linked lists (Resident, Evicted) over an arena of
//! slots, so every move is O(1) and allocation-free once a slot exists.
//! Within the Resident list the head is the stalest object and the tail
//! the freshest; objects referenced by a submission move to the tail, so
//! walking from the head visits eviction candidates in the right order.
//!
//! # Invariants
//!
//! - A tracked object is in exactly one list, matching its status.
//! - `resident_bytes` equals the sum of sizes in the Resident list;
//!   `num_resident` / `num_evicted` equal the list lengths.
//! - The Resident list is ordered by non-decreasing last GPU sync point.
//!
//! All operations require the caller to hold the registry lock.

use tracing::{debug, trace};

use crate::hal::PageableHandle;
use crate::object::{ManagedObject, ResidencyStatus};

/// Index sentinel for "no slot".
const NIL: u32 = u32::MAX;

/// Aggregate counters over the tracked working set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResidencyStats {
    /// Objects currently in the Resident list.
    pub num_resident: usize,
    /// Objects currently in the Evicted list.
    pub num_evicted: usize,
    /// Total size of the Resident list in bytes.
    pub resident_bytes: u64,
}

/// Snapshot of one tracked object's residency attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedObjectState {
    /// Current residency status.
    pub status: ResidencyStatus,
    /// Generation id of the most recent submission referencing the object.
    pub last_gpu_sync_point: u64,
    /// Clock sample taken when the object was last referenced.
    pub last_used_ticks: u64,
}

#[derive(Debug)]
struct Slot {
    object: Option<ManagedObject>,
    status: ResidencyStatus,
    last_gpu_sync_point: u64,
    last_used_ticks: u64,
    prev: u32,
    next: u32,
}

#[derive(Debug, Clone, Copy)]
struct ListEnds {
    head: u32,
    tail: u32,
}

impl ListEnds {
    const fn empty() -> Self {
        Self {
            head: NIL,
            tail: NIL,
        }
    }
}

/// Arena-backed LRU over all tracked objects.
#[derive(Debug)]
pub(crate) struct LruCache {
    slots: Vec<Slot>,
    free: Vec<u32>,
    resident: ListEnds,
    evicted: ListEnds,
    num_resident: usize,
    num_evicted: usize,
    resident_bytes: u64,
}

impl LruCache {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            resident: ListEnds::empty(),
            evicted: ListEnds::empty(),
            num_resident: 0,
            num_evicted: 0,
            resident_bytes: 0,
        }
    }

    /// Begin tracking `object` with the given starting status.
    ///
    /// Fresh objects are inserted at the head of their list: they have not
    /// been referenced by any submission yet, so they are the first
    /// eviction candidates.
    pub(crate) fn insert(&mut self, object: &ManagedObject, status: ResidencyStatus) {
        debug_assert!(
            self.slot_of(object).is_none(),
            "object already tracked: {}",
            object.handle()
        );

        let idx = match self.free.pop() {
            Some(idx) => {
                let slot = &mut self.slots[idx as usize];
                slot.object = Some(object.clone());
                slot.status = status;
                slot.last_gpu_sync_point = 0;
                slot.last_used_ticks = 0;
                idx
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot {
                    object: Some(object.clone()),
                    status,
                    last_gpu_sync_point: 0,
                    last_used_ticks: 0,
                    prev: NIL,
                    next: NIL,
                });
                idx
            }
        };

        match status {
            ResidencyStatus::Resident => {
                Self::push_head(&mut self.slots, &mut self.resident, idx);
                self.num_resident += 1;
                self.resident_bytes += object.size_bytes();
            }
            ResidencyStatus::Evicted => {
                Self::push_head(&mut self.slots, &mut self.evicted, idx);
                self.num_evicted += 1;
            }
        }
        object.set_slot(Some(idx));

        trace!(handle = %object.handle(), size = object.size_bytes(), ?status, "tracking object");
    }

    /// Stop tracking `object`. Returns `false` if it was not tracked here.
    pub(crate) fn remove(&mut self, object: &ManagedObject) -> bool {
        let Some(idx) = self.slot_of(object) else {
            return false;
        };

        match self.slots[idx as usize].status {
            ResidencyStatus::Resident => {
                Self::unlink(&mut self.slots, &mut self.resident, idx);
                self.num_resident -= 1;
                self.resident_bytes -= object.size_bytes();
            }
            ResidencyStatus::Evicted => {
                Self::unlink(&mut self.slots, &mut self.evicted, idx);
                self.num_evicted -= 1;
            }
        }

        self.slots[idx as usize].object = None;
        self.free.push(idx);
        object.set_slot(None);

        trace!(handle = %object.handle(), "tracking ended");
        true
    }

    /// Record a reference by submission `sync_point` at `now_ticks` and move
    /// the object to the Resident tail.
    ///
    /// Precondition: the object is Resident.
    pub(crate) fn touch(&mut self, object: &ManagedObject, sync_point: u64, now_ticks: u64) {
        let Some(idx) = self.slot_of(object) else {
            return;
        };
        debug_assert_eq!(
            self.slots[idx as usize].status,
            ResidencyStatus::Resident,
            "touch on evicted object {}",
            object.handle()
        );

        let slot = &mut self.slots[idx as usize];
        slot.last_gpu_sync_point = sync_point;
        slot.last_used_ticks = now_ticks;

        Self::unlink(&mut self.slots, &mut self.resident, idx);
        Self::push_tail(&mut self.slots, &mut self.resident, idx);
    }

    /// Transition Evicted -> Resident (tail) and adjust aggregates.
    pub(crate) fn mark_resident(&mut self, object: &ManagedObject) {
        let Some(idx) = self.slot_of(object) else {
            return;
        };
        debug_assert_eq!(self.slots[idx as usize].status, ResidencyStatus::Evicted);

        Self::unlink(&mut self.slots, &mut self.evicted, idx);
        self.slots[idx as usize].status = ResidencyStatus::Resident;
        Self::push_tail(&mut self.slots, &mut self.resident, idx);

        self.num_evicted -= 1;
        self.num_resident += 1;
        self.resident_bytes += object.size_bytes();
    }

    /// Evict stale Resident objects until usage drops under budget.
    ///
    /// Walks the Resident list from the head, stopping at the first object
    /// last referenced after `sync_point` (the GPU may not have released it
    /// yet) or as soon as `current_usage` falls below `current_budget`.
    /// Returns the handles to pass to a single device evict call.
    pub(crate) fn trim_to_sync_point_inclusive(
        &mut self,
        mut current_usage: u64,
        current_budget: u64,
        sync_point: u64,
    ) -> Vec<PageableHandle> {
        let mut evictions = Vec::new();

        loop {
            let idx = self.resident.head;
            if idx == NIL {
                break;
            }
            let slot = &self.slots[idx as usize];
            if slot.last_gpu_sync_point > sync_point || current_usage < current_budget {
                break;
            }

            let size = slot.object.as_ref().map_or(0, ManagedObject::size_bytes);
            evictions.push(self.evict_slot(idx));
            current_usage = current_usage.saturating_sub(size);
        }

        if !evictions.is_empty() {
            debug!(
                count = evictions.len(),
                sync_point, "trimmed resident objects up to sync point"
            );
        }
        evictions
    }

    /// Evict Resident objects that have aged past the grace period.
    ///
    /// Walks the Resident list from the head, stopping at the first object
    /// that may still be in flight on the GPU (`last_gpu_sync_point >=
    /// gate_sync_point`) or that was referenced within `grace_ticks`.
    pub(crate) fn trim_aged(
        &mut self,
        gate_sync_point: Option<u64>,
        now_ticks: u64,
        grace_ticks: u64,
    ) -> Vec<PageableHandle> {
        let mut evictions = Vec::new();

        loop {
            let idx = self.resident.head;
            if idx == NIL {
                break;
            }
            let slot = &self.slots[idx as usize];
            let in_flight = gate_sync_point.is_some_and(|gate| slot.last_gpu_sync_point >= gate);
            let recently_used = now_ticks.saturating_sub(slot.last_used_ticks) <= grace_ticks;
            if in_flight || recently_used {
                break;
            }

            evictions.push(self.evict_slot(idx));
        }

        if !evictions.is_empty() {
            debug!(count = evictions.len(), "trimmed aged resident objects");
        }
        evictions
    }

    /// Last GPU sync point of the stalest Resident object, if any.
    pub(crate) fn resident_head_sync_point(&self) -> Option<u64> {
        match self.resident.head {
            NIL => None,
            idx => Some(self.slots[idx as usize].last_gpu_sync_point),
        }
    }

    /// Residency status of `object`, if tracked here.
    pub(crate) fn status_of(&self, object: &ManagedObject) -> Option<ResidencyStatus> {
        self.slot_of(object)
            .map(|idx| self.slots[idx as usize].status)
    }

    /// Snapshot of `object`'s residency attributes, if tracked here.
    pub(crate) fn tracked_state(&self, object: &ManagedObject) -> Option<TrackedObjectState> {
        self.slot_of(object).map(|idx| {
            let slot = &self.slots[idx as usize];
            TrackedObjectState {
                status: slot.status,
                last_gpu_sync_point: slot.last_gpu_sync_point,
                last_used_ticks: slot.last_used_ticks,
            }
        })
    }

    /// Aggregate counters.
    pub(crate) fn stats(&self) -> ResidencyStats {
        ResidencyStats {
            num_resident: self.num_resident,
            num_evicted: self.num_evicted,
            resident_bytes: self.resident_bytes,
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// Resolve the arena slot of `object`, verifying identity.
    ///
    /// Slot indices are reused after `remove`, so a stale object can carry
    /// an index now owned by another object; the identity check rejects it.
    fn slot_of(&self, object: &ManagedObject) -> Option<u32> {
        let idx = object.slot()?;
        let slot = self.slots.get(idx as usize)?;
        match &slot.object {
            Some(current) if current.same_identity(object) => Some(idx),
            _ => None,
        }
    }

    /// Resident -> Evicted for a known slot index. Returns the handle.
    fn evict_slot(&mut self, idx: u32) -> PageableHandle {
        debug_assert_eq!(self.slots[idx as usize].status, ResidencyStatus::Resident);

        Self::unlink(&mut self.slots, &mut self.resident, idx);
        self.slots[idx as usize].status = ResidencyStatus::Evicted;
        Self::push_tail(&mut self.slots, &mut self.evicted, idx);

        let object = self.slots[idx as usize]
            .object
            .as_ref()
            .expect("evicting a freed slot");
        self.num_resident -= 1;
        self.resident_bytes -= object.size_bytes();
        self.num_evicted += 1;

        object.handle()
    }

    fn push_head(slots: &mut [Slot], list: &mut ListEnds, idx: u32) {
        slots[idx as usize].prev = NIL;
        slots[idx as usize].next = list.head;
        if list.head != NIL {
            slots[list.head as usize].prev = idx;
        } else {
            list.tail = idx;
        }
        list.head = idx;
    }

    fn push_tail(slots: &mut [Slot], list: &mut ListEnds, idx: u32) {
        slots[idx as usize].next = NIL;
        slots[idx as usize].prev = list.tail;
        if list.tail != NIL {
            slots[list.tail as usize].next = idx;
        } else {
            list.head = idx;
        }
        list.tail = idx;
    }

    fn unlink(slots: &mut [Slot], list: &mut ListEnds, idx: u32) {
        let (prev, next) = {
            let slot = &slots[idx as usize];
            (slot.prev, slot.next)
        };

        if prev != NIL {
            slots[prev as usize].next = next;
        } else {
            list.head = next;
        }
        if next != NIL {
            slots[next as usize].prev = prev;
        } else {
            list.tail = prev;
        }

        slots[idx as usize].prev = NIL;
        slots[idx as usize].next = NIL;
    }

    /// Walk a list front to back, returning raw handles. Test support.
    #[cfg(test)]
    fn list_handles(&self, status: ResidencyStatus) -> Vec<u64> {
        let mut out = Vec::new();
        let list = match status {
            ResidencyStatus::Resident => &self.resident,
            ResidencyStatus::Evicted => &self.evicted,
        };
        let mut idx = list.head;
        while idx != NIL {
            let slot = &self.slots[idx as usize];
            out.push(slot.object.as_ref().expect("freed slot in list").handle().0);
            idx = slot.next;
        }
        out
    }
}
