//! Managed objects and per-command-list residency sets.
//!
//! A [`ManagedObject`] is the application's handle to one pageable GPU
//! object under residency tracking. It is a cheap clone (shared identity);
//! the mutable residency attributes live in the LRU arena slot the object
//! points at, so LRU moves stay O(1) without allocation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::hal::PageableHandle;

/// Whether a tracked object currently occupies video memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResidencyStatus {
    /// The object's physical backing is in video memory.
    Resident,
    /// The object has been paged out.
    Evicted,
}

/// Sentinel slot value meaning "not tracked".
const UNTRACKED: u32 = u32::MAX;

#[derive(Debug)]
struct ObjectIdentity {
    handle: PageableHandle,
    size_bytes: u64,
    /// Arena slot index while tracked, [`UNTRACKED`] otherwise.
    ///
    /// Written only under the registry lock; Relaxed is sufficient.
    slot: AtomicU32,
}

/// One pageable GPU object registered with the residency manager.
///
/// Create one per GPU object, register it with
/// [`ResidencyManager::begin_tracking`](crate::ResidencyManager::begin_tracking),
/// insert it into the [`ResidencySet`] of every command list that references
/// it, and call
/// [`end_tracking`](crate::ResidencyManager::end_tracking) before destroying
/// the underlying GPU object. Clones share identity: they refer to the same
/// tracked object.
#[derive(Debug, Clone)]
pub struct ManagedObject {
    inner: Arc<ObjectIdentity>,
}

impl ManagedObject {
    /// Wrap a pageable GPU object of the given size.
    ///
    /// The size must match what the object occupies in video memory; it is
    /// what every budget decision is based on.
    #[must_use]
    pub fn new(handle: PageableHandle, size_bytes: u64) -> Self {
        Self {
            inner: Arc::new(ObjectIdentity {
                handle,
                size_bytes,
                slot: AtomicU32::new(UNTRACKED),
            }),
        }
    }

    /// The underlying GPU object handle.
    #[must_use]
    pub fn handle(&self) -> PageableHandle {
        self.inner.handle
    }

    /// Size of the object in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.inner.size_bytes
    }

    /// Whether the object is currently registered with a manager.
    #[must_use]
    pub fn is_tracked(&self) -> bool {
        self.inner.slot.load(Ordering::Relaxed) != UNTRACKED
    }

    /// Arena slot index, if tracked.
    pub(crate) fn slot(&self) -> Option<u32> {
        match self.inner.slot.load(Ordering::Relaxed) {
            UNTRACKED => None,
            idx => Some(idx),
        }
    }

    pub(crate) fn set_slot(&self, slot: Option<u32>) {
        self.inner.slot.store(slot.unwrap_or(UNTRACKED), Ordering::Relaxed);
    }

    /// Whether two handles refer to the same tracked object.
    pub(crate) fn same_identity(&self, other: &ManagedObject) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// The deduplicated set of objects referenced by one command list.
///
/// The application owns one per command list, inserts every object the
/// list binds, and passes it alongside the list at submission. [`reset`]
/// clears it for reuse on the next frame.
///
/// [`reset`]: ResidencySet::reset
#[derive(Debug, Default)]
pub struct ResidencySet {
    objects: Vec<ManagedObject>,
    seen: HashSet<u64>,
}

impl ResidencySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object reference.
    ///
    /// Returns `true` if the object was newly inserted, `false` if it was
    /// already in the set.
    pub fn insert(&mut self, object: &ManagedObject) -> bool {
        if self.seen.insert(object.handle().0) {
            self.objects.push(object.clone());
            true
        } else {
            false
        }
    }

    /// Remove all objects, keeping allocations for reuse.
    pub fn reset(&mut self) {
        self.objects.clear();
        self.seen.clear();
    }

    /// Number of distinct objects in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Iterate over the objects in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &ManagedObject> {
        self.objects.iter()
    }
}
