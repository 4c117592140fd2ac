//! Freshness registry: bounded peer sets ordered by last sighting.
//!
//! Entries live in an arena of slots; the heap is an array of slot ids
//! ordered by ascending timestamp, so the root is always the stalest entry.
//! Each slot records its own position in the heap array, which lets an
//! update re-heapify from the right place without searching.
//!
//! Heap positions never leave this module. Callers hold an `EntryHandle`
//! (slot id + generation) and go through push / pop_oldest / update.

use std::collections::HashMap;

use murmur_core::{NearbyPeer, RemotePeer};
use tokio::sync::Mutex;

/// What the registry needs to know about an entry.
pub trait Freshness {
    /// Last-seen time, unix seconds. Smaller is staler.
    fn ts(&self) -> i64;

    /// Identity the entry is about. One entry per identity.
    fn identity(&self) -> &[u8];
}

impl Freshness for NearbyPeer {
    fn ts(&self) -> i64 {
        self.sighting.ts
    }

    fn identity(&self) -> &[u8] {
        &self.sighting.public_key
    }
}

impl Freshness for RemotePeer {
    fn ts(&self) -> i64 {
        self.0.ts
    }

    fn identity(&self) -> &[u8] {
        &self.0.public_key
    }
}

/// Stable reference to an entry. Goes stale once the entry is evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle {
    slot: usize,
    generation: u64,
}

/// Outcome of a push.
#[derive(Debug)]
pub struct Pushed<T> {
    /// Handle to the pushed entry, `None` if it was evicted straight away.
    pub handle: Option<EntryHandle>,
    /// Whether an entry for the same identity was refreshed in place.
    pub refreshed: bool,
    /// Entry dropped to respect the capacity bound.
    pub evicted: Option<T>,
}

struct Slot<T> {
    entry: T,
    heap_index: usize,
    generation: u64,
}

// ── Heap ──────────────────────────────────────────────────────────────────────

/// Unsynchronized heap. Wrapped by `FreshnessRegistry` for shared use.
pub struct FreshnessHeap<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    heap: Vec<usize>,
    by_identity: HashMap<Vec<u8>, usize>,
    capacity: usize,
    next_generation: u64,
}

impl<T: Freshness> FreshnessHeap<T> {
    /// A heap holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            heap: Vec::new(),
            by_identity: HashMap::new(),
            capacity: capacity.max(1),
            next_generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert an entry, or refresh the entry already held for its identity.
    ///
    /// When the heap grows past capacity the oldest entry is evicted, which
    /// may be the one just pushed if it is staler than everything else.
    pub fn push(&mut self, entry: T) -> Pushed<T> {
        if let Some(&slot) = self.by_identity.get(entry.identity()) {
            let handle = self.handle_for(slot);
            self.update(handle, |held| *held = entry);
            return Pushed {
                handle: Some(handle),
                refreshed: true,
                evicted: None,
            };
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let heap_index = self.heap.len();
        let identity = entry.identity().to_vec();
        let new_slot = Slot {
            entry,
            heap_index,
            generation,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(new_slot);
                slot
            }
            None => {
                self.slots.push(Some(new_slot));
                self.slots.len() - 1
            }
        };
        self.by_identity.insert(identity, slot);
        self.heap.push(slot);
        self.sift_up(heap_index);

        let mut handle = Some(EntryHandle { slot, generation });
        let mut evicted = None;
        if self.heap.len() > self.capacity {
            if self.heap[0] == slot {
                handle = None;
            }
            evicted = self.pop_oldest();
        }
        Pushed {
            handle,
            refreshed: false,
            evicted,
        }
    }

    /// Remove and return the stalest entry.
    pub fn pop_oldest(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.swap(0, last);
        let slot = self.heap.pop()?;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        let removed = self.slots[slot].take()?;
        self.free.push(slot);
        self.by_identity.remove(removed.entry.identity());
        Some(removed.entry)
    }

    /// The stalest entry, without removing it.
    pub fn peek_oldest(&self) -> Option<&T> {
        self.heap.first().and_then(|&slot| self.entry(slot))
    }

    /// Mutate an entry in place and restore heap order from its position.
    ///
    /// Returns false if the handle is stale. If the mutation moves the entry
    /// onto an identity held by another entry, that other entry is dropped.
    pub fn update(&mut self, handle: EntryHandle, f: impl FnOnce(&mut T)) -> bool {
        let Some(slot) = self.live_slot_mut(handle) else {
            return false;
        };
        let before = slot.entry.identity().to_vec();
        f(&mut slot.entry);
        let heap_index = slot.heap_index;
        let after = slot.entry.identity().to_vec();

        // Removal only repairs the position it vacates, so restore order first
        self.fix(heap_index);

        if before != after {
            self.by_identity.remove(&before);
            if let Some(other) = self.by_identity.insert(after, handle.slot) {
                if other != handle.slot {
                    self.remove_slot(other);
                }
            }
        }
        true
    }

    /// Push `entry` unless the entry held for its identity is at least as fresh.
    ///
    /// Returns `None` when the held entry wins and nothing changed.
    pub fn push_if_fresher(&mut self, entry: T) -> Option<Pushed<T>> {
        if let Some(&slot) = self.by_identity.get(entry.identity()) {
            if self.entry(slot).is_some_and(|held| held.ts() >= entry.ts()) {
                return None;
            }
        }
        Some(self.push(entry))
    }

    /// Look up an entry by handle.
    pub fn get(&self, handle: EntryHandle) -> Option<&T> {
        match self.slots.get(handle.slot)? {
            Some(slot) if slot.generation == handle.generation => Some(&slot.entry),
            _ => None,
        }
    }

    /// Handle for the entry currently held for `identity`.
    pub fn find(&self, identity: &[u8]) -> Option<EntryHandle> {
        self.by_identity
            .get(identity)
            .map(|&slot| self.handle_for(slot))
    }

    /// Entries in heap-array order. Only the first is guaranteed to be the oldest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.heap.iter().filter_map(|&slot| self.entry(slot))
    }

    fn entry(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot)?.as_ref().map(|s| &s.entry)
    }

    fn handle_for(&self, slot: usize) -> EntryHandle {
        let generation = self.slots[slot].as_ref().map_or(u64::MAX, |s| s.generation);
        EntryHandle { slot, generation }
    }

    fn live_slot_mut(&mut self, handle: EntryHandle) -> Option<&mut Slot<T>> {
        match self.slots.get_mut(handle.slot)? {
            Some(slot) if slot.generation == handle.generation => Some(slot),
            _ => None,
        }
    }

    fn remove_slot(&mut self, slot: usize) {
        let Some(pos) = self.slots[slot].as_ref().map(|s| s.heap_index) else {
            return;
        };
        let last = self.heap.len() - 1;
        self.swap(pos, last);
        self.heap.pop();
        if pos < self.heap.len() {
            self.fix(pos);
        }
        self.slots[slot] = None;
        self.free.push(slot);
    }

    fn ts_at(&self, pos: usize) -> i64 {
        self.entry(self.heap[pos]).map_or(i64::MIN, Freshness::ts)
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.ts_at(i) < self.ts_at(j)
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        for pos in [i, j] {
            let slot = self.heap[pos];
            if let Some(s) = self.slots[slot].as_mut() {
                s.heap_index = pos;
            }
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.less(pos, parent) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    /// Returns true if the entry moved down.
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.heap.len();
        let mut pos = start;
        loop {
            let left = 2 * pos + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }
            if !self.less(child, pos) {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
        pos > start
    }

    fn fix(&mut self, pos: usize) {
        if !self.sift_down(pos) {
            self.sift_up(pos);
        }
    }
}

impl<T: Freshness + Clone> FreshnessHeap<T> {
    /// Clone of every entry in heap-array order.
    pub fn entries(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// A `FreshnessHeap` behind its own lock, shared between tasks.
pub struct FreshnessRegistry<T> {
    inner: Mutex<FreshnessHeap<T>>,
}

/// Nearby peers: directly reachable, with transport addresses.
pub type NearbyRegistry = FreshnessRegistry<NearbyPeer>;

/// Remote peers: known by identity only.
pub type RemoteRegistry = FreshnessRegistry<RemotePeer>;

impl<T: Freshness + Clone> FreshnessRegistry<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(FreshnessHeap::new(capacity)),
        }
    }

    pub async fn push(&self, entry: T) -> Pushed<T> {
        self.inner.lock().await.push(entry)
    }

    /// Freshness check and upsert under one lock acquisition.
    pub async fn push_if_fresher(&self, entry: T) -> Option<Pushed<T>> {
        self.inner.lock().await.push_if_fresher(entry)
    }

    pub async fn pop_oldest(&self) -> Option<T> {
        self.inner.lock().await.pop_oldest()
    }

    pub async fn update(&self, handle: EntryHandle, f: impl FnOnce(&mut T)) -> bool {
        self.inner.lock().await.update(handle, f)
    }

    pub async fn find(&self, identity: &[u8]) -> Option<EntryHandle> {
        self.inner.lock().await.find(identity)
    }

    /// Timestamp held for `identity`, if any.
    pub async fn ts_of(&self, identity: &[u8]) -> Option<i64> {
        let heap = self.inner.lock().await;
        heap.find(identity).and_then(|h| heap.get(h)).map(Freshness::ts)
    }

    pub async fn oldest(&self) -> Option<T> {
        self.inner.lock().await.peek_oldest().cloned()
    }

    /// Point-in-time copy of the heap array.
    pub async fn entries(&self) -> Vec<T> {
        self.inner.lock().await.entries()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}
