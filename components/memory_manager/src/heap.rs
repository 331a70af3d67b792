//! Object heap with reference counting.
//!
//! This module implements the object-lifetime provider the stack and frame
//! layers run against:
//! - Allocation with an optional live-object ceiling (surfaced as `OutOfMemory`)
//! - Atomic reference counts, immortal objects and deferred-reclamation enrollment
//! - Destruction that runs finalizers and releases owned references
//! - Garbage-collector tracking and traversal of owned edges
//!
//! The heap is `Send + Sync`; in free-threading mode several threads share one
//! heap through an `Arc`.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use core_types::{
    ExecutionMode, ObjectId, ObjectLifetime, RuntimeConfig, RuntimeError, RuntimeResult,
};
use crossbeam::utils::CachePadded;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::gc::VisitResult;
use crate::object::{Finalizer, HeapPayload, ObjectKind};

/// Count reported for immortal objects; never changes.
pub const IMMORTAL_REFCOUNT: usize = u32::MAX as usize;

/// A single slot in the object table.
struct ObjectEntry {
    kind: ObjectKind,
    refcount: AtomicUsize,
    immortal: bool,
    deferred: AtomicBool,
    tracked: AtomicBool,
    alive: AtomicBool,
    /// Number of times this object went through destruction (must stay <= 1)
    destroyed: AtomicU32,
    /// Owned references, released on destruction
    references: Mutex<Vec<ObjectId>>,
    payload: Mutex<Option<Box<dyn HeapPayload>>>,
    finalizer: Mutex<Option<Finalizer>>,
}

impl ObjectEntry {
    fn new(kind: ObjectKind, immortal: bool, payload: Option<Box<dyn HeapPayload>>) -> Self {
        ObjectEntry {
            kind,
            refcount: AtomicUsize::new(if immortal { IMMORTAL_REFCOUNT } else { 1 }),
            immortal,
            deferred: AtomicBool::new(false),
            tracked: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            destroyed: AtomicU32::new(0),
            references: Mutex::new(Vec::new()),
            payload: Mutex::new(payload),
            finalizer: Mutex::new(None),
        }
    }
}

/// Hot counters, padded so threads bumping different counters don't share lines.
#[derive(Default)]
struct Counters {
    allocations: CachePadded<AtomicU64>,
    deallocations: CachePadded<AtomicU64>,
    increments: CachePadded<AtomicU64>,
    decrements: CachePadded<AtomicU64>,
}

/// Snapshot of heap activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Objects allocated (excluding built-in singletons)
    pub allocations: u64,
    /// Objects destroyed
    pub deallocations: u64,
    /// Count increments applied to mortal objects
    pub increments: u64,
    /// Count decrements applied to mortal objects
    pub decrements: u64,
    /// Objects currently alive (excluding built-in singletons)
    pub live_objects: usize,
}

/// The object heap.
///
/// Contains:
/// - The object table, indexed by [`ObjectId`]. Entries of destroyed objects
///   are never reused, so the table grows for the life of the heap and ids
///   stay unique
/// - The immortal `None`/`True`/`False` singletons
/// - Activity counters
pub struct ObjectHeap {
    config: RuntimeConfig,
    objects: RwLock<Vec<Arc<ObjectEntry>>>,
    live: AtomicUsize,
    fail_next_allocation: AtomicBool,
    counters: Counters,
    none: ObjectId,
    true_object: ObjectId,
    false_object: ObjectId,
}

impl ObjectHeap {
    /// Creates a heap for the given configuration.
    pub fn new(config: &RuntimeConfig) -> Self {
        let singletons: Vec<Arc<ObjectEntry>> = (0..3)
            .map(|_| Arc::new(ObjectEntry::new(ObjectKind::Singleton, true, None)))
            .collect();
        ObjectHeap {
            config: config.clone(),
            objects: RwLock::new(singletons),
            live: AtomicUsize::new(0),
            fail_next_allocation: AtomicBool::new(false),
            counters: Counters::default(),
            none: ObjectId::from_index(0),
            true_object: ObjectId::from_index(1),
            false_object: ObjectId::from_index(2),
        }
    }

    /// Creates a heap with default configuration in the given mode.
    pub fn with_mode(mode: ExecutionMode) -> Self {
        Self::new(&RuntimeConfig {
            mode,
            ..RuntimeConfig::default()
        })
    }

    /// Returns the configuration the heap was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The immortal `None` singleton.
    pub fn none(&self) -> ObjectId {
        self.none
    }

    /// The immortal `True` singleton.
    pub fn true_object(&self) -> ObjectId {
        self.true_object
    }

    /// The immortal `False` singleton.
    pub fn false_object(&self) -> ObjectId {
        self.false_object
    }

    /// Allocates a mortal object with count 1, owned by the caller.
    pub fn alloc(&self, kind: ObjectKind) -> RuntimeResult<ObjectId> {
        self.alloc_entry(kind, false, None)
    }

    /// Allocates a mortal object carrying `payload`.
    pub fn alloc_with_payload(
        &self,
        kind: ObjectKind,
        payload: Box<dyn HeapPayload>,
    ) -> RuntimeResult<ObjectId> {
        self.alloc_entry(kind, false, Some(payload))
    }

    /// Allocates an immortal object.
    pub fn alloc_immortal(&self, kind: ObjectKind) -> RuntimeResult<ObjectId> {
        self.alloc_entry(kind, true, None)
    }

    fn alloc_entry(
        &self,
        kind: ObjectKind,
        immortal: bool,
        payload: Option<Box<dyn HeapPayload>>,
    ) -> RuntimeResult<ObjectId> {
        if self.fail_next_allocation.swap(false, Ordering::AcqRel) {
            debug!(kind = kind.name(), "allocation refused");
            return Err(RuntimeError::OutOfMemory { what: kind.name() });
        }
        if let Some(max) = self.config.max_objects {
            if self.live.load(Ordering::Acquire) >= max {
                debug!(kind = kind.name(), max, "live object ceiling reached");
                return Err(RuntimeError::OutOfMemory { what: kind.name() });
            }
        }

        let mut objects = self.objects.write();
        let id = next_id(objects.len(), kind)?;
        objects.push(Arc::new(ObjectEntry::new(kind, immortal, payload)));
        drop(objects);

        self.live.fetch_add(1, Ordering::AcqRel);
        self.counters.allocations.fetch_add(1, Ordering::Relaxed);
        trace!(%id, kind = kind.name(), immortal, "allocated object");
        Ok(id)
    }

    /// Makes the next allocation fail with `OutOfMemory`.
    ///
    /// Models allocator refusal for callers that must recover from it.
    pub fn inject_allocation_failure(&self) {
        self.fail_next_allocation.store(true, Ordering::Release);
    }

    fn entry(&self, id: ObjectId) -> Arc<ObjectEntry> {
        let objects = self.objects.read();
        match objects.get(id.index()) {
            Some(entry) => Arc::clone(entry),
            None => panic!("unknown object {id}"),
        }
    }

    /// Moves a reference the caller owns into `owner`.
    ///
    /// The reference is released when `owner` is destroyed and reported by
    /// [`ObjectHeap::traverse`].
    pub fn add_reference(&self, owner: ObjectId, child: ObjectId) {
        let entry = self.entry(owner);
        debug_assert!(entry.alive.load(Ordering::Acquire), "{owner} is dead");
        entry.references.lock().push(child);
    }

    /// References owned directly by `owner` (excluding payload edges).
    pub fn references(&self, owner: ObjectId) -> Vec<ObjectId> {
        self.entry(owner).references.lock().clone()
    }

    /// Installs a finalizer run when `obj` is destroyed.
    pub fn set_finalizer<F>(&self, obj: ObjectId, finalizer: F)
    where
        F: FnOnce(&ObjectHeap, ObjectId) -> RuntimeResult<()> + Send + 'static,
    {
        *self.entry(obj).finalizer.lock() = Some(Box::new(finalizer));
    }

    /// Enrolls `obj` in deferred reclamation.
    ///
    /// Only meaningful under free-threading; returns whether the object is
    /// now enrolled.
    pub fn enable_deferred(&self, obj: ObjectId) -> bool {
        let entry = self.entry(obj);
        if !self.config.mode.is_free_threading() || entry.immortal {
            return false;
        }
        entry.deferred.store(true, Ordering::Release);
        true
    }

    /// Registers `obj` with the garbage collector.
    pub fn track(&self, obj: ObjectId) {
        self.entry(obj).tracked.store(true, Ordering::Release);
    }

    /// Removes `obj` from the garbage collector's view.
    pub fn untrack(&self, obj: ObjectId) {
        self.entry(obj).tracked.store(false, Ordering::Release);
    }

    /// Returns whether `obj` is tracked by the garbage collector.
    pub fn is_tracked(&self, obj: ObjectId) -> bool {
        self.entry(obj).tracked.load(Ordering::Acquire)
    }

    /// Returns whether `obj` has not been destroyed.
    pub fn is_alive(&self, obj: ObjectId) -> bool {
        self.entry(obj).alive.load(Ordering::Acquire)
    }

    /// How many times `obj` went through destruction.
    pub fn times_destroyed(&self, obj: ObjectId) -> u32 {
        self.entry(obj).destroyed.load(Ordering::Acquire)
    }

    /// Kind of `obj`.
    pub fn kind(&self, obj: ObjectId) -> ObjectKind {
        self.entry(obj).kind
    }

    /// Number of live objects (excluding built-in singletons).
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Snapshot of heap activity.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            deallocations: self.counters.deallocations.load(Ordering::Relaxed),
            increments: self.counters.increments.load(Ordering::Relaxed),
            decrements: self.counters.decrements.load(Ordering::Relaxed),
            live_objects: self.live_objects(),
        }
    }

    /// Runs `f` on the payload of `obj` if it has one of type `T`.
    ///
    /// The payload is locked for the duration of `f`; `f` must not perform
    /// count operations or access the same payload again.
    pub fn with_payload<T, R, F>(&self, obj: ObjectId, f: F) -> Option<R>
    where
        T: HeapPayload,
        F: FnOnce(&mut T) -> R,
    {
        let entry = self.entry(obj);
        let mut payload = entry.payload.lock();
        let typed = payload.as_mut()?.as_any_mut().downcast_mut::<T>()?;
        Some(f(typed))
    }

    /// Visits every reference `obj` owns: direct references, then payload edges.
    pub fn traverse(
        &self,
        obj: ObjectId,
        visit: &mut dyn FnMut(ObjectId) -> VisitResult,
    ) -> VisitResult {
        let entry = self.entry(obj);
        let references = entry.references.lock().clone();
        for child in references {
            visit(child)?;
        }
        let payload = entry.payload.lock();
        let result = match payload.as_ref() {
            Some(payload) => payload.traverse(visit),
            None => ControlFlow::Continue(()),
        };
        result
    }

    fn destroy(&self, obj: ObjectId, entry: &ObjectEntry) -> RuntimeResult<()> {
        let previous = entry.destroyed.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(previous, 0, "{obj} destroyed twice");
        entry.alive.store(false, Ordering::Release);
        entry.tracked.store(false, Ordering::Release);
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.counters.deallocations.fetch_add(1, Ordering::Relaxed);
        debug!(%obj, kind = entry.kind.name(), "destroying object");

        // None of the entry's locks may be held while running teardown code:
        // finalizers and payloads re-enter the heap.
        let mut result = Ok(());
        let finalizer = entry.finalizer.lock().take();
        if let Some(finalizer) = finalizer {
            result = finalizer(self, obj);
        }
        let references = std::mem::take(&mut *entry.references.lock());
        for child in references {
            result = result.and(self.decref(child));
        }
        let payload = entry.payload.lock().take();
        if let Some(payload) = payload {
            result = result.and(payload.dealloc(self));
        }
        result
    }
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default())
    }
}

impl std::fmt::Debug for ObjectHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHeap")
            .field("mode", &self.config.mode)
            .field("stats", &self.stats())
            .finish()
    }
}

impl ObjectLifetime for ObjectHeap {
    fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    fn incref(&self, obj: ObjectId) {
        let entry = self.entry(obj);
        if entry.immortal {
            return;
        }
        debug_assert!(
            entry.alive.load(Ordering::Acquire),
            "incref of destroyed {obj}"
        );
        entry.refcount.fetch_add(1, Ordering::Relaxed);
        self.counters.increments.fetch_add(1, Ordering::Relaxed);
    }

    fn decref(&self, obj: ObjectId) -> RuntimeResult<()> {
        let entry = self.entry(obj);
        if entry.immortal {
            return Ok(());
        }
        let previous = entry.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "reference count underflow on {obj}");
        self.counters.decrements.fetch_add(1, Ordering::Relaxed);
        if previous == 1 {
            self.destroy(obj, &entry)
        } else {
            Ok(())
        }
    }

    fn is_immortal(&self, obj: ObjectId) -> bool {
        self.entry(obj).immortal
    }

    fn has_deferred_refcount(&self, obj: ObjectId) -> bool {
        self.entry(obj).deferred.load(Ordering::Acquire)
    }

    fn refcount(&self, obj: ObjectId) -> usize {
        self.entry(obj).refcount.load(Ordering::Acquire)
    }
}

/// Id of the entry appended to a table of `len` entries.
fn next_id(len: usize, kind: ObjectKind) -> RuntimeResult<ObjectId> {
    match u32::try_from(len) {
        Ok(index) => Ok(ObjectId::from_index(index)),
        Err(_) => {
            debug!(kind = kind.name(), len, "object table exhausted");
            Err(RuntimeError::OutOfMemory { what: kind.name() })
        }
    }
}
