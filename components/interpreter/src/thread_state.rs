//! Per-thread frame stack
//!
//! Frame records live in a [`FrameArena`] owned by the thread and are
//! addressed by generational [`FrameHandle`]s, so a handle to a popped record
//! is detected instead of aliasing a newer one. The "current frame" is kept in
//! a shared [`CurrentFrame`] cell that other components (profilers, tracebacks
//! built from finalizers) can read at any time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use core_types::{ObjectId, ObjectLifetime, RuntimeError, RuntimeResult};
use crossbeam::atomic::AtomicCell;
use memory_manager::{ObjectHeap, StackRef, VisitResult};
use tracing::trace;

use crate::code::{function_code, with_code};
use crate::frame::{FrameLayout, FrameOwner, FrameRecord, GeneratorState};

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(0);

/// Generational index of a frame record in its thread's arena.
///
/// Handles also name the arena that issued them, so a handle that reaches
/// another thread (through a shared frame object) never resolves there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle {
    arena: u32,
    index: u32,
    generation: u32,
}

impl FrameHandle {
    /// Arena slot index.
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Identity of the arena that issued this handle.
    pub fn arena_id(self) -> u32 {
        self.arena
    }
}

impl std::fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame#{}:{}.{}", self.arena, self.index, self.generation)
    }
}

/// Shared cell naming the frame a thread is executing.
pub type CurrentFrame = AtomicCell<Option<FrameHandle>>;

#[derive(Debug)]
struct ArenaSlot {
    generation: u32,
    record: Option<FrameRecord>,
}

/// Slab of frame records with slot reuse.
#[derive(Debug)]
pub struct FrameArena {
    id: u32,
    slots: Vec<ArenaSlot>,
    free: Vec<u32>,
    len: usize,
}

impl Default for FrameArena {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl FrameArena {
    /// Creates an arena with room for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        FrameArena {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Identity stamped into every handle this arena issues.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Returns whether `handle` was issued by this arena.
    pub fn owns(&self, handle: FrameHandle) -> bool {
        handle.arena == self.id
    }

    fn slot(&self, handle: FrameHandle) -> Option<&ArenaSlot> {
        if !self.owns(handle) {
            return None;
        }
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: FrameHandle) -> Option<&mut ArenaSlot> {
        if !self.owns(handle) {
            return None;
        }
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
    }

    /// Stores `record` and returns its handle.
    pub fn insert(&mut self, record: FrameRecord) -> FrameHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.record.is_none());
            slot.record = Some(record);
            return FrameHandle {
                arena: self.id,
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(ArenaSlot {
            generation: 0,
            record: Some(record),
        });
        FrameHandle {
            arena: self.id,
            index,
            generation: 0,
        }
    }

    /// Record behind `handle`, unless it was removed.
    pub fn get(&self, handle: FrameHandle) -> Option<&FrameRecord> {
        self.slot(handle).and_then(|slot| slot.record.as_ref())
    }

    /// Mutable record behind `handle`, unless it was removed.
    pub fn get_mut(&mut self, handle: FrameHandle) -> Option<&mut FrameRecord> {
        self.slot_mut(handle).and_then(|slot| slot.record.as_mut())
    }

    /// Removes the record behind `handle`; the handle goes stale.
    pub fn remove(&mut self, handle: FrameHandle) -> Option<FrameRecord> {
        let slot = self.slot_mut(handle)?;
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(record)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Execution state of one thread: its frame stack and pending error.
#[derive(Debug)]
pub struct ThreadState {
    heap: Arc<ObjectHeap>,
    pub(crate) frames: FrameArena,
    current: Arc<CurrentFrame>,
    pub(crate) pending_error: Option<RuntimeError>,
}

impl ThreadState {
    /// Creates a thread state allocating from `heap`.
    pub fn new(heap: Arc<ObjectHeap>) -> Self {
        let capacity = heap.config().frame_arena_capacity;
        ThreadState {
            heap,
            frames: FrameArena::with_capacity(capacity),
            current: Arc::new(AtomicCell::new(None)),
            pending_error: None,
        }
    }

    /// Heap this thread allocates from.
    pub fn heap(&self) -> &Arc<ObjectHeap> {
        &self.heap
    }

    /// Frame currently executing.
    pub fn current_frame(&self) -> Option<FrameHandle> {
        self.current.load()
    }

    /// Shared handle to the current-frame cell.
    pub fn current_frame_cell(&self) -> Arc<CurrentFrame> {
        Arc::clone(&self.current)
    }

    /// Record behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the record was popped.
    pub fn frame(&self, handle: FrameHandle) -> &FrameRecord {
        match self.frames.get(handle) {
            Some(record) => record,
            None => panic!("stale frame handle {handle}"),
        }
    }

    /// Mutable record behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the record was popped.
    pub fn frame_mut(&mut self, handle: FrameHandle) -> &mut FrameRecord {
        match self.frames.get_mut(handle) {
            Some(record) => record,
            None => panic!("stale frame handle {handle}"),
        }
    }

    /// Returns whether `handle` still names a record.
    pub fn contains(&self, handle: FrameHandle) -> bool {
        self.frames.get(handle).is_some()
    }

    /// Number of records in the arena.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Error waiting to be reported, if any.
    pub fn pending_error(&self) -> Option<&RuntimeError> {
        self.pending_error.as_ref()
    }

    /// Sets the pending error, replacing any previous one.
    pub fn set_pending_error(&mut self, error: RuntimeError) {
        self.pending_error = Some(error);
    }

    /// Takes the pending error.
    pub fn take_pending_error(&mut self) -> Option<RuntimeError> {
        self.pending_error.take()
    }

    fn new_record(&self, function: ObjectId, locals: Option<ObjectId>, owner: FrameOwner) -> FrameRecord {
        let heap = &*self.heap;
        let code = match function_code(heap, function) {
            Some(code) => code,
            None => panic!("{function} is not a function object"),
        };
        let layout = with_code(heap, code, FrameLayout::of).unwrap_or_default();
        if let Some(locals) = locals {
            heap.incref(locals);
        }
        FrameRecord::new(
            StackRef::from_borrowed(heap, code),
            StackRef::from_borrowed(heap, function),
            locals,
            layout,
            owner,
        )
    }

    /// Pushes a frame calling `function` and makes it current.
    ///
    /// `function` and `locals` are borrowed; the record takes its own
    /// references to them and to the function's code unit.
    pub fn push_frame(
        &mut self,
        function: ObjectId,
        locals: Option<ObjectId>,
        owner: FrameOwner,
    ) -> FrameHandle {
        debug_assert!(
            matches!(owner, FrameOwner::Transient | FrameOwner::ThreadOwned),
            "use push_generator_frame for generator frames"
        );
        let mut record = self.new_record(function, locals, owner);
        record.set_previous(self.current_frame());
        let handle = self.frames.insert(record);
        self.current.store(Some(handle));
        trace!(%handle, %function, ?owner, "pushed frame");
        handle
    }

    /// Creates the frame of a new generator or coroutine.
    ///
    /// The frame starts suspended-owned and unlinked; [`ThreadState::resume`]
    /// starts it.
    pub fn push_generator_frame(&mut self, function: ObjectId, locals: Option<ObjectId>) -> FrameHandle {
        let record = self.new_record(function, locals, FrameOwner::SuspendedOwner);
        let handle = self.frames.insert(record);
        trace!(%handle, %function, "created generator frame");
        handle
    }

    /// Links a generator frame on top of the current frame and runs it.
    pub fn resume(&mut self, handle: FrameHandle) {
        let previous = self.current_frame();
        let record = self.frame_mut(handle);
        assert_eq!(record.owner(), FrameOwner::SuspendedOwner, "{handle} is not suspended");
        assert!(
            matches!(
                record.generator_state(),
                Some(GeneratorState::Created | GeneratorState::Suspended)
            ),
            "{handle} cannot be resumed"
        );
        record.set_owner(FrameOwner::ThreadOwned);
        record.set_generator_state(GeneratorState::Running);
        record.set_previous(previous);
        self.current.store(Some(handle));
        trace!(%handle, "resumed generator frame");
    }

    /// Yields from a running generator frame back to its caller.
    pub fn suspend(&mut self, handle: FrameHandle) {
        assert_eq!(self.current_frame(), Some(handle), "{handle} is not running");
        let record = self.frame_mut(handle);
        assert_eq!(record.generator_state(), Some(GeneratorState::Running));
        let previous = record.take_previous();
        record.set_owner(FrameOwner::SuspendedOwner);
        record.set_generator_state(GeneratorState::Suspended);
        self.current.store(previous);
        trace!(%handle, "suspended generator frame");
    }

    /// Makes the caller of `handle` current again.
    ///
    /// The record keeps its link to the caller for later introspection.
    pub fn unlink(&mut self, handle: FrameHandle) {
        assert_eq!(
            self.current_frame(),
            Some(handle),
            "only the current frame can be unlinked"
        );
        let previous = self.frame(handle).previous();
        self.current.store(previous);
    }

    /// Releases every live slot of `handle` and its locals mapping.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is the current frame.
    pub fn clear_locals(&mut self, handle: FrameHandle) -> RuntimeResult<()> {
        assert_ne!(
            self.current_frame(),
            Some(handle),
            "{handle} must be unlinked before its locals are cleared"
        );
        let heap = Arc::clone(&self.heap);
        self.frame_mut(handle).clear_locals(&*heap)
    }

    /// Removes a cleared record and releases its executable.
    pub fn pop_frame(&mut self, handle: FrameHandle) -> RuntimeResult<()> {
        debug_assert_ne!(self.current_frame(), Some(handle), "popping the current frame");
        let mut record = match self.frames.remove(handle) {
            Some(record) => record,
            None => panic!("stale frame handle {handle}"),
        };
        assert!(record.is_cleared(), "{handle} popped before it was cleared");
        trace!(%handle, "popped frame");
        record.release_executable(&*self.heap)
    }

    /// Normal and exceptional frame exit: unlink if current, clear, pop.
    pub fn exit_frame(&mut self, handle: FrameHandle) -> RuntimeResult<()> {
        if self.current_frame() == Some(handle) {
            self.unlink(handle);
        }
        let result = self.clear_except_executable(handle);
        result.and(self.pop_frame(handle))
    }

    /// Terminates a generator frame, running or suspended.
    pub fn close_generator(&mut self, handle: FrameHandle) -> RuntimeResult<()> {
        if self.current_frame() == Some(handle) {
            self.unlink(handle);
        }
        let record = self.frame_mut(handle);
        if record.is_cleared() {
            return self.pop_frame(handle);
        }
        assert!(record.generator_state().is_some(), "{handle} is not a generator frame");
        record.set_owner(FrameOwner::SuspendedOwner);
        record.set_generator_state(GeneratorState::Cleared);
        let result = self.clear_except_executable(handle);
        result.and(self.pop_frame(handle))
    }

    /// Visits every reference the record behind `handle` owns.
    pub fn traverse_frame(
        &self,
        handle: FrameHandle,
        visit: &mut dyn FnMut(ObjectId) -> VisitResult,
    ) -> VisitResult {
        self.frame(handle).traverse(visit)
    }
}
