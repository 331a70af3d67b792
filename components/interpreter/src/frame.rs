//! Execution frame records
//!
//! A [`FrameRecord`] is the execution state of one call: the executable it
//! runs, the function object it was called through, an optional locals
//! mapping, and a contiguous array of [`StackRef`] slots holding the fast
//! locals followed by the evaluation stack.
//!
//! Slots `[0, stacktop)` are live; slots `[stacktop, capacity)` are dead and
//! always hold `StackRef::NULL`.
//!
//! # Ownership
//!
//! A record owns one reference to each of: its executable, its function, its
//! locals mapping (if any), its heap wrapper (if any), and every non-null live
//! slot. [`FrameRecord::traverse`] reports exactly these edges, and the
//! clearing paths release exactly these edges (the executable is released by
//! whoever pops the record).

use std::ops::ControlFlow;

use core_types::{ObjectId, ObjectLifetime, RuntimeResult};
use memory_manager::{visit_object, visit_ref, StackRef, VisitResult};

use crate::code::CodeUnit;
use crate::thread_state::FrameHandle;

/// Who currently owns a frame record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameOwner {
    /// Embedded in a native call; never escapes to a heap wrapper
    Transient,
    /// Executing on a thread
    ThreadOwned,
    /// Owned by a suspended generator or coroutine
    SuspendedOwner,
    /// Moved into its heap wrapper
    HeapOwned,
    /// Released; waiting to be popped
    Cleared,
}

/// Lifecycle of the generator or coroutine backing a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Created, never started
    Created,
    /// Yielded control
    Suspended,
    /// Running on a thread
    Running,
    /// Returned or raised
    Completed,
    /// Released by its generator
    Cleared,
}

/// Slot geometry taken from a code unit when a frame is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameLayout {
    /// Number of fast-local slots
    pub nlocalsplus: usize,
    /// Total slots (locals plus evaluation stack)
    pub capacity: usize,
    /// Instruction index where the entry prologue ends
    pub prologue_end: usize,
}

impl FrameLayout {
    /// Layout for frames running `code`.
    pub fn of(code: &CodeUnit) -> Self {
        FrameLayout {
            nlocalsplus: code.nlocalsplus,
            capacity: code.slot_capacity(),
            prologue_end: code.prologue_end,
        }
    }
}

/// Execution state of one call.
#[derive(Debug)]
pub struct FrameRecord {
    executable: StackRef,
    function: StackRef,
    locals: Option<ObjectId>,
    frame_object: Option<ObjectId>,
    previous: Option<FrameHandle>,
    owner: FrameOwner,
    generator: Option<GeneratorState>,
    instr_offset: usize,
    nlocalsplus: usize,
    prologue_end: usize,
    stacktop: usize,
    slots: Box<[StackRef]>,
}

impl FrameRecord {
    /// Creates a record taking ownership of `executable`, `function` and `locals`.
    ///
    /// Fast locals start out null and live; the evaluation stack starts empty.
    pub fn new(
        executable: StackRef,
        function: StackRef,
        locals: Option<ObjectId>,
        layout: FrameLayout,
        owner: FrameOwner,
    ) -> Self {
        debug_assert!(
            matches!(
                owner,
                FrameOwner::Transient | FrameOwner::ThreadOwned | FrameOwner::SuspendedOwner
            ),
            "frames start out transient, thread-owned or generator-owned"
        );
        debug_assert!(layout.nlocalsplus <= layout.capacity);
        FrameRecord {
            executable,
            function,
            locals,
            frame_object: None,
            previous: None,
            owner,
            generator: (owner == FrameOwner::SuspendedOwner).then_some(GeneratorState::Created),
            instr_offset: 0,
            nlocalsplus: layout.nlocalsplus,
            prologue_end: layout.prologue_end,
            stacktop: layout.nlocalsplus,
            slots: (0..layout.capacity).map(|_| StackRef::NULL).collect(),
        }
    }

    /// What stays behind in the arena once a record's contents moved into its
    /// heap wrapper: only the executable reference its popper must release.
    pub(crate) fn cleared_shell(executable: StackRef) -> Self {
        FrameRecord {
            executable,
            function: StackRef::NULL,
            locals: None,
            frame_object: None,
            previous: None,
            owner: FrameOwner::Cleared,
            generator: None,
            instr_offset: 0,
            nlocalsplus: 0,
            prologue_end: 0,
            stacktop: 0,
            slots: Box::new([]),
        }
    }

    /// Current owner.
    pub fn owner(&self) -> FrameOwner {
        self.owner
    }

    /// State of the backing generator, for generator frames.
    pub fn generator_state(&self) -> Option<GeneratorState> {
        self.generator
    }

    /// The executable this frame runs.
    pub fn executable(&self) -> &StackRef {
        &self.executable
    }

    /// The function object this frame was called through.
    pub fn function(&self) -> &StackRef {
        &self.function
    }

    /// The locals mapping, if one was materialized.
    pub fn locals(&self) -> Option<ObjectId> {
        self.locals
    }

    /// The heap wrapper, if one exists.
    pub fn frame_object(&self) -> Option<ObjectId> {
        self.frame_object
    }

    /// The caller's record.
    pub fn previous(&self) -> Option<FrameHandle> {
        self.previous
    }

    /// Index of the current instruction.
    pub fn instr_offset(&self) -> usize {
        self.instr_offset
    }

    /// Instruction index where the entry prologue ends.
    pub fn prologue_end(&self) -> usize {
        self.prologue_end
    }

    /// Number of live slots.
    pub fn stacktop(&self) -> usize {
        self.stacktop
    }

    /// Number of fast-local slots.
    pub fn nlocalsplus(&self) -> usize {
        self.nlocalsplus
    }

    /// Total slot capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live slots, locals first.
    pub fn live_slots(&self) -> &[StackRef] {
        &self.slots[..self.stacktop]
    }

    /// Returns true once the record went through a terminal path.
    pub fn is_cleared(&self) -> bool {
        self.owner == FrameOwner::Cleared
    }

    /// A record is incomplete until it has run past its entry prologue.
    ///
    /// Transient records are always incomplete: they never become visible
    /// to introspection. Generator-owned records count as complete.
    pub fn is_incomplete(&self) -> bool {
        match self.owner {
            FrameOwner::Transient => true,
            FrameOwner::SuspendedOwner => false,
            _ => self.instr_offset < self.prologue_end,
        }
    }

    /// Pushes onto the evaluation stack.
    ///
    /// # Panics
    ///
    /// Panics on evaluation stack overflow.
    pub fn push(&mut self, value: StackRef) {
        assert!(self.stacktop < self.slots.len(), "evaluation stack overflow");
        let dead = std::mem::replace(&mut self.slots[self.stacktop], value);
        debug_assert!(dead.is_null(), "dead slot was not null");
        self.stacktop += 1;
    }

    /// Pops from the evaluation stack, transferring the reference to the caller.
    ///
    /// # Panics
    ///
    /// Panics if the evaluation stack is empty.
    pub fn pop(&mut self) -> StackRef {
        assert!(self.stacktop > self.nlocalsplus, "evaluation stack underflow");
        self.stacktop -= 1;
        std::mem::take(&mut self.slots[self.stacktop])
    }

    /// Top of the evaluation stack.
    pub fn peek(&self) -> Option<&StackRef> {
        if self.stacktop > self.nlocalsplus {
            Some(&self.slots[self.stacktop - 1])
        } else {
            None
        }
    }

    /// Reads a live slot.
    ///
    /// # Panics
    ///
    /// Panics if `index` is at or beyond the stack top.
    pub fn local(&self, index: usize) -> &StackRef {
        assert!(index < self.stacktop, "slot {index} is dead");
        &self.slots[index]
    }

    /// Stores into a fast local, releasing the previous value.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a fast local or its slot is dead, as after
    /// [`FrameRecord::clear_locals`].
    pub fn set_local<L>(&mut self, index: usize, value: StackRef, rt: &L) -> RuntimeResult<()>
    where
        L: ObjectLifetime + ?Sized,
    {
        assert!(index < self.nlocalsplus, "slot {index} is not a fast local");
        assert!(index < self.stacktop, "slot {index} is dead");
        let old = std::mem::replace(&mut self.slots[index], value);
        old.release(rt)
    }

    /// Installs a locals mapping (taking the caller's reference) and releases
    /// the previous one.
    pub fn set_locals<L>(&mut self, locals: Option<ObjectId>, rt: &L) -> RuntimeResult<()>
    where
        L: ObjectLifetime + ?Sized,
    {
        match std::mem::replace(&mut self.locals, locals) {
            Some(old) => rt.decref(old),
            None => Ok(()),
        }
    }

    /// Moves the instruction cursor forward by `units` instructions.
    pub fn advance(&mut self, units: usize) {
        self.instr_offset += units;
    }

    /// Sets the instruction cursor.
    pub fn set_instr_offset(&mut self, offset: usize) {
        self.instr_offset = offset;
    }

    pub(crate) fn set_owner(&mut self, owner: FrameOwner) {
        self.owner = owner;
    }

    pub(crate) fn set_generator_state(&mut self, state: GeneratorState) {
        debug_assert!(self.generator.is_some(), "not a generator frame");
        self.generator = Some(state);
    }

    pub(crate) fn set_previous(&mut self, previous: Option<FrameHandle>) {
        self.previous = previous;
    }

    pub(crate) fn take_previous(&mut self) -> Option<FrameHandle> {
        self.previous.take()
    }

    pub(crate) fn set_frame_object(&mut self, wrapper: ObjectId) {
        debug_assert!(self.frame_object.is_none());
        self.frame_object = Some(wrapper);
    }

    pub(crate) fn take_frame_object(&mut self) -> Option<ObjectId> {
        self.frame_object.take()
    }

    /// Releases every live slot in ascending order, then the locals mapping.
    ///
    /// The stack top drops to zero before anything is released, so code run by
    /// finalizers sees an empty frame. Releasing continues past failures; the
    /// first error is returned.
    pub fn clear_locals<L>(&mut self, rt: &L) -> RuntimeResult<()>
    where
        L: ObjectLifetime + ?Sized,
    {
        let stacktop = std::mem::replace(&mut self.stacktop, 0);
        let mut result = Ok(());
        for slot in &mut self.slots[..stacktop] {
            result = result.and(StackRef::clear(slot, rt));
        }
        if let Some(locals) = self.locals.take() {
            result = result.and(rt.decref(locals));
        }
        result
    }

    /// Plain terminal clear: slots, locals mapping and function.
    pub(crate) fn clear<L>(&mut self, rt: &L) -> RuntimeResult<()>
    where
        L: ObjectLifetime + ?Sized,
    {
        let result = self.clear_locals(rt);
        let result = result.and(StackRef::clear(&mut self.function, rt));
        self.owner = FrameOwner::Cleared;
        result
    }

    pub(crate) fn release_executable<L>(&mut self, rt: &L) -> RuntimeResult<()>
    where
        L: ObjectLifetime + ?Sized,
    {
        StackRef::clear(&mut self.executable, rt)
    }

    /// Visits every owned edge: wrapper, locals mapping, function,
    /// executable, then each non-null live slot.
    pub fn traverse(&self, visit: &mut dyn FnMut(ObjectId) -> VisitResult) -> VisitResult {
        visit_object(self.frame_object, visit)?;
        visit_object(self.locals, visit)?;
        visit_ref(&self.function, visit)?;
        visit_ref(&self.executable, visit)?;
        for slot in self.live_slots() {
            visit_ref(slot, visit)?;
        }
        ControlFlow::Continue(())
    }
}
